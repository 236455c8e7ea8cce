//! bring user entries in line with a declarative list of users
//!
//! For every [UserSpec] the entry below the base DN is fetched and compared
//! with the attribute set the user should have. Depending on the outcome the
//! entry is left alone, modified with the minimal set of changes, or created.
//! Each user is handled independently, a failure for one user is recorded in
//! the [BatchReport] and the batch moves on.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;

use diff::Diff;
use ldap3::Scope;
use ldap_types::basic::{LDAPEntry, LDAPOperation};
use tracing::instrument;

use crate::directory::{Directory, LdapOperationError};
use crate::user::{UserSpec, MANAGED_ATTRIBUTES};

/// attributes whose values compare case-insensitively when diffing
const CASE_INSENSITIVE_ATTRIBUTES: [&str; 1] = ["objectClass"];

/// what has to happen to an entry to match its target attribute set
#[derive(Debug)]
pub enum ChangeSet {
    /// the entry already matches
    Unchanged,
    /// the entry exists and needs these modifications
    Modify(Vec<ldap3::Mod<String>>),
    /// the entry does not exist and is added like this
    Create(LDAPEntry),
}

/// what the upsert did for one user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// a new entry was added
    Created,
    /// the existing entry was modified
    Updated,
    /// the existing entry already matched, nothing was written
    Unchanged,
}

/// fetch the managed attributes of the entry at `dn`
///
/// returns `None` if the entry does not exist. Attribute names are normalized
/// to the spelling used in [MANAGED_ATTRIBUTES] so they can be compared with a
/// target entry.
#[instrument(skip(directory))]
pub async fn fetch_entry<D: Directory>(
    directory: &mut D,
    dn: &str,
) -> Result<Option<LDAPEntry>, LdapOperationError> {
    let entries = match directory
        .search(dn, Scope::Base, "(objectClass=*)", &MANAGED_ATTRIBUTES)
        .await
    {
        Ok(entries) => entries,
        Err(err) if err.is_no_such_object() => return Ok(None),
        Err(err) => return Err(err),
    };
    Ok(entries.into_iter().next().map(|entry| LDAPEntry {
        dn: dn.to_string(),
        attrs: normalize_attribute_names(entry.attrs),
        bin_attrs: entry.bin_attrs,
    }))
}

/// rename attributes returned by the server to the managed spelling
fn normalize_attribute_names(attrs: HashMap<String, Vec<String>>) -> HashMap<String, Vec<String>> {
    attrs
        .into_iter()
        .map(|(k, v)| {
            let name = MANAGED_ATTRIBUTES
                .iter()
                .find(|m| m.eq_ignore_ascii_case(&k))
                .map(|m| m.to_string())
                .unwrap_or(k);
            (name, v)
        })
        .collect()
}

/// sorted copy of a list of values, lowercased for case-insensitive attributes
fn comparable_values(attr_name: &str, values: &[String]) -> Vec<String> {
    let mut result: Vec<String> = if CASE_INSENSITIVE_ATTRIBUTES.contains(&attr_name) {
        values.iter().map(|s| s.to_lowercase()).collect()
    } else {
        values.to_vec()
    };
    result.sort();
    result.dedup();
    result
}

/// generate the [ldap3::Mod] needed to turn the existing values of one
/// attribute into the target values, if any
pub fn mod_value(
    attr_name: &str,
    target_entry: &LDAPEntry,
    existing_entry: &LDAPEntry,
) -> Option<ldap3::Mod<String>> {
    let target_values = target_entry
        .attrs
        .get(attr_name)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let existing_values = existing_entry
        .attrs
        .get(attr_name)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let target_sorted = comparable_values(attr_name, target_values);
    let existing_sorted = comparable_values(attr_name, existing_values);
    tracing::trace!(
        "Checking if target values and existing values of {} are identical:\n{:#?}\n{:#?}",
        attr_name,
        target_sorted,
        existing_sorted
    );
    if target_sorted == existing_sorted {
        tracing::trace!(
            "Skipping attribute {} because target values and existing values are identical",
            attr_name
        );
        return None;
    }
    let replacement_values: HashSet<String> = target_values.iter().cloned().collect();
    if replacement_values.is_empty() {
        Some(ldap3::Mod::Delete(attr_name.to_string(), HashSet::new()))
    } else if existing_values.is_empty() {
        Some(ldap3::Mod::Add(attr_name.to_string(), replacement_values))
    } else {
        Some(ldap3::Mod::Replace(
            attr_name.to_string(),
            replacement_values,
        ))
    }
}

/// diff the attributes of two versions of an entry and generate the
/// modifications which turn the existing entry into the target entry
///
/// attributes with equal value sets produce no modification, so an empty
/// result means the entry is up to date
#[instrument(skip(target_entry, existing_entry), fields(dn = %target_entry.dn))]
pub fn diff_entry(target_entry: &LDAPEntry, existing_entry: &LDAPEntry) -> Vec<ldap3::Mod<String>> {
    let change = Diff::diff(&target_entry.attrs, &existing_entry.attrs);
    tracing::trace!("Diff:\n{:#?}", change);
    let mut attr_names: Vec<&String> = change
        .altered
        .keys()
        .chain(change.removed.iter())
        .collect();
    attr_names.sort();
    attr_names.dedup();
    let mut ldap_mods: Vec<ldap3::Mod<String>> = vec![];
    for attr_name in attr_names {
        if let Some(m) = mod_value(attr_name, target_entry, existing_entry) {
            if !ldap_mods.contains(&m) {
                ldap_mods.push(m);
            }
        }
    }
    ldap_mods
}

/// the entry to add when the target does not exist yet
///
/// attributes without values are left out, LDAP cannot store them
pub fn creation_entry(target_entry: &LDAPEntry) -> LDAPEntry {
    LDAPEntry {
        dn: target_entry.dn.to_owned(),
        attrs: target_entry
            .attrs
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect(),
        bin_attrs: target_entry
            .bin_attrs
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect(),
    }
}

/// decide between leaving the entry alone, modifying it or creating it
pub fn compute_change_set(target_entry: &LDAPEntry, existing_entry: Option<&LDAPEntry>) -> ChangeSet {
    match existing_entry {
        None => ChangeSet::Create(creation_entry(target_entry)),
        Some(existing_entry) => {
            let mods = diff_entry(target_entry, existing_entry);
            if mods.is_empty() {
                ChangeSet::Unchanged
            } else {
                ChangeSet::Modify(mods)
            }
        }
    }
}

/// bring the entry of one user in line with its [UserSpec]
#[instrument(skip(directory, user), fields(uid = %user.uid))]
pub async fn upsert_user<D: Directory>(
    directory: &mut D,
    user: &UserSpec,
    base_dn: &str,
) -> Result<UpsertOutcome, LdapOperationError> {
    let target_entry = user.target_entry(base_dn);
    let existing_entry = fetch_entry(directory, &target_entry.dn).await?;
    match compute_change_set(&target_entry, existing_entry.as_ref()) {
        ChangeSet::Unchanged => Ok(UpsertOutcome::Unchanged),
        ChangeSet::Modify(mods) => {
            directory
                .write(&LDAPOperation::Modify {
                    dn: target_entry.dn.to_owned(),
                    mods,
                    bin_mods: vec![],
                })
                .await?;
            Ok(UpsertOutcome::Updated)
        }
        ChangeSet::Create(entry) => {
            directory.write(&LDAPOperation::Add(entry)).await?;
            Ok(UpsertOutcome::Created)
        }
    }
}

/// the result of upserting one user
#[derive(Debug)]
pub struct RecordResult {
    /// the user id of the record
    pub uid: String,
    /// what happened, or why it failed
    pub outcome: Result<UpsertOutcome, LdapOperationError>,
    /// the write was only checked by the server, not applied
    pub noop: bool,
}

impl Display for RecordResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            Ok(UpsertOutcome::Created) => {
                write!(f, "User {} created successfully.", self.uid)?;
            }
            Ok(UpsertOutcome::Updated) => {
                write!(f, "User {} updated successfully.", self.uid)?;
            }
            Ok(UpsertOutcome::Unchanged) => {
                return write!(f, "No updates necessary for user {}.", self.uid);
            }
            Err(err) => return write!(f, "Error in creating user {}: {}", self.uid, err),
        }
        if self.noop {
            write!(f, " (noop)")?;
        }
        Ok(())
    }
}

/// per-user results of a batch, in input order
#[derive(Debug, Default)]
pub struct BatchReport {
    /// one result per input user
    pub results: Vec<RecordResult>,
}

impl BatchReport {
    /// number of users with the given outcome
    pub fn count(&self, outcome: UpsertOutcome) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, Ok(o) if o == outcome))
            .count()
    }

    /// number of users that failed
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_err()).count()
    }

    /// true if no user failed
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

/// upsert every user over one directory connection
///
/// `on_result` is called as soon as each user is done, so progress can be
/// reported while the batch runs
pub async fn upsert_users<D, F>(
    directory: &mut D,
    users: &[UserSpec],
    base_dn: &str,
    mut on_result: F,
) -> BatchReport
where
    D: Directory,
    F: FnMut(&RecordResult),
{
    let mut report = BatchReport::default();
    for user in users {
        let outcome = upsert_user(directory, user, base_dn).await;
        if let Err(err) = &outcome {
            tracing::error!("Upserting user {} failed: {}", user.uid, err);
        }
        let result = RecordResult {
            uid: user.uid.to_owned(),
            outcome,
            noop: directory.is_noop(),
        };
        on_result(&result);
        report.results.push(result);
    }
    tracing::info!(
        "Upserted {} users: {} created, {} updated, {} unchanged, {} failed",
        report.results.len(),
        report.count(UpsertOutcome::Created),
        report.count(UpsertOutcome::Updated),
        report.count(UpsertOutcome::Unchanged),
        report.failed()
    );
    report
}
