//! an in-memory [Directory] for tests
//!
//! Supports base and subtree scope, filters built from `&`, equality and
//! presence terms, and add/modify/delete. Entries are returned in insertion
//! order, the way a server returns them in storage order.

use std::collections::HashMap;

use ldap3::{Scope, SearchEntry};
use ldap_types::basic::{LDAPEntry, LDAPOperation};

use crate::directory::{Directory, LdapOperationError, NO_ATTRIBUTES};
use crate::user::attribute_values;

/// test double holding entries in memory
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    /// stored entries in insertion order
    pub(crate) entries: Vec<LDAPEntry>,
    /// number of successful writes
    pub writes: usize,
    /// modifications of the last successful modify
    pub last_mods: Vec<ldap3::Mod<String>>,
    /// writes to this DN fail with a server error
    pub fail_writes_to: Option<String>,
    /// unbind fails
    pub fail_unbind: bool,
    /// writes are checked like a server honoring the noop control would,
    /// but not applied
    pub noop: bool,
}

/// a failure that is neither success nor "no such object"
fn server_error(dn: &str) -> LdapOperationError {
    LdapOperationError::LdapError(ldap3::LdapError::from(ldap3::LdapResult {
        rc: 53,
        matched: String::new(),
        text: format!("unwilling to perform on {}", dn),
        refs: vec![],
        ctrls: vec![],
    }))
}

/// DN comparison ignoring case and spaces after separators
fn normalize_dn(dn: &str) -> String {
    dn.split(',')
        .map(|rdn| rdn.trim().to_lowercase())
        .collect::<Vec<_>>()
        .join(",")
}

/// true if `dn` is `base` or below it
fn in_subtree(dn: &str, base: &str) -> bool {
    let dn = normalize_dn(dn);
    let base = normalize_dn(base);
    base.is_empty() || dn == base || dn.ends_with(&format!(",{}", base))
}

/// split the body of an `&` filter into its parenthesized terms
fn split_terms(body: &str) -> Vec<&str> {
    let mut terms = vec![];
    let mut depth = 0;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match c {
            '(' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            ')' => {
                depth -= 1;
                if depth == 0 {
                    terms.push(&body[start..=i]);
                }
            }
            _ => {}
        }
    }
    terms
}

/// evaluate a small subset of RFC 4515 filters against an entry
fn matches_filter(filter: &str, entry: &LDAPEntry) -> bool {
    let inner = filter
        .trim()
        .strip_prefix('(')
        .and_then(|f| f.strip_suffix(')'))
        .unwrap_or(filter);
    if let Some(body) = inner.strip_prefix('&') {
        return split_terms(body)
            .into_iter()
            .all(|term| matches_filter(term, entry));
    }
    let Some((attr_name, value)) = inner.split_once('=') else {
        return false;
    };
    let values = attribute_values(&entry.attrs, attr_name);
    if value == "*" {
        return attr_name.eq_ignore_ascii_case("objectClass")
            || values.is_some_and(|v| !v.is_empty());
    }
    values.is_some_and(|v| v.iter().any(|s| s.eq_ignore_ascii_case(value)))
}

/// copy the requested attributes of an entry into a search result
fn project(entry: &LDAPEntry, attrs: &[&str]) -> SearchEntry {
    let wanted = |name: &str| {
        !attrs.contains(&NO_ATTRIBUTES)
            && (attrs.is_empty() || attrs.iter().any(|a| *a == "*" || a.eq_ignore_ascii_case(name)))
    };
    let selected = entry
        .attrs
        .iter()
        .filter(|(k, _)| wanted(k.as_str()))
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
    SearchEntry {
        dn: entry.dn.to_owned(),
        attrs: selected,
        bin_attrs: HashMap::new(),
    }
}

/// apply one modification to an attribute map
fn apply_mod(attrs: &mut HashMap<String, Vec<String>>, m: &ldap3::Mod<String>) {
    match m {
        ldap3::Mod::Add(k, v) => attrs
            .entry(k.to_owned())
            .or_default()
            .extend(v.iter().cloned()),
        ldap3::Mod::Delete(k, v) => {
            if v.is_empty() {
                attrs.remove(k);
            } else if let Some(existing) = attrs.get_mut(k) {
                existing.retain(|s| !v.contains(s));
            }
        }
        ldap3::Mod::Replace(k, v) => {
            if v.is_empty() {
                attrs.remove(k);
            } else {
                attrs.insert(k.to_owned(), v.iter().cloned().collect());
            }
        }
        ldap3::Mod::Increment(k, v) => {
            let by: i64 = v.parse().unwrap_or_default();
            if let Some(existing) = attrs.get_mut(k) {
                for s in existing.iter_mut() {
                    *s = (s.parse::<i64>().unwrap_or_default() + by).to_string();
                }
            }
        }
    }
}

impl MemoryDirectory {
    /// a directory containing empty entries at the given DNs
    pub fn with_dns(dns: &[&str]) -> Self {
        let mut directory = Self::default();
        for dn in dns {
            directory.insert(LDAPEntry {
                dn: dn.to_string(),
                attrs: HashMap::new(),
                bin_attrs: HashMap::new(),
            });
        }
        directory
    }

    /// store an entry, replacing one with the same DN
    pub fn insert(&mut self, entry: LDAPEntry) {
        let dn = normalize_dn(&entry.dn);
        if let Some(existing) = self.entries.iter_mut().find(|e| normalize_dn(&e.dn) == dn) {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    /// the entry stored at `dn`
    pub fn get(&self, dn: &str) -> Option<&LDAPEntry> {
        let dn = normalize_dn(dn);
        self.entries.iter().find(|e| normalize_dn(&e.dn) == dn)
    }

    /// position of the entry at `dn`, or a "no such object" error
    fn position(&self, dn: &str) -> Result<usize, LdapOperationError> {
        let normalized = normalize_dn(dn);
        self.entries
            .iter()
            .position(|e| normalize_dn(&e.dn) == normalized)
            .ok_or_else(|| LdapOperationError::NoSuchObject(dn.to_string()))
    }
}

impl Directory for MemoryDirectory {
    async fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<SearchEntry>, LdapOperationError> {
        let candidates: Vec<&LDAPEntry> = match scope {
            Scope::Base => vec![&self.entries[self.position(base)?]],
            Scope::OneLevel => self
                .entries
                .iter()
                .filter(|e| {
                    e.dn.split_once(',')
                        .is_some_and(|(_, parent)| normalize_dn(parent) == normalize_dn(base))
                })
                .collect(),
            Scope::Subtree => self
                .entries
                .iter()
                .filter(|e| in_subtree(&e.dn, base))
                .collect(),
        };
        Ok(candidates
            .into_iter()
            .filter(|e| matches_filter(filter, e))
            .map(|e| project(e, attrs))
            .collect())
    }

    async fn write(&mut self, operation: &LDAPOperation) -> Result<(), LdapOperationError> {
        let dn = match operation {
            LDAPOperation::Add(entry) => &entry.dn,
            LDAPOperation::Delete { dn } => dn,
            LDAPOperation::Modify { dn, .. } => dn,
        };
        if self
            .fail_writes_to
            .as_deref()
            .is_some_and(|failing| normalize_dn(failing) == normalize_dn(dn))
        {
            return Err(server_error(dn));
        }
        match operation {
            LDAPOperation::Add(entry) => {
                if self.get(&entry.dn).is_some() {
                    return Err(LdapOperationError::LdapError(ldap3::LdapError::from(
                        ldap3::LdapResult {
                            rc: 68,
                            matched: String::new(),
                            text: "entry already exists".to_string(),
                            refs: vec![],
                            ctrls: vec![],
                        },
                    )));
                }
                if !self.noop {
                    self.entries.push(entry.clone());
                }
            }
            LDAPOperation::Delete { dn } => {
                let position = self.position(dn)?;
                if !self.noop {
                    self.entries.remove(position);
                }
            }
            LDAPOperation::Modify { dn, mods, .. } => {
                let position = self.position(dn)?;
                self.last_mods = mods.to_owned();
                if self.noop {
                    return Ok(());
                }
                let attrs = &mut self.entries[position].attrs;
                for m in mods {
                    apply_mod(attrs, m);
                }
            }
        }
        self.writes += 1;
        Ok(())
    }

    fn is_noop(&self) -> bool {
        self.noop
    }

    async fn unbind(&mut self) -> Result<(), LdapOperationError> {
        if self.fail_unbind {
            return Err(server_error("unbind"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_match_presence_equality_and_conjunction() {
        let entry = LDAPEntry {
            dn: "uid=alice,dc=example,dc=org".to_string(),
            attrs: [
                ("objectClass".to_string(), vec!["inetOrgPerson".to_string()]),
                ("uid".to_string(), vec!["alice".to_string()]),
            ]
            .into_iter()
            .collect(),
            bin_attrs: HashMap::new(),
        };
        assert!(matches_filter("(objectClass=*)", &entry));
        assert!(matches_filter("(objectclass=INETORGPERSON)", &entry));
        assert!(matches_filter("(&(objectClass=inetOrgPerson)(uid=alice))", &entry));
        assert!(!matches_filter("(&(objectClass=inetOrgPerson)(uid=bob))", &entry));
        assert!(!matches_filter("(mail=*)", &entry));
    }

    #[test]
    fn subtree_membership_respects_rdn_boundaries() {
        assert!(in_subtree("uid=a,ou=users,dc=example,dc=org", "ou=users,dc=example,dc=org"));
        assert!(in_subtree("ou=users,dc=example,dc=org", "OU=Users, dc=example,dc=org"));
        assert!(!in_subtree("ou=superusers,dc=example,dc=org", "ou=users,dc=example,dc=org"));
    }
}
