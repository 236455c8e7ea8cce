//! the seam between the housekeeping operations and the LDAP protocol client
//!
//! Everything in this crate talks to the directory through the [Directory]
//! trait. [LdapDirectory] implements it on top of [ldap3], the tests use an
//! in-memory implementation instead.

use std::collections::HashSet;
use std::fmt::Debug;
use std::fmt::Display;

use ldap3::{Ldap, LdapConnAsync, LdapResult, ResultEntry, Scope, SearchEntry};
use ldap_types::basic::{LDAPEntry, LDAPOperation};
use thiserror::Error;
use tracing::instrument;

use crate::config::ConnectParameters;

/// result code for success when the request carried the [noop_control]
///
/// <https://ldap.com/ldap-result-code-reference-other-server-side-result-codes/#rc-noOperation>
const RC_NOOP_SUCCESS: u32 = 16654;

/// result code the server returns when the target entry does not exist
const RC_NO_SUCH_OBJECT: u32 = 32;

/// page size used when draining search results
const SEARCH_PAGE_SIZE: i32 = 100;

/// attribute list requesting no attributes at all (RFC 4511 section 4.5.1.8)
pub const NO_ATTRIBUTES: &str = "1.1";

/// creates a noop_control object for use with ldap3
///
/// the noop_control is supposed to perform the same operation
/// and return the same errors as the real operation but not make
/// any changes to the directory
///
/// OpenLDAP's implementation seems to be buggy, in my tests some uses of the
/// NOOP control lead to problems displaying affected objects until the LDAP
/// server was restarted
pub fn noop_control() -> ldap3::controls::RawControl {
    ldap3::controls::RawControl {
        ctype: "1.3.6.1.4.1.4203.666.5.2".to_string(),
        crit: true,
        val: None,
    }
}

/// errors which can happen when connecting and binding to an LDAP server
#[derive(Debug, Error)]
pub enum ConnectError {
    /// an error in the ldap3 crate while connecting
    #[error("ldap3 Ldap error: {0}")]
    LdapError(#[from] ldap3::LdapError),
    /// the server rejected the bind
    #[error("bind as {bind_dn} failed: {source}")]
    BindFailed {
        /// the identity we tried to bind as
        bind_dn: String,
        /// the error returned for the bind request
        source: ldap3::LdapError,
    },
}

/// an error during normal ldap operations (search, add, modify, delete,...)
#[derive(Debug, Error)]
pub enum LdapOperationError {
    /// an error in the ldap3 library
    #[error("ldap3 Ldap error: {0}")]
    LdapError(#[from] ldap3::LdapError),
    /// the entry addressed by the operation does not exist
    #[error("No such object: {0}")]
    NoSuchObject(String),
}

impl LdapOperationError {
    /// true if this error is the server telling us the target entry does not exist
    pub fn is_no_such_object(&self) -> bool {
        matches!(self, LdapOperationError::NoSuchObject(_))
    }
}

/// the directory operations the housekeeping tools rely on
///
/// search results are returned fully drained, in the order the server sent them
#[allow(async_fn_in_trait)]
pub trait Directory {
    /// search below `base` with the given scope and filter, returning the
    /// requested attributes
    async fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<SearchEntry>, LdapOperationError>;

    /// apply one add, modify or delete operation
    async fn write(&mut self, operation: &LDAPOperation) -> Result<(), LdapOperationError>;

    /// true if writes are only checked by the server, not applied
    fn is_noop(&self) -> bool {
        false
    }

    /// end the session with the server
    async fn unbind(&mut self) -> Result<(), LdapOperationError>;
}

/// check an [ldap3::LdapResult] for success, accepting the success code returned
/// by an operation using the [noop_control] and mapping a missing entry to
/// [LdapOperationError::NoSuchObject]
pub fn check_result(ldap_result: LdapResult, dn: &str) -> Result<(), LdapOperationError> {
    match ldap_result.rc {
        0 | RC_NOOP_SUCCESS => Ok(()),
        RC_NO_SUCH_OBJECT => Err(LdapOperationError::NoSuchObject(dn.to_string())),
        _ => Err(LdapOperationError::LdapError(ldap3::LdapError::from(
            ldap_result,
        ))),
    }
}

/// perform an LDAP search via ldap3, draining the results one page at a time
/// and logging an equivalent ldapsearch command line if it fails
pub async fn ldap_search(
    ldap: &mut Ldap,
    base: &str,
    scope: Scope,
    filter: &str,
    attrs: Vec<String>,
) -> Result<Vec<SearchEntry>, LdapOperationError> {
    let adapter: ldap3::adapters::PagedResults<String, Vec<String>> =
        ldap3::adapters::PagedResults::new(SEARCH_PAGE_SIZE);
    let mut search_stream = ldap
        .streaming_search_with(adapter, base, scope, filter, attrs.clone())
        .await?;
    let mut rs = Vec::new();
    loop {
        match search_stream.next().await {
            Ok(None) => {
                let res = search_stream.finish().await;
                if res.rc != 0 {
                    tracing::debug!(
                        "Non-zero return code {} in LDAP query\n  base: {}\n  scope: {:?}\n  filter: {}\n  attrs: {:#?}",
                        res.rc,
                        base,
                        scope,
                        filter,
                        attrs
                    );
                    log_ldapsearch_command(base, scope, filter, &attrs);
                    check_result(res, base)?;
                }
                break Ok(search_entries(rs));
            }
            Ok(Some(value)) => {
                rs.push(value);
            }
            Err(err) => {
                tracing::debug!(
                    "Error {} in LDAP query after {} results\n  base: {}\n  scope: {:?}\n  filter: {}\n  attrs: {:#?}",
                    err,
                    rs.len(),
                    base,
                    scope,
                    filter,
                    attrs
                );
                log_ldapsearch_command(base, scope, filter, &attrs);
                break Err(err.into());
            }
        }
    }
}

/// turn drained search results into entries, skipping search continuation
/// references and intermediate messages which carry no entry
pub fn search_entries(results: Vec<ResultEntry>) -> Vec<SearchEntry> {
    results
        .into_iter()
        .filter(|result_entry| {
            if result_entry.is_ref() {
                tracing::debug!("Skipping search reference {:?}", result_entry);
                false
            } else {
                !result_entry.is_intermediate()
            }
        })
        .map(SearchEntry::construct)
        .collect()
}

/// log the OpenLDAP command line reproducing a search, for debugging
fn log_ldapsearch_command<S: Display>(base: &str, scope: Scope, filter: &str, attrs: &[S]) {
    tracing::debug!(
        "ldapsearch -x -LLL -E pr={}/noprompt -o ldif-wrap=no -b '{}' -s {} '{}' {}",
        SEARCH_PAGE_SIZE,
        base,
        format!("{:?}", scope).to_lowercase(),
        filter,
        itertools::join(attrs.iter(), " ")
    );
}

/// convert modifications on textual attributes into binary ones so they can
/// be sent as part of the same modify operation as the binary ones, otherwise
/// we might successfully apply the textual modifications and then fail on the
/// binary ones, leaving behind a half-modified object
pub fn mods_as_bin_mods<'a, T>(mods: T) -> Vec<ldap3::Mod<Vec<u8>>>
where
    T: IntoIterator<Item = &'a ldap3::Mod<String>>,
{
    let to_bytes = |v: &HashSet<String>| -> HashSet<Vec<u8>> {
        v.iter().map(|s| s.as_bytes().to_vec()).collect()
    };
    mods.into_iter()
        .map(|m| match m {
            ldap3::Mod::Add(k, v) => ldap3::Mod::Add(k.as_bytes().to_vec(), to_bytes(v)),
            ldap3::Mod::Delete(k, v) => ldap3::Mod::Delete(k.as_bytes().to_vec(), to_bytes(v)),
            ldap3::Mod::Replace(k, v) => ldap3::Mod::Replace(k.as_bytes().to_vec(), to_bytes(v)),
            ldap3::Mod::Increment(k, v) => {
                ldap3::Mod::Increment(k.as_bytes().to_vec(), v.as_bytes().to_vec())
            }
        })
        .collect()
}

/// combine textual and binary attributes of an entry into the form ldap3 expects
/// for an add request, leaving out attributes without values
fn add_request_attrs(entry: &LDAPEntry) -> Vec<(Vec<u8>, HashSet<Vec<u8>>)> {
    let mut combined_attrs: Vec<(Vec<u8>, HashSet<Vec<u8>>)> = entry
        .bin_attrs
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.as_bytes().to_vec(), v.iter().cloned().collect()))
        .collect();
    combined_attrs.extend(entry.attrs.iter().filter(|(_, v)| !v.is_empty()).map(
        |(k, v)| {
            (
                k.as_bytes().to_vec(),
                v.iter().map(|s| s.as_bytes().to_vec()).collect(),
            )
        },
    ));
    combined_attrs
}

/// a bound connection to an LDAP server
pub struct LdapDirectory {
    /// the ldap3 handle, its connection is driven by a background task
    ldap: Ldap,
    /// controls attached to every write operation
    controls: Vec<ldap3::controls::RawControl>,
}

impl Debug for LdapDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapDirectory")
            .field("controls", &self.controls)
            .finish_non_exhaustive()
    }
}

impl LdapDirectory {
    /// wrap an already bound ldap3 handle
    pub fn new(ldap: Ldap) -> Self {
        Self {
            ldap,
            controls: Vec::new(),
        }
    }

    /// attach the [noop_control] to all writes so the server validates them
    /// without changing anything
    pub fn with_noop(mut self, noop: bool) -> Self {
        if noop {
            self.controls.push(noop_control());
        }
        self
    }
}

impl Directory for LdapDirectory {
    #[instrument(skip(self))]
    async fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<SearchEntry>, LdapOperationError> {
        let attrs = attrs.iter().map(|a| a.to_string()).collect();
        ldap_search(&mut self.ldap, base, scope, filter, attrs).await
    }

    #[instrument(skip(self, operation))]
    async fn write(&mut self, operation: &LDAPOperation) -> Result<(), LdapOperationError> {
        if !self.controls.is_empty() {
            tracing::debug!(
                "The following operation uses the LDAP controls: {:#?}",
                self.controls
            );
        }
        match operation {
            LDAPOperation::Add(entry) => {
                tracing::debug!(
                    "Adding LDAP entry at {} with attributes\n{:#?}\nand binary attributes\n{:#?}",
                    entry.dn,
                    entry.attrs,
                    entry.bin_attrs
                );
                // the add has to happen in one operation or we run into
                // objectClass requirements
                let res = self
                    .ldap
                    .with_controls(self.controls.to_owned())
                    .add(&entry.dn, add_request_attrs(entry))
                    .await?;
                check_result(res, &entry.dn)
            }
            LDAPOperation::Delete { dn } => {
                tracing::debug!("Deleting LDAP entry at {}", dn);
                let res = self
                    .ldap
                    .with_controls(self.controls.to_owned())
                    .delete(dn)
                    .await?;
                check_result(res, dn)
            }
            LDAPOperation::Modify { dn, mods, bin_mods } => {
                tracing::debug!(
                    "Modifying LDAP entry at {} with modifications\n{:#?}\nand binary modifications\n{:#?}",
                    dn,
                    mods,
                    bin_mods
                );
                let mut combined_mods = bin_mods.to_owned();
                combined_mods.extend(mods_as_bin_mods(mods));
                let res = self
                    .ldap
                    .with_controls(self.controls.to_owned())
                    .modify(dn, combined_mods)
                    .await?;
                check_result(res, dn)
            }
        }
    }

    fn is_noop(&self) -> bool {
        let noop_ctype = noop_control().ctype;
        self.controls.iter().any(|c| c.ctype == noop_ctype)
    }

    async fn unbind(&mut self) -> Result<(), LdapOperationError> {
        self.ldap.unbind().await?;
        Ok(())
    }
}

/// connect to an LDAP server and perform a simple bind with the given parameters
#[instrument]
pub async fn connect(parameters: &ConnectParameters) -> Result<LdapDirectory, ConnectError> {
    let (ldap_conn_async, mut ldap) = LdapConnAsync::new(&parameters.url).await?;
    ldap3::drive!(ldap_conn_async);
    ldap.simple_bind(&parameters.bind_dn, &parameters.bind_password)
        .await
        .and_then(|res| res.success())
        .map_err(|source| ConnectError::BindFailed {
            bind_dn: parameters.bind_dn.to_owned(),
            source,
        })?;
    tracing::debug!("Bound to {} as {}", parameters.url, parameters.bind_dn);
    Ok(LdapDirectory::new(ldap))
}

/// holder for the one directory connection of a program run
///
/// the connection may never have been opened (e.g. the bind failed), releasing
/// it is a no-op then
pub struct Session<D: Directory> {
    /// the open directory, if we got as far as opening one
    directory: Option<D>,
}

impl<D: Directory> Debug for Session<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("open", &self.is_open())
            .finish()
    }
}

impl<D: Directory> Default for Session<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Directory> Session<D> {
    /// a session without a connection
    pub fn new() -> Self {
        Self { directory: None }
    }

    /// store an opened directory in the session and hand it back for use
    pub fn attach(&mut self, directory: D) -> &mut D {
        self.directory.insert(directory)
    }

    /// true if a directory is attached and not released yet
    pub fn is_open(&self) -> bool {
        self.directory.is_some()
    }

    /// unbind the attached directory, if any
    ///
    /// errors are logged and dropped, releasing never fails
    pub async fn release(&mut self) {
        if let Some(mut directory) = self.directory.take() {
            if let Err(err) = directory.unbind().await {
                tracing::warn!("Error while releasing LDAP connection: {}", err);
            }
        }
    }
}
