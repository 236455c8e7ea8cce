//! delete a single entry by DN

use ldap_types::basic::LDAPOperation;
use tracing::instrument;

use crate::directory::{Directory, LdapOperationError};

/// the two expected results of a delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// the entry existed and was removed
    Deleted,
    /// there was no entry at the DN
    NotFound,
}

/// delete the entry at exactly `dn`, without touching any children
///
/// a missing entry is reported as [DeleteOutcome::NotFound], not as an error
#[instrument(skip(directory))]
pub async fn delete_entry<D: Directory>(
    directory: &mut D,
    dn: &str,
) -> Result<DeleteOutcome, LdapOperationError> {
    match directory
        .write(&LDAPOperation::Delete { dn: dn.to_string() })
        .await
    {
        Ok(()) => Ok(DeleteOutcome::Deleted),
        Err(err) if err.is_no_such_object() => {
            tracing::debug!("Nothing to delete at {}", dn);
            Ok(DeleteOutcome::NotFound)
        }
        Err(err) => Err(err),
    }
}
