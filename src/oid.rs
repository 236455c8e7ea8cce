//! generate object identifiers for schema elements without registering an arc
//!
//! ITU-T X.667 reserves the arc `2.25` for OIDs whose only other component is
//! the integer value of a UUID.

use std::fmt::Display;

use uuid::Uuid;

/// the arc UUID based OIDs live under
pub const UUID_OID_ARC: &str = "2.25";

/// an OID together with the UUID it was derived from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedOid {
    /// the random UUID
    pub uuid: Uuid,
    /// the dotted decimal OID
    pub oid: String,
}

impl GeneratedOid {
    /// the OID for a given UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            oid: format!("{}.{}", UUID_OID_ARC, uuid.as_u128()),
        }
    }
}

impl Display for GeneratedOid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Generated UUID: {}", self.uuid)?;
        write!(f, "Corresponding OID: {}", self.oid)
    }
}

/// generate a fresh OID from a random (version 4) UUID
pub fn generate_oid() -> GeneratedOid {
    GeneratedOid::from_uuid(Uuid::new_v4())
}
