//! user entries: the declarative input format, the attribute set written to
//! the directory and the flat record produced when listing users

use std::collections::HashMap;
use std::path::Path;

use ldap3::SearchEntry;
use ldap_types::basic::LDAPEntry;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::instrument;

/// object classes every managed user entry carries
pub const USER_OBJECT_CLASSES: [&str; 5] = [
    "inetOrgPerson",
    "organizationalPerson",
    "person",
    "kubernetesSC",
    "top",
];

/// filter matching user entries
pub const USER_FILTER: &str = "(objectClass=inetOrgPerson)";

/// every attribute the upsert writes, and so every attribute it compares
pub const MANAGED_ATTRIBUTES: [&str; 14] = [
    "objectClass",
    "uid",
    "cn",
    "sn",
    "mail",
    "telephoneNumber",
    "o",
    "ou",
    "givenName",
    "displayName",
    "supplementalGroups",
    "runAsUser",
    "runAsGroup",
    "fsGroup",
];

/// the attributes projected into a [UserRecord], in output order
pub const LISTED_ATTRIBUTES: [&str; 13] = [
    "uid",
    "cn",
    "sn",
    "mail",
    "telephoneNumber",
    "givenName",
    "displayName",
    "o",
    "ou",
    "runAsUser",
    "runAsGroup",
    "fsGroup",
    "supplementalGroups",
];

/// look up an attribute's values ignoring the case of the attribute name,
/// LDAP attribute descriptions are case-insensitive
pub fn attribute_values<'a>(
    attrs: &'a HashMap<String, Vec<String>>,
    name: &str,
) -> Option<&'a Vec<String>> {
    attrs.get(name).or_else(|| {
        attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    })
}

/// one desired user as described in the declarative source file
///
/// `uid`, `cn` and `sn` are required, every other field falls back to
/// "no value" when absent
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    /// the user id, also the RDN of the entry
    pub uid: String,
    /// common name
    pub cn: String,
    /// surname
    pub sn: String,
    /// mail address, stored as `mail`
    #[serde(default, alias = "mail")]
    pub email: Option<String>,
    /// telephone number
    #[serde(default)]
    pub telephone_number: Option<String>,
    /// organization
    #[serde(default)]
    pub o: Option<String>,
    /// organizational unit
    #[serde(default)]
    pub ou: Option<String>,
    /// given name
    #[serde(default)]
    pub given_name: Option<String>,
    /// display name
    #[serde(default)]
    pub display_name: Option<String>,
    /// additional group ids for the pod security context
    #[serde(default, deserialize_with = "lenient_ids")]
    pub supplemental_groups: Vec<i64>,
    /// user id for the pod security context
    #[serde(default, deserialize_with = "lenient_id")]
    pub run_as_user: Option<i64>,
    /// group id for the pod security context
    #[serde(default, deserialize_with = "lenient_id")]
    pub run_as_group: Option<i64>,
    /// filesystem group id for the pod security context
    #[serde(default, deserialize_with = "lenient_id")]
    pub fs_group: Option<i64>,
}

/// a numeric id written either as a number or as a quoted string
#[derive(Deserialize)]
#[serde(untagged)]
enum NumericId {
    /// `1000`
    Number(i64),
    /// `"1000"`
    Text(String),
}

impl NumericId {
    /// the id as a number, quoted ids have to parse as one
    fn into_number<E: serde::de::Error>(self) -> Result<i64, E> {
        match self {
            NumericId::Number(n) => Ok(n),
            NumericId::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid numeric id {:?}", s))),
        }
    }
}

/// an optional numeric id, `null` meaning absent
fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    Option::<NumericId>::deserialize(deserializer)?
        .map(NumericId::into_number::<D::Error>)
        .transpose()
}

/// a list of numeric ids, `null` meaning the empty list
fn lenient_ids<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<i64>, D::Error> {
    Option::<Vec<NumericId>>::deserialize(deserializer)?
        .unwrap_or_default()
        .into_iter()
        .map(NumericId::into_number::<D::Error>)
        .collect()
}

/// the top level of the declarative source file
#[derive(Debug, Clone, Deserialize)]
pub struct UserSource {
    /// the desired users, in the order they are applied
    pub users: Vec<UserSpec>,
}

/// errors loading the declarative source file
#[derive(Debug, Error)]
pub enum SourceError {
    /// an I/O error
    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),
    /// the file is not valid YAML or does not have the expected shape
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
    /// a required field is present but empty
    #[error("user #{index} has an empty required field {field}")]
    EmptyRequiredField {
        /// position of the user in the file, starting at 1
        index: usize,
        /// name of the empty field
        field: &'static str,
    },
}

/// parse the declarative source, rejecting users with empty required fields
pub fn parse_users(content: &str) -> Result<Vec<UserSpec>, SourceError> {
    let source: UserSource = serde_yaml::from_str(content)?;
    for (i, user) in source.users.iter().enumerate() {
        for (field, value) in [("uid", &user.uid), ("cn", &user.cn), ("sn", &user.sn)] {
            if value.trim().is_empty() {
                return Err(SourceError::EmptyRequiredField {
                    index: i + 1,
                    field,
                });
            }
        }
    }
    Ok(source.users)
}

/// read and parse the declarative source file
#[instrument]
pub fn load_users(path: &Path) -> Result<Vec<UserSpec>, SourceError> {
    let content = std::fs::read_to_string(path)?;
    let users = parse_users(&content)?;
    tracing::debug!("Loaded {} users from {:?}", users.len(), path);
    Ok(users)
}

/// values of an optional text field, empty strings count as absent
fn text_values(value: &Option<String>) -> Vec<String> {
    value
        .iter()
        .filter(|s| !s.is_empty())
        .cloned()
        .collect()
}

/// values of an optional numeric field
fn number_values(value: &Option<i64>) -> Vec<String> {
    value.iter().map(|n| n.to_string()).collect()
}

impl UserSpec {
    /// the DN of this user's entry below `base_dn`
    pub fn dn(&self, base_dn: &str) -> String {
        format!("uid={},{}", ldap3::dn_escape(self.uid.as_str()), base_dn)
    }

    /// the complete attribute set this user's entry should have
    ///
    /// every managed attribute is present, absent optional fields map to an
    /// empty value list
    pub fn target_entry(&self, base_dn: &str) -> LDAPEntry {
        let attrs: HashMap<String, Vec<String>> = [
            (
                "objectClass",
                USER_OBJECT_CLASSES.iter().map(|s| s.to_string()).collect(),
            ),
            ("uid", vec![self.uid.to_owned()]),
            ("cn", vec![self.cn.to_owned()]),
            ("sn", vec![self.sn.to_owned()]),
            ("mail", text_values(&self.email)),
            ("telephoneNumber", text_values(&self.telephone_number)),
            ("o", text_values(&self.o)),
            ("ou", text_values(&self.ou)),
            ("givenName", text_values(&self.given_name)),
            ("displayName", text_values(&self.display_name)),
            (
                "supplementalGroups",
                self.supplemental_groups
                    .iter()
                    .map(|g| g.to_string())
                    .collect(),
            ),
            ("runAsUser", number_values(&self.run_as_user)),
            ("runAsGroup", number_values(&self.run_as_group)),
            ("fsGroup", number_values(&self.fs_group)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        LDAPEntry {
            dn: self.dn(base_dn),
            attrs,
            bin_attrs: HashMap::new(),
        }
    }
}

/// a user entry flattened to the listed attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    /// user id
    pub uid: String,
    /// common name
    pub cn: String,
    /// surname
    pub sn: String,
    /// mail address
    pub mail: String,
    /// telephone number
    #[serde(rename = "telephoneNumber")]
    pub telephone_number: String,
    /// given name
    #[serde(rename = "givenName")]
    pub given_name: String,
    /// display name
    #[serde(rename = "displayName")]
    pub display_name: String,
    /// organization
    pub o: String,
    /// organizational unit
    pub ou: String,
    /// pod security context user id
    #[serde(rename = "runAsUser", skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<i64>,
    /// pod security context group id
    #[serde(rename = "runAsGroup", skip_serializing_if = "Option::is_none")]
    pub run_as_group: Option<i64>,
    /// pod security context filesystem group id
    #[serde(rename = "fsGroup", skip_serializing_if = "Option::is_none")]
    pub fs_group: Option<i64>,
    /// pod security context supplemental group ids
    #[serde(rename = "supplementalGroups", skip_serializing_if = "Option::is_none")]
    pub supplemental_groups: Option<Vec<i64>>,
}

/// parse a single numeric value, logging and dropping values that are not integers
fn parse_number(dn: &str, attr_name: &str, value: &str) -> Option<i64> {
    match value.trim().parse() {
        Ok(n) => Some(n),
        Err(err) => {
            tracing::warn!(
                "Ignoring non-numeric value {:?} of {} in {}: {}",
                value,
                attr_name,
                dn,
                err
            );
            None
        }
    }
}

impl UserRecord {
    /// project a search result onto the listed attributes
    pub fn from_entry(entry: &SearchEntry) -> Self {
        let text = |name: &str| -> String {
            attribute_values(&entry.attrs, name)
                .and_then(|values| values.first())
                .cloned()
                .unwrap_or_default()
        };
        let number = |name: &str| -> Option<i64> {
            attribute_values(&entry.attrs, name)
                .and_then(|values| values.first())
                .and_then(|value| parse_number(&entry.dn, name, value))
        };
        let supplemental_groups = attribute_values(&entry.attrs, "supplementalGroups")
            .filter(|values| !values.is_empty())
            .map(|values| {
                values
                    .iter()
                    .filter_map(|value| parse_number(&entry.dn, "supplementalGroups", value))
                    .collect()
            });
        Self {
            uid: text("uid"),
            cn: text("cn"),
            sn: text("sn"),
            mail: text("mail"),
            telephone_number: text("telephoneNumber"),
            given_name: text("givenName"),
            display_name: text("displayName"),
            o: text("o"),
            ou: text("ou"),
            run_as_user: number("runAsUser"),
            run_as_group: number("runAsGroup"),
            fs_group: number("fsGroup"),
            supplemental_groups,
        }
    }

    /// the record as `(attribute, display value)` pairs in [LISTED_ATTRIBUTES] order
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let number = |n: Option<i64>| n.map(|n| n.to_string()).unwrap_or_default();
        let groups = self
            .supplemental_groups
            .as_ref()
            .map(|groups| format!("[{}]", itertools::join(groups, ", ")))
            .unwrap_or_default();
        vec![
            ("uid", self.uid.to_owned()),
            ("cn", self.cn.to_owned()),
            ("sn", self.sn.to_owned()),
            ("mail", self.mail.to_owned()),
            ("telephoneNumber", self.telephone_number.to_owned()),
            ("givenName", self.given_name.to_owned()),
            ("displayName", self.display_name.to_owned()),
            ("o", self.o.to_owned()),
            ("ou", self.ou.to_owned()),
            ("runAsUser", number(self.run_as_user)),
            ("runAsGroup", number(self.run_as_group)),
            ("fsGroup", number(self.fs_group)),
            ("supplementalGroups", groups),
        ]
    }
}
