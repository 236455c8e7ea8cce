//! list DNs and user entries below a search base

use clap::ValueEnum;
use ldap3::Scope;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use crate::directory::{Directory, LdapOperationError, NO_ATTRIBUTES};
use crate::user::{UserRecord, LISTED_ATTRIBUTES, USER_FILTER};

/// every DN in the subtree below (and including) `search_base`, in the order
/// the server returns them
#[instrument(skip(directory))]
pub async fn list_dns<D: Directory>(
    directory: &mut D,
    search_base: &str,
) -> Result<Vec<String>, LdapOperationError> {
    let entries = directory
        .search(search_base, Scope::Subtree, "(objectClass=*)", &[NO_ATTRIBUTES])
        .await?;
    Ok(entries.into_iter().map(|entry| entry.dn).collect())
}

/// every user entry in the subtree below `search_base`, projected onto the
/// listed attributes
#[instrument(skip(directory))]
pub async fn list_users<D: Directory>(
    directory: &mut D,
    search_base: &str,
) -> Result<Vec<UserRecord>, LdapOperationError> {
    let entries = directory
        .search(search_base, Scope::Subtree, USER_FILTER, &LISTED_ATTRIBUTES)
        .await?;
    Ok(entries.iter().map(UserRecord::from_entry).collect())
}

/// look up a single user by uid
#[instrument(skip(directory))]
pub async fn find_user<D: Directory>(
    directory: &mut D,
    search_base: &str,
    uid: &str,
) -> Result<Option<UserRecord>, LdapOperationError> {
    let filter = format!("(&{}(uid={}))", USER_FILTER, ldap3::ldap_escape(uid));
    let entries = directory
        .search(search_base, Scope::Subtree, &filter, &LISTED_ATTRIBUTES)
        .await?;
    if entries.len() > 1 {
        tracing::warn!(
            "Found {} entries for uid {} below {}, using the first",
            entries.len(),
            uid,
            search_base
        );
    }
    Ok(entries.first().map(UserRecord::from_entry))
}

/// how listed users are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// one block of `key: value` lines per user
    #[default]
    Text,
    /// a YAML document with a `users` key
    Yaml,
    /// a JSON document with a `users` key
    Json,
}

/// errors serializing the user listing
#[derive(Debug, Error)]
pub enum RenderError {
    /// YAML serialization failed
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
    /// JSON serialization failed
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// the document shape of the structured output formats
#[derive(Debug, Serialize)]
struct UserListing<'a> {
    /// the listed users
    users: &'a [UserRecord],
}

/// render the listed users in the requested format
pub fn render_users(users: &[UserRecord], format: OutputFormat) -> Result<String, RenderError> {
    match format {
        OutputFormat::Text => {
            let mut out = String::new();
            for user in users {
                out.push_str("User Details:\n");
                for (key, value) in user.fields() {
                    out.push_str(&format!("{}: {}\n", key, value));
                }
                out.push_str(&"-".repeat(40));
                out.push('\n');
            }
            Ok(out)
        }
        OutputFormat::Yaml => Ok(serde_yaml::to_string(&UserListing { users })?),
        OutputFormat::Json => {
            let mut out = serde_json::to_string_pretty(&UserListing { users })?;
            out.push('\n');
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDirectory;
    use ldap_types::basic::LDAPEntry;
    use std::collections::{HashMap, HashSet};

    fn user_entry(uid: &str, extra: &[(&str, &[&str])]) -> LDAPEntry {
        let mut attrs: HashMap<String, Vec<String>> = [
            (
                "objectClass".to_string(),
                vec!["inetOrgPerson".to_string(), "top".to_string()],
            ),
            ("uid".to_string(), vec![uid.to_string()]),
            ("cn".to_string(), vec![uid.to_uppercase()]),
            ("userPassword".to_string(), vec!["{SSHA}secret".to_string()]),
        ]
        .into_iter()
        .collect();
        for (k, v) in extra {
            attrs.insert(k.to_string(), v.iter().map(|s| s.to_string()).collect());
        }
        LDAPEntry {
            dn: format!("uid={},ou=users,dc=example,dc=org", uid),
            attrs,
            bin_attrs: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn listing_an_empty_subtree_yields_nothing() {
        let mut directory = MemoryDirectory::with_dns(&["dc=example,dc=org"]);
        let dns = list_dns(&mut directory, "ou=empty,dc=example,dc=org")
            .await
            .unwrap();
        assert!(dns.is_empty());
    }

    #[tokio::test]
    async fn listing_returns_every_dn_once_in_server_order() {
        let all = [
            "dc=example,dc=org",
            "ou=users,dc=example,dc=org",
            "uid=zed,ou=users,dc=example,dc=org",
            "uid=alice,ou=users,dc=example,dc=org",
            "ou=groups,dc=example,dc=org",
        ];
        let mut directory = MemoryDirectory::with_dns(&all);
        directory.insert(LDAPEntry {
            dn: "cn=other,dc=example,dc=net".to_string(),
            attrs: HashMap::new(),
            bin_attrs: HashMap::new(),
        });

        let dns = list_dns(&mut directory, "ou=users,dc=example,dc=org")
            .await
            .unwrap();
        assert_eq!(dns, all[1..4].to_vec());

        let dns = list_dns(&mut directory, "dc=example,dc=org").await.unwrap();
        assert_eq!(dns.len(), all.len());
        assert_eq!(dns.iter().collect::<HashSet<_>>().len(), all.len());
    }

    #[tokio::test]
    async fn listing_users_filters_and_projects() {
        let mut directory = MemoryDirectory::with_dns(&["ou=users,dc=example,dc=org"]);
        directory.insert(user_entry("alice", &[("runAsUser", &["1000"])]));
        directory.insert(user_entry("bob", &[("supplementalGroups", &["5", "6"])]));

        let users = list_users(&mut directory, "ou=users,dc=example,dc=org")
            .await
            .unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].uid, "alice");
        assert_eq!(users[0].cn, "ALICE");
        assert_eq!(users[0].run_as_user, Some(1000));
        assert_eq!(users[0].supplemental_groups, None);
        assert_eq!(users[1].supplemental_groups, Some(vec![5, 6]));
    }

    #[tokio::test]
    async fn find_user_matches_on_uid() {
        let mut directory = MemoryDirectory::default();
        directory.insert(user_entry("alice", &[]));
        directory.insert(user_entry("bob", &[]));

        let bob = find_user(&mut directory, "ou=users,dc=example,dc=org", "bob")
            .await
            .unwrap();
        assert_eq!(bob.map(|u| u.uid), Some("bob".to_string()));
        let nobody = find_user(&mut directory, "ou=users,dc=example,dc=org", "carol")
            .await
            .unwrap();
        assert!(nobody.is_none());
    }

    #[test]
    fn text_output_has_one_block_per_user() {
        let users = vec![UserRecord {
            uid: "alice".to_string(),
            run_as_user: Some(1000),
            supplemental_groups: Some(vec![100, 101]),
            ..Default::default()
        }];
        let text = render_users(&users, OutputFormat::Text).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "User Details:");
        assert_eq!(lines[1], "uid: alice");
        assert!(lines.contains(&"runAsUser: 1000"));
        assert!(lines.contains(&"runAsGroup: "));
        assert!(lines.contains(&"supplementalGroups: [100, 101]"));
        assert_eq!(lines.last(), Some(&"-".repeat(40).as_str()));
        assert_eq!(lines.len(), 2 + LISTED_ATTRIBUTES.len());
    }

    #[test]
    fn structured_output_wraps_users() {
        let users = vec![UserRecord {
            uid: "alice".to_string(),
            run_as_user: Some(1000),
            ..Default::default()
        }];
        let yaml = render_users(&users, OutputFormat::Yaml).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed["users"][0]["uid"].as_str(), Some("alice"));
        assert_eq!(parsed["users"][0]["runAsUser"].as_i64(), Some(1000));
        assert!(parsed["users"][0].get("fsGroup").is_none());

        let json = render_users(&users, OutputFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["users"][0]["telephoneNumber"], "");
    }

    #[test]
    fn empty_listing_still_renders_a_document() {
        let yaml = render_users(&[], OutputFormat::Yaml).unwrap();
        assert_eq!(yaml.trim(), "users: []");
        assert_eq!(render_users(&[], OutputFormat::Text).unwrap(), "");
    }
}
