//! connection parameters and where they come from
//!
//! Parameters are collected into a [ConnectParametersBuilder] from several
//! sources, lowest precedence first: the OpenLDAP client config files, an
//! optional TOML file and finally the command line. Anything still missing
//! afterwards is filled in by [default_connect_parameters].

use std::fmt::Debug;
use std::path::{Path, PathBuf};

use derive_builder::Builder;
use dirs2::home_dir;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::instrument;

/// the identity we bind as if no other source names one
pub const DEFAULT_BIND_DN: &str = "cn=admin,dc=example,dc=org";

/// a set of parameters for connecting and binding to an LDAP server
#[derive(Clone, Builder)]
pub struct ConnectParameters {
    /// the LDAP URL to connect to
    pub url: String,
    /// the DN to perform the simple bind as
    pub bind_dn: String,
    /// the password for the simple bind
    pub bind_password: String,
}

impl Debug for ConnectParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectParameters")
            .field("url", &self.url)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &"<redacted>")
            .finish()
    }
}

/// errors which can happen when trying to retrieve connect parameters from openldap config
#[derive(Debug, Error)]
pub enum OpenLdapConnectParameterError {
    /// an I/O error
    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),
}

/// error which can happen while reading connect parameters from a file
#[derive(Debug, Error)]
pub enum TomlConfigError {
    /// an I/O error
    #[error("I/O error reading {path}: {source}")]
    IOError {
        /// the file we tried to read
        path: PathBuf,
        /// the underlying error
        source: std::io::Error,
    },
    /// an error deserializing the TOML file
    #[error("Toml deserialization error in {path}: {source}")]
    TomlError {
        /// the file we tried to parse
        path: PathBuf,
        /// the underlying error
        source: toml::de::Error,
    },
}

/// errors which can happen while assembling the connect parameters
#[derive(Debug, Error)]
pub enum ConfigError {
    /// an error when building the parameters, most likely a value
    /// that could not be retrieved from any config source
    #[error("Parameters builder error: {0}")]
    ParametersBuilderError(#[from] ConnectParametersBuilderError),
    /// an error when trying to retrieve connect parameters from OpenLDAP config files
    #[error("Error retrieving OpenLDAP connect parameters: {0}")]
    OpenLdapConnectParameterError(#[from] OpenLdapConnectParameterError),
    /// an error reading the TOML config file
    #[error("Error reading config file: {0}")]
    TomlConfigError(#[from] TomlConfigError),
}

lazy_static! {
    static ref URI_RE: Regex = Regex::new(r"^\s*URI\s+(\S+)").unwrap();
    static ref BINDDN_RE: Regex = Regex::new(r"^\s*BINDDN\s+(.*\S)\s*$").unwrap();
}

/// apply the `URI` and `BINDDN` settings found in the content of an OpenLDAP
/// client config file (ldap.conf or .ldaprc) to the builder
///
/// `URI` may list several servers, only the first one is used
pub fn parse_openldap_config<'a>(
    content: &str,
    builder: &'a mut ConnectParametersBuilder,
) -> &'a mut ConnectParametersBuilder {
    for line in content.lines() {
        if let Some(url) = URI_RE.captures(line).and_then(|caps| caps.get(1)) {
            tracing::debug!("Extracted URI value {}", url.as_str());
            builder.url(url.as_str().to_string());
        }
        if let Some(bind_dn) = BINDDN_RE.captures(line).and_then(|caps| caps.get(1)) {
            tracing::debug!("Extracted BINDDN value {}", bind_dn.as_str());
            builder.bind_dn(bind_dn.as_str().to_string());
        }
    }
    builder
}

/// the per-user OpenLDAP config file, if the home directory is known
pub fn ldaprc_path() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".ldaprc"))
}

/// try to detect OpenLDAP connect parameters from its config files
/// (ldap.conf in /etc/ldap or /etc/openldap and .ldaprc in the user home dir,
/// the latter taking precedence)
#[instrument(skip(builder))]
pub fn openldap_connect_parameters(
    builder: &mut ConnectParametersBuilder,
) -> Result<&mut ConnectParametersBuilder, OpenLdapConnectParameterError> {
    let mut ldap_conf_filename = Path::new("/etc/ldap/ldap.conf");
    if !ldap_conf_filename.exists() {
        ldap_conf_filename = Path::new("/etc/openldap/ldap.conf");
    }
    if ldap_conf_filename.exists() {
        tracing::debug!("Using ldap.conf at {:?}", ldap_conf_filename);
        let ldap_conf_content = std::fs::read_to_string(ldap_conf_filename)?;
        parse_openldap_config(&ldap_conf_content, builder);
    }
    if let Some(ldap_rc_filename) = ldaprc_path() {
        if ldap_rc_filename.exists() {
            tracing::debug!("Using .ldaprc at {:?}", ldap_rc_filename);
            let ldap_rc_content = std::fs::read_to_string(ldap_rc_filename)?;
            parse_openldap_config(&ldap_rc_content, builder);
        }
    }
    Ok(builder)
}

/// the contents of a TOML config file, every key is optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectParametersFile {
    /// the LDAP URL to connect to
    pub url: Option<String>,
    /// the DN to perform the simple bind as
    pub bind_dn: Option<String>,
    /// the password for the simple bind
    pub bind_password: Option<String>,
}

impl ConnectParametersFile {
    /// copy the values present in the file into the builder
    pub fn apply<'a>(
        &self,
        builder: &'a mut ConnectParametersBuilder,
    ) -> &'a mut ConnectParametersBuilder {
        if let Some(url) = &self.url {
            builder.url(url.to_owned());
        }
        if let Some(bind_dn) = &self.bind_dn {
            builder.bind_dn(bind_dn.to_owned());
        }
        if let Some(bind_password) = &self.bind_password {
            builder.bind_password(bind_password.to_owned());
        }
        builder
    }
}

/// load ldap connect parameters from a toml file
#[instrument]
pub fn toml_connect_parameters(filename: &Path) -> Result<ConnectParametersFile, TomlConfigError> {
    let config = std::fs::read_to_string(filename).map_err(|source| TomlConfigError::IOError {
        path: filename.to_path_buf(),
        source,
    })?;
    toml::from_str(&config).map_err(|source| TomlConfigError::TomlError {
        path: filename.to_path_buf(),
        source,
    })
}

/// fill the builder with hardcoded default parameters
///
/// there is no default for the URL or the password
#[instrument(skip(builder))]
pub fn default_connect_parameters(
    builder: &mut ConnectParametersBuilder,
) -> &mut ConnectParametersBuilder {
    if builder.bind_dn.is_none() {
        builder.bind_dn(DEFAULT_BIND_DN.to_string());
    }
    builder
}
