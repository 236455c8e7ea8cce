//! command line arguments and process plumbing shared by the programs

use std::fmt::Debug;
use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use crate::config::{
    default_connect_parameters, openldap_connect_parameters, toml_connect_parameters,
    ConfigError, ConnectParameters, ConnectParametersBuilder,
};

/// how to reach and authenticate against the LDAP server
#[derive(Clone, Default, clap::Args)]
pub struct ConnectArgs {
    /// LDAP server URL, e.g. ldap://localhost
    #[arg(long, env = "LDAP_SERVER")]
    pub ldap_server: Option<String>,

    /// Bind DN for LDAP authentication [default: cn=admin,dc=example,dc=org]
    #[arg(long, env = "LDAP_BIND_DN")]
    pub bind_dn: Option<String>,

    /// Password for the bind DN
    #[arg(long, env = "LDAP_BIND_PASSWORD", hide_env_values = true)]
    pub bind_password: Option<String>,

    /// TOML file with url, bind_dn and bind_password keys
    #[arg(long, env = "LDAP_HOUSEKEEPING_CONFIG")]
    pub config: Option<PathBuf>,

    /// Do not read URI and BINDDN from ldap.conf and ~/.ldaprc
    #[arg(long)]
    pub no_openldap_config: bool,
}

impl Debug for ConnectArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectArgs")
            .field("ldap_server", &self.ldap_server)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &self.bind_password.as_ref().map(|_| "<redacted>"))
            .field("config", &self.config)
            .field("no_openldap_config", &self.no_openldap_config)
            .finish()
    }
}

impl ConnectArgs {
    /// combine OpenLDAP config, config file, command line and defaults into
    /// the parameters to connect with
    pub fn resolve(&self) -> Result<ConnectParameters, ConfigError> {
        let mut builder = ConnectParametersBuilder::default();
        if !self.no_openldap_config {
            openldap_connect_parameters(&mut builder)?;
        }
        if let Some(path) = &self.config {
            toml_connect_parameters(path)?.apply(&mut builder);
        }
        if let Some(url) = &self.ldap_server {
            builder.url(url.to_owned());
        }
        if let Some(bind_dn) = &self.bind_dn {
            builder.bind_dn(bind_dn.to_owned());
        }
        if let Some(bind_password) = &self.bind_password {
            builder.bind_password(bind_password.to_owned());
        }
        default_connect_parameters(&mut builder);
        Ok(builder.build()?)
    }
}

/// logging verbosity
#[derive(Debug, Clone, Default, clap::Args)]
pub struct LogArgs {
    /// More log output on stderr, repeat for more (RUST_LOG overrides this)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl LogArgs {
    /// the filter directive used when RUST_LOG is not set
    pub fn default_directive(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// install the global tracing subscriber, logging to stderr so stdout
    /// only carries the program's output
    pub fn init_tracing(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.default_directive()));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// why a program ended unsuccessfully, each maps to its own exit code
///
/// usage errors are reported by clap with exit code 2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// connecting, binding or a directory operation failed
    Directory,
    /// the connection parameters could not be assembled
    Configuration,
    /// the input file could not be read or is invalid
    Input,
}

impl Failure {
    /// the process exit code for this failure
    pub fn code(self) -> u8 {
        match self {
            Failure::Directory => 1,
            Failure::Configuration => 3,
            Failure::Input => 4,
        }
    }
}

impl From<Failure> for ExitCode {
    fn from(failure: Failure) -> Self {
        ExitCode::from(failure.code())
    }
}

/// exit code for the result of a program run
pub fn exit_code(result: Result<(), Failure>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => failure.into(),
    }
}
