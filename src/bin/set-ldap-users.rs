//! create or update LDAP user entries from a YAML file

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ldap_housekeeping::cli::{exit_code, ConnectArgs, Failure, LogArgs};
use ldap_housekeeping::upsert::upsert_users;
use ldap_housekeeping::user::load_users;
use ldap_housekeeping::{connect, LdapDirectory, Session};

/// Create LDAP users from a YAML file
#[derive(Debug, Parser)]
#[command(name = "set-ldap-users", version)]
struct Args {
    /// Path to YAML file with user data
    yaml_file: PathBuf,

    /// Base DN where the users will be created
    #[arg(long, default_value = "ou=users,dc=example,dc=org")]
    base_dn: String,

    /// Let the server check the changes without applying them
    #[arg(long)]
    noop: bool,

    #[command(flatten)]
    connect: ConnectArgs,

    #[command(flatten)]
    log: LogArgs,
}

/// load the users, connect and upsert them, the opened connection is left in `session`
async fn run(args: &Args, session: &mut Session<LdapDirectory>) -> Result<(), Failure> {
    let users = load_users(&args.yaml_file).map_err(|err| {
        println!(
            "Error loading users from {}: {}",
            args.yaml_file.display(),
            err
        );
        Failure::Input
    })?;
    let parameters = args.connect.resolve().map_err(|err| {
        println!("Configuration error: {}", err);
        Failure::Configuration
    })?;
    let directory = match connect(&parameters).await {
        Ok(directory) => session.attach(directory.with_noop(args.noop)),
        Err(err) => {
            println!("LDAP error: {}", err);
            return Err(Failure::Directory);
        }
    };
    let report = upsert_users(directory, &users, &args.base_dn, |result| {
        println!("{}", result)
    })
    .await;
    if report.is_success() {
        Ok(())
    } else {
        Err(Failure::Directory)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    args.log.init_tracing();
    let mut session = Session::new();
    let result = run(&args, &mut session).await;
    session.release().await;
    exit_code(result)
}
