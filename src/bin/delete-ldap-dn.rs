//! delete a single LDAP entry specified by DN

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::process::ExitCode;

use clap::Parser;
use ldap_housekeeping::cli::{exit_code, ConnectArgs, Failure, LogArgs};
use ldap_housekeeping::delete::{delete_entry, DeleteOutcome};
use ldap_housekeeping::{connect, Directory, LdapDirectory, Session};

/// Delete a single LDAP entry specified by DN
#[derive(Debug, Parser)]
#[command(name = "delete-ldap-dn", version)]
struct Args {
    /// The DN of the LDAP entry to delete
    dn: String,

    /// Let the server check the delete without performing it
    #[arg(long)]
    noop: bool,

    #[command(flatten)]
    connect: ConnectArgs,

    #[command(flatten)]
    log: LogArgs,
}

/// connect and delete, the opened connection is left in `session`
async fn run(args: &Args, session: &mut Session<LdapDirectory>) -> Result<(), Failure> {
    let parameters = args.connect.resolve().map_err(|err| {
        println!("Configuration error: {}", err);
        Failure::Configuration
    })?;
    let directory = match connect(&parameters).await {
        Ok(directory) => session.attach(directory.with_noop(args.noop)),
        Err(err) => {
            println!("Error deleting DN {}: {}", args.dn, err);
            return Err(Failure::Directory);
        }
    };
    match delete_entry(directory, &args.dn).await {
        Ok(DeleteOutcome::Deleted) => {
            if directory.is_noop() {
                println!("Successfully deleted DN: {} (noop)", args.dn);
            } else {
                println!("Successfully deleted DN: {}", args.dn);
            }
            Ok(())
        }
        Ok(DeleteOutcome::NotFound) => {
            println!("No such entry: {}", args.dn);
            Ok(())
        }
        Err(err) => {
            println!("Error deleting DN {}: {}", args.dn, err);
            Err(Failure::Directory)
        }
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
