//! print the DN of every entry below a search base

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::process::ExitCode;

use clap::Parser;
use ldap_housekeeping::cli::{exit_code, ConnectArgs, Failure, LogArgs};
use ldap_housekeeping::list::list_dns;
use ldap_housekeeping::{connect, LdapDirectory, Session};

/// Retrieve all Distinguished Names (DNs) from an LDAP server
#[derive(Debug, Parser)]
#[command(name = "get-ldap-dn", version)]
struct Args {
    /// Base DN where the search starts
    #[arg(long, default_value = "dc=example,dc=org")]
    search_base: String,

    #[command(flatten)]
    connect: ConnectArgs,

    #[command(flatten)]
    log: LogArgs,
}

/// connect and collect the DNs, the opened connection is left in `session`
async fn run(args: &Args, session: &mut Session<LdapDirectory>) -> Result<Vec<String>, Failure> {
    let parameters = args.connect.resolve().map_err(|err| {
        println!("Configuration error: {}", err);
        Failure::Configuration
    })?;
    let directory = match connect(&parameters).await {
        Ok(directory) => session.attach(directory),
        Err(err) => {
            println!("LDAP error: {}", err);
            return Err(Failure::Directory);
        }
    };
    list_dns(directory, &args.search_base).await.map_err(|err| {
        println!("LDAP error: {}", err);
        Failure::Directory
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    args.log.init_tracing();
    let mut session = Session::new();
    let result = run(&args, &mut session).await;
    session.release().await;
    exit_code(result.map(|dns| {
        for dn in dns {
            println!("{}", dn);
        }
    }))
}
