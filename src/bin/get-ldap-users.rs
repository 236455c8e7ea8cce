//! print the user entries below a search base

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::process::ExitCode;

use clap::Parser;
use ldap_housekeeping::cli::{exit_code, ConnectArgs, Failure, LogArgs};
use ldap_housekeeping::list::{find_user, list_users, render_users, OutputFormat};
use ldap_housekeeping::user::UserRecord;
use ldap_housekeeping::{connect, LdapDirectory, Session};

/// Retrieve and display details for all users in the LDAP directory
#[derive(Debug, Parser)]
#[command(name = "get-ldap-users", version)]
struct Args {
    /// Base DN where the search starts
    #[arg(long, default_value = "ou=users,dc=example,dc=org")]
    search_base: String,

    /// Output format of the user data
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output_format: OutputFormat,

    /// Only show the user with this uid
    #[arg(long)]
    uid: Option<String>,

    #[command(flatten)]
    connect: ConnectArgs,

    #[command(flatten)]
    log: LogArgs,
}

/// connect and collect the users, the opened connection is left in `session`
async fn run(
    args: &Args,
    session: &mut Session<LdapDirectory>,
) -> Result<Vec<UserRecord>, Failure> {
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
    let users: Result<Vec<UserRecord>, _> = match &args.uid {
        Some(uid) => find_user(directory, &args.search_base, uid)
            .await
            .map(|user| user.into_iter().collect()),
        None => list_users(directory, &args.search_base).await,
    };
    users.map_err(|err| {
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
    let (users, result) = match result {
        Ok(users) => (users, Ok(())),
        Err(Failure::Configuration) => return Failure::Configuration.into(),
        Err(failure) => (Vec::new(), Err(failure)),
    };
    match render_users(&users, args.output_format) {
        Ok(output) => print!("{}", output),
        Err(err) => {
            println!("Error rendering users: {}", err);
            return Failure::Directory.into();
        }
    }
    exit_code(result)
}
