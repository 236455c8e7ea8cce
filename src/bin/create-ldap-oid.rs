//! print a freshly generated OID below the `2.25` arc and the UUID it encodes

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::process::ExitCode;

use clap::Parser;
use ldap_housekeeping::cli::LogArgs;
use ldap_housekeeping::oid::generate_oid;

/// Generate a globally unique OID from a random UUID
#[derive(Debug, Parser)]
#[command(name = "create-ldap-oid", version)]
struct Args {
    /// How many OIDs to generate
    #[arg(long, short = 'n', default_value_t = 1)]
    count: usize,

    #[command(flatten)]
    log: LogArgs,
}

fn main() -> ExitCode {
    let args = Args::parse();
    args.log.init_tracing();
    for _ in 0..args.count {
        let generated = generate_oid();
        tracing::debug!("Generated {:?}", generated);
        println!("{}", generated);
    }
    ExitCode::SUCCESS
}
