//! A simple CLI tool for auditing a bulletin storage directory.
//! Every record is re-hashed and compared with the address it is stored
//! under, using the same storage code as the board itself.

use clap::{Arg, ArgAction, ArgMatches, Command};
use log::LevelFilter;

use novavote_board::bulletin::{AuditReport, ContentHash, LocalBackend};
use novavote_board::logging;

const PROGRAM_NAME: &str = "verify-bulletin";

const ABOUT_TEXT: &str = "Verify the integrity of a bulletin board's storage directory.

EXIT CODES:
     0: All records intact.
   255: Ran successfully, but found tampered records.
 Other: Error.";

const STORAGE_PATH: &str = "STORAGE_PATH";

const STORAGE_PATH_HELP: &str = "The bulletin storage directory,\n\
as set by `NOVAVOTE_STORAGE_PATH` on the board";

const HASH: &str = "hash";

const VERBOSE: &str = "verbose";

const LOG_CONFIG: &str = "log-config";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .arg(
            Arg::new(STORAGE_PATH)
                .help(STORAGE_PATH_HELP)
                .action(ArgAction::Set)
                .required(true),
        )
        .arg(
            Arg::new(HASH)
                .long(HASH)
                .help("Only check the record with this address")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new(VERBOSE)
                .short('v')
                .long(VERBOSE)
                .help("Log each tampered record to stderr")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(LOG_CONFIG)
                .long(LOG_CONFIG)
                .help("A log4rs YAML file to configure logging from, instead of --verbose")
                .action(ArgAction::Set),
        )
}

/// Errors that this program may produce.
#[derive(Debug, Eq, PartialEq)]
enum Error {
    /// IO error described by the inner message.
    IO(String),
    /// The `--hash` argument is not a record address.
    Hash(String),
    /// The requested record does not exist.
    Missing(String),
}

/// What was checked, and what was found.
#[derive(Debug, Eq, PartialEq)]
enum Outcome {
    Directory(AuditReport),
    Record { hash: String, intact: bool },
}

impl Outcome {
    fn is_clean(&self) -> bool {
        match self {
            Self::Directory(report) => report.is_clean(),
            Self::Record { intact, .. } => *intact,
        }
    }
}

/// Run verification.
fn verify(path: &str, hash: Option<&str>) -> Result<Outcome, Error> {
    let backend = LocalBackend::existing(path).map_err(|e| Error::IO(e.to_string()))?;
    match hash {
        Some(hash) => {
            let address: ContentHash = hash
                .trim()
                .to_lowercase()
                .parse()
                .map_err(|_| Error::Hash(hash.to_string()))?;
            match backend.check(&address) {
                Ok(intact) => Ok(Outcome::Record {
                    hash: address.to_string(),
                    intact,
                }),
                Err(novavote_board::Error::NotFound(_)) => Err(Error::Missing(address.to_string())),
                Err(e) => Err(Error::IO(e.to_string())),
            }
        }
        None => backend
            .audit()
            .map(Outcome::Directory)
            .map_err(|e| Error::IO(e.to_string())),
    }
}

/// Run verification, report the result, and return the exit code.
fn run(args: &ArgMatches) -> u8 {
    let path: &String = args.get_one(STORAGE_PATH).unwrap(); // Required argument is guaranteed to be present.
    let hash = args.get_one::<String>(HASH).map(String::as_str);
    let setup = match args.get_one::<String>(LOG_CONFIG) {
        Some(file) => Some(logging::init_file(file)),
        None if args.get_flag(VERBOSE) => Some(logging::init_console(LevelFilter::Warn)),
        None => None,
    };
    if let Some(Err(e)) = setup {
        eprintln!("Could not enable logging: {}", e);
    }

    match verify(path, hash) {
        Ok(outcome) => {
            match &outcome {
                Outcome::Directory(report) => {
                    println!(
                        "{} record{} intact, {} tampered.",
                        report.intact,
                        if report.intact != 1 { "s" } else { "" },
                        report.tampered.len()
                    );
                    for hash in &report.tampered {
                        println!("Tampered: {}", hash);
                    }
                    if !report.ignored.is_empty() {
                        println!("Ignored {} unrelated file(s).", report.ignored.len());
                    }
                }
                Outcome::Record { hash, intact: true } => println!("Record {} is intact.", hash),
                Outcome::Record {
                    hash,
                    intact: false,
                } => println!("Record {} has been tampered with.", hash),
            }
            if outcome.is_clean() {
                println!("Verification succeeded.");
                0
            } else {
                println!("Verification failed.");
                255
            }
        }
        Err(Error::IO(msg)) => {
            println!("IO error: {}", msg);
            1
        }
        Err(Error::Hash(hash)) => {
            println!("`{}` is not a record address.", hash);
            1
        }
        Err(Error::Missing(hash)) => {
            println!("No record {} in this directory.", hash);
            1
        }
    }
}

fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args);
    std::process::exit(exit_code.into())
}
