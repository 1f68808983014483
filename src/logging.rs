use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::LevelFilter;
use log4rs::{
    append::console::{ConsoleAppender, Target},
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
};

use crate::error::Error;

const CONSOLE_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} {h({l:<5})} {t} - {m}{n}";

/// A unique identifier for a particular board operation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct OperationId(pub usize);

impl Display for OperationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl OperationId {
    /// Atomically get the next ID. This wraps around back to zero if you somehow exceed a usize.
    pub fn next() -> OperationId {
        static OPERATION_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);
        OperationId(OPERATION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Log the start of an operation and return its ID.
    pub fn start(operation: &str, detail: impl Display) -> OperationId {
        let id = Self::next();
        info!("->op{id} {operation} {detail}");
        id
    }

    /// Log the outcome of an operation, picking the level from the error class.
    pub fn finish<T>(self, operation: &str, result: &Result<T, Error>) {
        match result {
            Ok(_) => info!("<-op{self} {operation} ok"),
            Err(err) if err.is_client_error() => warn!("<-op{self} {operation} {err}"),
            Err(err) => error!("<-op{self} {operation} {err}"),
        }
    }
}

/// Initialise logging from a log4rs YAML file.
pub fn init_file(path: impl AsRef<Path>) -> Result<(), Error> {
    log4rs::init_file(path, Default::default())
        .map_err(|e| Error::Storage(format!("failed to initialise logging: {e}")))
}

/// Initialise logging to stderr at the given level.
pub fn init_console(level: LevelFilter) -> Result<(), Error> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(CONSOLE_PATTERN)))
        .build();
    let config = log4rs::Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .map_err(|e| Error::Storage(format!("bad logging config: {e}")))?;
    log4rs::init_config(config)
        .map(|_| ())
        .map_err(|e| Error::Storage(format!("failed to initialise logging: {e}")))
}
