#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate board_test;

pub mod board;
pub mod bulletin;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod model;
pub mod notify;
pub mod tally;

#[cfg(test)]
mod testing;

pub use board::Board;
pub use config::Config;
pub use error::{Error, Result};
