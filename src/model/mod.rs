pub mod ballot;
pub mod db;
pub mod election;
pub mod id;
pub mod tally;
pub mod token;
pub mod trustee;
