pub mod db;

pub use db::{Ledger, RunCounts, RunStatus};
