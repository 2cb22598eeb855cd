//! Persistence layer: the CSV decision ledger.

pub mod ledger;

pub use ledger::{CsvLedger, LEDGER_HEADER, LedgerEntry};
