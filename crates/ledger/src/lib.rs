//! Occurrence ledger: the dedup store that guarantees at most one dispatch
//! per (event, occurrence) while the record is live.
//!
//! - [`LedgerStore`]: the atomic check-and-set contract
//! - [`MemoryLedger`]: in-process expiring map for single-instance setups
//! - [`spawn_sweeper`]: background purge of expired records

pub mod error;
pub mod memory;
pub mod sweeper;
pub mod traits;

pub use error::LedgerError;
pub use memory::MemoryLedger;
pub use sweeper::spawn_sweeper;
pub use traits::LedgerStore;
