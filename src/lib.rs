//! Points-based billing ledger.
//!
//! Wallets hold consumable points funded by "cards" (activation-code
//! redemptions, admin gifts, daily check-ins, automatic top-ups). Usage is
//! tracked as a single aggregate counter per wallet; the ledger re-derives
//! which card funded that usage on demand so any card can be frozen or
//! restored without disturbing the rest of the balance.

pub mod config;
pub mod db;
pub mod ledger;
pub mod scheduler;
pub mod telemetry;

pub use db::ledger_common::{ErrorKind, LedgerError};
pub use db::memory_store::MemoryStore;
pub use db::pg_store::PgLedgerStore;
pub use db::point_ledger::PointLedger;
pub use db::store::{LedgerStore, LedgerTx};
