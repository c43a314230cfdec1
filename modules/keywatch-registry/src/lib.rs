//! Postgres persistence for the keyword monitor: the subscription registry
//! and the processed-message ledger, implementing the engine's storage
//! traits. Schema migration is idempotent and runs at startup.

pub mod ledger;
pub mod migrate;
pub mod store;

pub use ledger::ProcessedLedger;
pub use store::RegistryStore;
