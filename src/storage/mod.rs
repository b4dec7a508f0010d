mod audit;
mod bookings;
mod disputes;
mod ledger;
mod repository;
mod settings;
mod withdrawals;

pub use audit::AuditFilter;
pub use ledger::LedgerTransition;
pub use repository::*;
pub use withdrawals::WithdrawalTransition;

/// SQL migration for initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// SQL migration for payments captured on bookings that cannot take them
pub const MIGRATION_002_ORPHAN_CAPTURES: &str = include_str!("migrations/002_orphan_captures.sql");
