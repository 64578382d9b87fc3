//! Infrastructure layer: the stock movement ledger and its storage backends.

pub mod ledger;
pub mod retry;

pub use ledger::{
    InMemoryLedger, LedgerError, MovementLedger, MovementQuery, PostgresLedger,
    PostgresLedgerOptions,
};
pub use retry::{RetryPolicy, with_retry};
