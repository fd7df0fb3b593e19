// src/transaction/mod.rs

//! Transactions: the generic state machine, the operation and callback
//! traits it is parameterized by, and the outcome vocabulary.

pub mod machine;
pub mod operation;
pub mod outcome;
pub mod state;

pub use machine::Transaction;
pub use operation::{IOperation, ITransactionClient, Reply};
pub use outcome::{ClientFailure, IOutcome};
pub use state::TransactionState;
