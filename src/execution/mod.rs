// Order placement and the position/transaction ledger
pub mod engine;
pub mod ledger;

pub use engine::{ExecutionEngine, ExecutionReport};
pub use ledger::{summarize, Ledger};
