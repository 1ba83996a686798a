// Risk management module
pub mod sizing;

pub use sizing::{required_margin, truncate_to_step, OrderSizing, RiskPolicy};
