pub mod report;
pub mod runner;

pub use report::BacktestReport;
pub use runner::{BacktestResult, BacktestRunner, EquityPoint};
