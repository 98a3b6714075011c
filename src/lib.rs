pub mod rbs;
pub mod sim;
pub mod backtest;
pub mod persistence;
