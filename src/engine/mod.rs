pub mod backtest;
pub mod metrics;
pub mod portfolio;

pub use backtest::{BacktestConfig, BacktestEngine, BacktestResult, EquityPoint};
pub use metrics::{PerformanceReport, Stat};
pub use portfolio::{EngineError, Fill, SimulatedPortfolio};
