pub mod rebalance;
pub mod validator;

pub use rebalance::{allocate_capital, check_rebalance_need, Opportunity, RebalanceConfig, RebalanceSignal};
pub use validator::{CapitalRiskValidator, RiskConfig, SizingOutcome};
