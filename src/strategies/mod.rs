pub mod rules;
pub mod simulator;

pub use simulator::SimulatedLlmDecisionMaker;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::regime::Regime;
use crate::types::{Action, Bar, Decision, MarketSnapshot, PortfolioState};

/// Closed set of strategies consulted by the decision maker. Resolution goes
/// through the regime priority table rather than string-keyed lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    TrendFollowing,
    Momentum,
    LlmStrategy,
    MeanReversion,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::TrendFollowing => "trend_following",
            StrategyKind::Momentum => "momentum",
            StrategyKind::LlmStrategy => "llm_strategy",
            StrategyKind::MeanReversion => "mean_reversion",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "trend_following" => Some(StrategyKind::TrendFollowing),
            "momentum" => Some(StrategyKind::Momentum),
            "llm_strategy" => Some(StrategyKind::LlmStrategy),
            "mean_reversion" => Some(StrategyKind::MeanReversion),
            _ => None,
        }
    }

    pub fn all() -> [StrategyKind; 4] {
        [
            StrategyKind::TrendFollowing,
            StrategyKind::Momentum,
            StrategyKind::LlmStrategy,
            StrategyKind::MeanReversion,
        ]
    }

    /// Uniform evaluation capability: every strategy reads the same snapshot
    /// and indicator bar and produces an action with a confidence.
    pub fn evaluate(&self, snapshot: &MarketSnapshot, bar: &Bar) -> StrategyVote {
        match self {
            StrategyKind::TrendFollowing => rules::trend_following(snapshot, bar),
            StrategyKind::Momentum => rules::momentum(snapshot, bar),
            StrategyKind::LlmStrategy => rules::llm_composite(snapshot, bar),
            StrategyKind::MeanReversion => rules::mean_reversion(snapshot, bar),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One strategy's view of a bar.
#[derive(Debug, Clone)]
pub struct StrategyVote {
    pub action: Action,
    /// 0..=100
    pub confidence: f64,
    pub rationale: String,
}

impl StrategyVote {
    pub fn hold(confidence: f64, rationale: impl Into<String>) -> Self {
        Self {
            action: Action::Hold,
            confidence,
            rationale: rationale.into(),
        }
    }
}

/// Contract between the backtest engine and whatever produces decisions.
/// The engine only requires this; live and simulated decision makers both
/// implement it.
#[cfg_attr(test, mockall::automock)]
pub trait DecisionMaker {
    fn decide(
        &mut self,
        snapshot: &MarketSnapshot,
        bar: &Bar,
        regime: Regime,
        portfolio: &PortfolioState,
    ) -> Result<Decision>;
}
