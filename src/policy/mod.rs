use serde::{Deserialize, Serialize};

use crate::regime::Regime;
use crate::strategies::StrategyKind;
use crate::types::Side;

/// Universal fallback for unknown (strategy, regime) combinations.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 70.0;

/// Priority used when a regime label cannot be resolved.
pub const DEFAULT_PRIORITY: [StrategyKind; 4] = [
    StrategyKind::LlmStrategy,
    StrategyKind::TrendFollowing,
    StrategyKind::MeanReversion,
    StrategyKind::Momentum,
];

/// Buy/sell confidence floors for one (regime, strategy) cell.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceFloor {
    pub buy: f64,
    pub sell: f64,
}

impl ConfidenceFloor {
    const fn new(buy: f64, sell: f64) -> Self {
        Self { buy, sell }
    }

    pub fn for_side(&self, side: Side) -> f64 {
        match side {
            Side::Buy => self.buy,
            Side::Sell => self.sell,
        }
    }
}

/// Immutable regime-conditioned policy: per-strategy confidence floors and
/// per-regime strategy priority. Constructed once at startup and passed
/// explicitly wherever thresholds are needed, so tests can substitute
/// alternate tables.
///
/// The hand-tuned defaults encode the policy that trend-followers get the
/// lowest bar in trending markets while mean-reversion needs the highest,
/// that this inverts in ranging markets, and that all bars rise in volatile
/// markets with the volatility-aware strategy prioritized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdTable {
    /// Indexed `[regime][strategy]` in declaration order of both enums.
    floors: [[ConfidenceFloor; 4]; 3],
    priorities: [[StrategyKind; 4]; 3],
}

impl Default for ThresholdTable {
    fn default() -> Self {
        use StrategyKind::*;
        Self {
            floors: [
                // Trending
                [
                    ConfidenceFloor::new(55.0, 50.0), // trend_following
                    ConfidenceFloor::new(60.0, 60.0), // momentum
                    ConfidenceFloor::new(65.0, 60.0), // llm_strategy
                    ConfidenceFloor::new(75.0, 75.0), // mean_reversion
                ],
                // Ranging
                [
                    ConfidenceFloor::new(75.0, 75.0),
                    ConfidenceFloor::new(70.0, 70.0),
                    ConfidenceFloor::new(65.0, 65.0),
                    ConfidenceFloor::new(55.0, 50.0),
                ],
                // Volatile
                [
                    ConfidenceFloor::new(70.0, 65.0),
                    ConfidenceFloor::new(75.0, 70.0),
                    ConfidenceFloor::new(60.0, 55.0),
                    ConfidenceFloor::new(80.0, 80.0),
                ],
            ],
            priorities: [
                [TrendFollowing, Momentum, LlmStrategy, MeanReversion],
                [MeanReversion, LlmStrategy, Momentum, TrendFollowing],
                [LlmStrategy, TrendFollowing, MeanReversion, Momentum],
            ],
        }
    }
}

impl ThresholdTable {
    fn regime_index(regime: Regime) -> usize {
        match regime {
            Regime::Trending => 0,
            Regime::Ranging => 1,
            Regime::Volatile => 2,
        }
    }

    fn strategy_index(strategy: StrategyKind) -> usize {
        match strategy {
            StrategyKind::TrendFollowing => 0,
            StrategyKind::Momentum => 1,
            StrategyKind::LlmStrategy => 2,
            StrategyKind::MeanReversion => 3,
        }
    }

    /// Minimum confidence required for `strategy` to act on `side` in `regime`.
    pub fn min_confidence(&self, regime: Regime, strategy: StrategyKind, side: Side) -> f64 {
        self.floors[Self::regime_index(regime)][Self::strategy_index(strategy)].for_side(side)
    }

    /// Name-keyed lookup; unknown strategy names get the universal default.
    pub fn min_confidence_by_name(&self, regime: Regime, name: &str, side: Side) -> f64 {
        match StrategyKind::from_name(name) {
            Some(strategy) => self.min_confidence(regime, strategy, side),
            None => DEFAULT_MIN_CONFIDENCE,
        }
    }

    /// Ordered list of strategies whose vote wins ties in `regime`.
    pub fn strategy_priority(&self, regime: Regime) -> [StrategyKind; 4] {
        self.priorities[Self::regime_index(regime)]
    }

    /// Name-keyed priority lookup; unknown regime labels get the default order.
    pub fn strategy_priority_by_name(&self, regime: &str) -> [StrategyKind; 4] {
        match regime {
            "trending" => self.strategy_priority(Regime::Trending),
            "ranging" => self.strategy_priority(Regime::Ranging),
            "volatile" => self.strategy_priority(Regime::Volatile),
            _ => DEFAULT_PRIORITY,
        }
    }
}
