use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::policy::ThresholdTable;
use crate::regime::Regime;
use crate::types::{Action, Bar, Decision, MarketSnapshot, PortfolioState, RiskAssessment};

use super::{DecisionMaker, StrategyKind, StrategyVote};

/// Stands in for the live LLM-backed decision maker. Evaluates every strategy
/// rule engine, resolves the primary strategy through the regime priority
/// list, and gates it on the regime-conditioned confidence floors.
///
/// The seed is an explicit constructor parameter: two independently
/// constructed instances with the same seed produce identical output for
/// identical input, which the parity harness depends on.
pub struct SimulatedLlmDecisionMaker {
    policy: ThresholdTable,
    rng: StdRng,
    trading_style: String,
}

impl SimulatedLlmDecisionMaker {
    pub fn new(policy: ThresholdTable, seed: u64) -> Self {
        Self {
            policy,
            rng: StdRng::seed_from_u64(seed),
            trading_style: "regime_adaptive".to_string(),
        }
    }

    fn assess_risk(&self, regime: Regime, portfolio: &PortfolioState) -> RiskAssessment {
        let base = match regime {
            Regime::Volatile => RiskAssessment::High,
            Regime::Trending => RiskAssessment::Medium,
            Regime::Ranging => RiskAssessment::Low,
        };
        // A thin cash buffer raises the risk read one notch.
        if portfolio.eur_reserve_pct() < 15.0 {
            return match base {
                RiskAssessment::Low => RiskAssessment::Medium,
                _ => RiskAssessment::High,
            };
        }
        base
    }

    fn evaluate_all(&mut self, snapshot: &MarketSnapshot, bar: &Bar) -> Vec<(StrategyKind, StrategyVote)> {
        // Fixed evaluation order keeps the jitter draws reproducible.
        StrategyKind::all()
            .into_iter()
            .map(|kind| {
                let mut vote = kind.evaluate(snapshot, bar);
                let jitter: f64 = self.rng.gen_range(-2.0..=2.0);
                vote.confidence = (vote.confidence + jitter).clamp(0.0, 100.0);
                (kind, vote)
            })
            .collect()
    }
}

impl DecisionMaker for SimulatedLlmDecisionMaker {
    fn decide(
        &mut self,
        snapshot: &MarketSnapshot,
        bar: &Bar,
        regime: Regime,
        portfolio: &PortfolioState,
    ) -> Result<Decision> {
        let votes = self.evaluate_all(snapshot, bar);
        let risk_assessment = self.assess_risk(regime, portfolio);

        let winner = self
            .policy
            .strategy_priority(regime)
            .into_iter()
            .filter_map(|kind| {
                let (_, vote) = votes.iter().find(|(k, _)| *k == kind)?;
                let side = vote.action.side()?;
                let floor = self.policy.min_confidence(regime, kind, side);
                if vote.confidence >= floor {
                    Some((kind, vote.clone(), floor))
                } else {
                    debug!(
                        "{} vote {} at {:.1} below {} floor {:.0}",
                        kind, vote.action, vote.confidence, regime, floor
                    );
                    None
                }
            })
            .next();

        let decision = match winner {
            Some((kind, vote, floor)) => Decision {
                action: vote.action,
                confidence: vote.confidence,
                reasoning: vec![
                    format!("market regime: {}", regime),
                    vote.rationale,
                    format!(
                        "{} cleared its {} floor ({:.1} >= {:.0})",
                        kind, regime, vote.confidence, floor
                    ),
                ],
                risk_assessment,
                simulated: true,
                trading_style: self.trading_style.clone(),
                regime,
                primary_strategy: kind,
                size_multiplier: if regime == Regime::Volatile { 0.75 } else { 1.0 },
            },
            None => {
                // Nothing cleared its bar: hold, attributed to the most
                // confident voter.
                let (kind, vote) = votes
                    .iter()
                    .max_by(|a, b| {
                        a.1.confidence
                            .partial_cmp(&b.1.confidence)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|(k, v)| (*k, v.clone()))
                    .unwrap_or((
                        StrategyKind::LlmStrategy,
                        StrategyVote::hold(0.0, "no votes"),
                    ));
                Decision {
                    action: Action::Hold,
                    confidence: vote.confidence,
                    reasoning: vec![
                        format!("market regime: {}", regime),
                        format!("no strategy cleared its {} confidence floor", regime),
                        vote.rationale,
                    ],
                    risk_assessment,
                    simulated: true,
                    trading_style: self.trading_style.clone(),
                    regime,
                    primary_strategy: kind,
                    size_multiplier: 1.0,
                }
            }
        };

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{columns, Asset, BalanceEntry, EUR, PORTFOLIO_VALUE_KEY};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot {
            asset: Asset::BTC,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            current_price: dec!(30000),
            price_change_1h_pct: 0.6,
            price_change_24h_pct: 5.0,
            price_change_5d_pct: 10.0,
            bb_width_pct: 3.0,
        }
    }

    fn bar() -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            open: dec!(30000),
            high: dec!(30000),
            low: dec!(30000),
            close: dec!(30000),
            volume: dec!(10),
            indicators: [
                (columns::SMA_20.to_string(), 30500.0),
                (columns::SMA_50.to_string(), 30000.0),
                (columns::MACD.to_string(), 25.0),
                (columns::MACD_SIGNAL.to_string(), 10.0),
                (columns::RSI_14.to_string(), 66.0),
            ]
            .into_iter()
            .collect(),
        }
    }

    fn portfolio() -> PortfolioState {
        let mut state = PortfolioState::new();
        state.set(EUR, BalanceEntry::amount(dec!(5000)));
        state.set("BTC", BalanceEntry::with_price(dec!(0.1), dec!(30000)));
        state.set(PORTFOLIO_VALUE_KEY, BalanceEntry::amount(dec!(8000)));
        state
    }

    #[test]
    fn test_same_seed_is_fully_interchangeable() {
        let mut a = SimulatedLlmDecisionMaker::new(ThresholdTable::default(), 42);
        let mut b = SimulatedLlmDecisionMaker::new(ThresholdTable::default(), 42);
        for _ in 0..50 {
            let da = a
                .decide(&snapshot(), &bar(), Regime::Trending, &portfolio())
                .unwrap();
            let db = b
                .decide(&snapshot(), &bar(), Regime::Trending, &portfolio())
                .unwrap();
            assert_eq!(
                serde_json::to_string(&da).unwrap(),
                serde_json::to_string(&db).unwrap()
            );
        }
    }

    #[test]
    fn test_different_seeds_can_diverge() {
        let mut a = SimulatedLlmDecisionMaker::new(ThresholdTable::default(), 1);
        let mut b = SimulatedLlmDecisionMaker::new(ThresholdTable::default(), 2);
        let da = a
            .decide(&snapshot(), &bar(), Regime::Trending, &portfolio())
            .unwrap();
        let db = b
            .decide(&snapshot(), &bar(), Regime::Trending, &portfolio())
            .unwrap();
        assert_ne!(da.confidence, db.confidence);
    }

    #[test]
    fn test_trending_regime_picks_trend_follower() {
        // Strong MA alignment clears the low trending floor (55 buy).
        let mut sim = SimulatedLlmDecisionMaker::new(ThresholdTable::default(), 7);
        let decision = sim
            .decide(&snapshot(), &bar(), Regime::Trending, &portfolio())
            .unwrap();
        assert_eq!(decision.action, Action::Buy);
        assert_eq!(decision.primary_strategy, StrategyKind::TrendFollowing);
        assert!(decision.simulated);
        assert!(!decision.reasoning.is_empty());
    }

    #[test]
    fn test_no_clear_vote_holds() {
        let mut sim = SimulatedLlmDecisionMaker::new(ThresholdTable::default(), 7);
        let flat = MarketSnapshot {
            price_change_1h_pct: 0.0,
            price_change_24h_pct: 0.0,
            price_change_5d_pct: 0.0,
            bb_width_pct: 1.0,
            ..snapshot()
        };
        let neutral_bar = Bar {
            indicators: [(columns::RSI_14.to_string(), 50.0)].into_iter().collect(),
            ..bar()
        };
        let decision = sim
            .decide(&flat, &neutral_bar, Regime::Ranging, &portfolio())
            .unwrap();
        assert_eq!(decision.action, Action::Hold);
    }

    #[test]
    fn test_volatile_regime_raises_risk_and_trims_size() {
        let mut sim = SimulatedLlmDecisionMaker::new(ThresholdTable::default(), 3);
        let decision = sim
            .decide(&snapshot(), &bar(), Regime::Volatile, &portfolio())
            .unwrap();
        assert_eq!(decision.risk_assessment, RiskAssessment::High);
        if decision.action != Action::Hold {
            assert_eq!(decision.size_multiplier, 0.75);
        }
    }

    #[test]
    fn test_thin_reserve_raises_risk() {
        let mut state = PortfolioState::new();
        state.set(EUR, BalanceEntry::amount(dec!(100)));
        state.set("BTC", BalanceEntry::with_price(dec!(0.1), dec!(30000)));
        state.set(PORTFOLIO_VALUE_KEY, BalanceEntry::amount(dec!(3100)));
        let mut sim = SimulatedLlmDecisionMaker::new(ThresholdTable::default(), 3);
        let decision = sim
            .decide(&snapshot(), &bar(), Regime::Ranging, &state)
            .unwrap();
        assert_eq!(decision.risk_assessment, RiskAssessment::Medium);
    }
}
