//! Parity harness between the batch backtest path and a streaming replay
//! that mirrors how decisions are made in production: one bar arrives at a
//! time and the decision maker only ever sees history up to that bar.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::engine::{BacktestConfig, BacktestEngine};
use crate::policy::ThresholdTable;
use crate::regime::{RegimeClassifier, RegimeThresholds};
use crate::risk::{CapitalRiskValidator, RiskConfig};
use crate::strategies::{DecisionMaker, SimulatedLlmDecisionMaker};
use crate::types::{Action, BarSeries, Decision, DecisionRecord, MarketSnapshot};

/// Minimum decision match rate for the simulated maker to count as a valid
/// stand-in for the live one.
pub const ALIGNMENT_ACCEPTANCE: f64 = 0.85;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("decision logs differ in length: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("nothing to compare: empty decision logs")]
    Empty,
    #[error(transparent)]
    Engine(#[from] crate::engine::EngineError),
}

/// Index-aligned comparison of two decision logs over the same bars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentReport {
    pub bars: usize,
    pub decision_matches: usize,
    pub regime_matches: usize,
    pub decision_match_rate: f64,
    pub regime_match_rate: f64,
    pub mean_confidence_delta: f64,
    pub accepted: bool,
}

/// Compare two decision logs bar for bar. Both logs must cover the same
/// bars in the same order.
pub fn compare(
    reference: &[DecisionRecord],
    candidate: &[DecisionRecord],
) -> Result<AlignmentReport, ValidationError> {
    if reference.len() != candidate.len() {
        return Err(ValidationError::LengthMismatch {
            left: reference.len(),
            right: candidate.len(),
        });
    }
    if reference.is_empty() {
        return Err(ValidationError::Empty);
    }

    let bars = reference.len();
    let mut decision_matches = 0usize;
    let mut regime_matches = 0usize;
    let mut confidence_delta_sum = 0.0f64;
    for (a, b) in reference.iter().zip(candidate.iter()) {
        if a.action == b.action {
            decision_matches += 1;
        }
        if a.regime == b.regime {
            regime_matches += 1;
        }
        confidence_delta_sum += (a.confidence - b.confidence).abs();
    }

    let decision_match_rate = decision_matches as f64 / bars as f64;
    let regime_match_rate = regime_matches as f64 / bars as f64;
    Ok(AlignmentReport {
        bars,
        decision_matches,
        regime_matches,
        decision_match_rate,
        regime_match_rate,
        mean_confidence_delta: confidence_delta_sum / bars as f64,
        accepted: decision_match_rate >= ALIGNMENT_ACCEPTANCE,
    })
}

/// Streaming replay: bars are appended one at a time and every decision is
/// made against the prefix available so far, the way the production loop
/// sees the market. Trades are applied so portfolio-dependent behavior
/// evolves the same way it would live.
fn streaming_decisions(
    config: &BacktestConfig,
    risk_config: RiskConfig,
    thresholds: RegimeThresholds,
    series: &BarSeries,
) -> Result<Vec<DecisionRecord>, ValidationError> {
    let asset = config.asset;
    let classifier = RegimeClassifier::new(thresholds);
    let mut validator = CapitalRiskValidator::new(risk_config);
    let mut maker: Box<dyn DecisionMaker> = Box::new(SimulatedLlmDecisionMaker::new(
        ThresholdTable::default(),
        config.seed,
    ));
    let mut portfolio = crate::engine::SimulatedPortfolio::new(
        config.initial_capital,
        config.fee_rate,
        config.slippage_rate,
    );

    let mut window = BarSeries::default();
    let mut records = Vec::with_capacity(series.len());
    for bar in &series.bars {
        window.bars.push(bar.clone());
        let index = window.len() - 1;
        let price = bar.close;
        let state = portfolio.state_view(asset, price);

        let decision = match MarketSnapshot::from_series(&window, index, asset) {
            Some(snapshot) => {
                let regime = classifier.classify_snapshot(&snapshot);
                maker
                    .decide(&snapshot, bar, regime, &state)
                    .unwrap_or_else(|e| Decision::safe_hold(format!("decision maker failed: {}", e)))
            }
            None => Decision::safe_hold("no market snapshot".to_string()),
        };

        let mut risk_reason = None;
        if decision.action != Action::Hold {
            let requested = proposed_size(&state, &decision, config.base_trade_pct);
            let outcome =
                validator.validate(decision.action, asset, &state, requested, bar.timestamp);
            if outcome.is_approved() {
                let applied = match decision.action {
                    Action::Buy => portfolio.apply_buy(asset, outcome.approved, price),
                    Action::Sell => portfolio.apply_sell(asset, outcome.approved, price),
                    Action::Hold => unreachable!(),
                };
                if applied.is_ok() {
                    validator.note_trade(asset, outcome.approved, bar.timestamp);
                }
            } else {
                risk_reason = Some(outcome.reason);
            }
        }

        records.push(DecisionRecord {
            index,
            timestamp: bar.timestamp,
            asset,
            price,
            action: decision.action,
            confidence: decision.confidence,
            regime: decision.regime,
            strategy: decision.primary_strategy,
            risk_reason,
        });
    }
    Ok(records)
}

fn proposed_size(
    state: &crate::types::PortfolioState,
    decision: &Decision,
    base_trade_pct: f64,
) -> Decimal {
    let scale = (base_trade_pct / 100.0) * (decision.confidence / 100.0) * decision.size_multiplier;
    (state.total_value() * Decimal::try_from(scale).unwrap_or(Decimal::ZERO)).round_dp(2)
}

/// Run the batch path and the streaming path over the same bars with
/// identically seeded decision makers and compare the decision logs.
pub fn run_alignment(
    config: &BacktestConfig,
    risk_config: &RiskConfig,
    thresholds: &RegimeThresholds,
    series: &BarSeries,
) -> Result<AlignmentReport, ValidationError> {
    let mut engine = BacktestEngine::new(
        config.clone(),
        RegimeClassifier::new(thresholds.clone()),
        CapitalRiskValidator::new(risk_config.clone()),
        Box::new(SimulatedLlmDecisionMaker::new(
            ThresholdTable::default(),
            config.seed,
        )),
    );
    let batch = engine.run(series)?;
    let streamed = streaming_decisions(config, risk_config.clone(), thresholds.clone(), series)?;
    let report = compare(&batch.decisions, &streamed)?;
    info!(
        "alignment: {:.1}% decision match, {:.1}% regime match over {} bars",
        report.decision_match_rate * 100.0,
        report.regime_match_rate * 100.0,
        report.bars
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::generate_synthetic_series;
    use crate::regime::Regime;
    use crate::strategies::StrategyKind;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn record(index: usize, action: Action, confidence: f64, regime: Regime) -> DecisionRecord {
        DecisionRecord {
            index,
            timestamp: Utc.timestamp_opt(1_700_000_000 + index as i64 * 3600, 0).unwrap(),
            asset: crate::types::Asset::BTC,
            price: dec!(30000),
            action,
            confidence,
            regime,
            strategy: StrategyKind::LlmStrategy,
            risk_reason: None,
        }
    }

    #[test]
    fn test_identical_logs_fully_match() {
        let log: Vec<DecisionRecord> = (0..10)
            .map(|i| record(i, Action::Hold, 40.0, Regime::Ranging))
            .collect();
        let report = compare(&log, &log.clone()).unwrap();
        assert_eq!(report.decision_match_rate, 1.0);
        assert_eq!(report.regime_match_rate, 1.0);
        assert_eq!(report.mean_confidence_delta, 0.0);
        assert!(report.accepted);
    }

    #[test]
    fn test_partial_match_below_threshold_is_rejected() {
        let reference: Vec<DecisionRecord> = (0..10)
            .map(|i| record(i, Action::Buy, 80.0, Regime::Trending))
            .collect();
        let candidate: Vec<DecisionRecord> = (0..10)
            .map(|i| {
                let action = if i < 8 { Action::Hold } else { Action::Buy };
                record(i, action, 60.0, Regime::Trending)
            })
            .collect();
        let report = compare(&reference, &candidate).unwrap();
        assert_eq!(report.decision_match_rate, 0.2);
        assert!(!report.accepted);
        assert_eq!(report.mean_confidence_delta, 20.0);
    }

    #[test]
    fn test_length_mismatch_is_an_error() {
        let a = vec![record(0, Action::Hold, 40.0, Regime::Ranging)];
        let err = compare(&a, &[]).unwrap_err();
        assert!(matches!(err, ValidationError::LengthMismatch { .. }));
    }

    #[test]
    fn test_empty_logs_are_an_error() {
        assert!(matches!(compare(&[], &[]), Err(ValidationError::Empty)));
    }

    #[test]
    fn test_batch_and_streaming_paths_align() {
        let series = generate_synthetic_series(42);
        let config = BacktestConfig::default();
        let report = run_alignment(
            &config,
            &RiskConfig::default(),
            &RegimeThresholds::default(),
            &series,
        )
        .unwrap();
        assert_eq!(report.bars, series.len());
        assert!(report.accepted, "decision match rate {}", report.decision_match_rate);
        assert_eq!(report.decision_match_rate, 1.0);
        assert_eq!(report.regime_match_rate, 1.0);
        assert_eq!(report.mean_confidence_delta, 0.0);
    }
}
