use tracing::debug;

use super::signal_engine::{Analysis, SignalComponents, SignalEngine};
use super::Strategy;
use crate::config::{MlParams, StrategyConfig};
use crate::market_data::CandleCache;
use crate::models::{Candle, Signal, SignalAction, Timeframe};
use crate::regime::{HeuristicRegimeClassifier, MarketRegime, RegimeClassifier};
use crate::{BotError, Result};

/// Scores how much a signal can be trusted, in [0, 1]
pub trait ConfidenceModel: Send + Sync {
    fn confidence(&self, analysis: &Analysis, candles: &[Candle]) -> f64;
}

/// Mean absolute component strength, halved when the components do not
/// agree with the direction of the score.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicConfidenceModel;

impl HeuristicConfidenceModel {
    fn from_components(components: &SignalComponents, score: f64) -> f64 {
        let parts = components.as_array();
        let strength = parts.iter().map(|c| c.abs()).sum::<f64>() / parts.len() as f64;

        let disagree = score != 0.0 && parts.iter().any(|&c| c != 0.0 && c.signum() != score.signum());
        let confidence = if disagree { strength / 2.0 } else { strength };
        confidence.clamp(0.0, 1.0)
    }
}

impl ConfidenceModel for HeuristicConfidenceModel {
    fn confidence(&self, analysis: &Analysis, _candles: &[Candle]) -> f64 {
        Self::from_components(&analysis.components, analysis.score)
    }
}

/// Chooses how engine output becomes an actionable signal.
///
/// `multi_signal` uses the engine thresholds as-is. `ai_enhanced` can shift
/// thresholds by market regime and gate actions on model confidence. When
/// several timeframes are configured the first one drives decisions and the
/// others can veto an entry.
pub struct StrategySelector {
    name: &'static str,
    engine: SignalEngine,
    ml: Option<MlParams>,
    confidence_model: Box<dyn ConfidenceModel>,
    classifier: Box<dyn RegimeClassifier>,
    timeframes: Vec<Timeframe>,
}

impl StrategySelector {
    pub fn from_config(strategy: &StrategyConfig, timeframes: Vec<Timeframe>) -> Self {
        let signals = strategy.signals().clone();
        let classifier = HeuristicRegimeClassifier::new(signals.long_window, signals.trend_window);

        Self {
            name: strategy.name(),
            engine: SignalEngine::new(signals),
            ml: strategy.ml().cloned(),
            confidence_model: Box::new(HeuristicConfidenceModel),
            classifier: Box::new(classifier),
            timeframes: if timeframes.is_empty() {
                vec![Timeframe::M5]
            } else {
                timeframes
            },
        }
    }

    pub fn with_confidence_model(mut self, model: impl ConfidenceModel + 'static) -> Self {
        self.confidence_model = Box::new(model);
        self
    }

    pub fn with_classifier(mut self, classifier: impl RegimeClassifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    pub fn primary_timeframe(&self) -> Timeframe {
        self.timeframes[0]
    }

    pub fn timeframes(&self) -> &[Timeframe] {
        &self.timeframes
    }

    pub fn engine(&self) -> &SignalEngine {
        &self.engine
    }

    /// Entry/exit thresholds after regime adjustment, clamped to [-1, 1]
    pub fn thresholds(&self, regime: Option<MarketRegime>) -> (f64, f64) {
        let params = self.engine.params();
        let (entry, exit) = (params.entry_threshold, params.exit_threshold);

        match (regime, self.adapts_to_regime()) {
            (Some(regime), true) => {
                let (entry_shift, exit_shift) = regime.threshold_shift();
                (
                    (entry + entry_shift).clamp(-1.0, 1.0),
                    (exit + exit_shift).clamp(-1.0, 1.0),
                )
            }
            _ => (entry, exit),
        }
    }

    fn adapts_to_regime(&self) -> bool {
        self.ml.as_ref().is_some_and(|ml| ml.adapt_to_regime)
    }

    fn uses_ml(&self) -> bool {
        self.ml.as_ref().is_some_and(|ml| ml.use_ml)
    }

    /// Full pipeline for one series: score, regime, thresholds, ML gate
    pub fn evaluate_candles(&self, candles: &[Candle]) -> Result<Option<Signal>> {
        let Some(analysis) = self.engine.analyze(candles)? else {
            return Ok(None);
        };

        let regime = if self.adapts_to_regime() {
            self.classifier.classify(candles)
        } else {
            None
        };

        let (entry, exit) = self.thresholds(regime);
        let mut signal = analysis.to_signal(entry, exit);
        signal.regime = regime;

        if let Some(ml) = self.ml.as_ref().filter(|_| self.uses_ml()) {
            let confidence = self.confidence_model.confidence(&analysis, candles);
            signal.confidence = Some(confidence);

            if signal.is_actionable() && confidence < ml.ml_confidence_threshold {
                debug!(
                    "{} {:?} gated: confidence {:.2} < {:.2}",
                    signal.pair, signal.action, confidence, ml.ml_confidence_threshold
                );
                signal.action = SignalAction::Hold;
            }
        }

        Ok(Some(signal))
    }

    /// Evaluate a pair across the configured timeframes.
    ///
    /// The primary timeframe decides; an entry is vetoed when any other
    /// timeframe with enough data currently says exit. Fails with
    /// `InsufficientData` while the primary series is still filling.
    pub fn evaluate(&self, pair: &str, cache: &CandleCache) -> Result<Option<Signal>> {
        let primary = cache.get_candles(pair, self.primary_timeframe());
        let need = self.engine.min_candles_required();
        if primary.len() < need {
            return Err(BotError::InsufficientData {
                pair: pair.to_string(),
                have: primary.len(),
                need,
            });
        }

        let Some(mut signal) = self.evaluate_candles(&primary)? else {
            return Ok(None);
        };

        if signal.action != SignalAction::Entry {
            return Ok(Some(signal));
        }

        for &timeframe in &self.timeframes[1..] {
            let candles = cache.get_candles(pair, timeframe);
            if let Some(confirm) = self.evaluate_candles(&candles)? {
                if confirm.action == SignalAction::Exit {
                    debug!(
                        "{} entry on {} vetoed by {} (score {:.2})",
                        pair, signal.timeframe, timeframe, confirm.score
                    );
                    signal.action = SignalAction::Hold;
                    break;
                }
            }
        }

        Ok(Some(signal))
    }
}

impl Strategy for StrategySelector {
    fn generate_signal(&self, candles: &[Candle]) -> Result<Option<Signal>> {
        self.evaluate_candles(candles)
    }

    fn name(&self) -> &str {
        self.name
    }

    fn min_candles_required(&self) -> usize {
        self.engine.min_candles_required()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SignalParams;
    use crate::strategy::signal_engine::tests::{candles_from, pullback_then_rally};

    struct FixedConfidence(f64);

    impl ConfidenceModel for FixedConfidence {
        fn confidence(&self, _analysis: &Analysis, _candles: &[Candle]) -> f64 {
            self.0
        }
    }

    struct FixedRegime(MarketRegime);

    impl RegimeClassifier for FixedRegime {
        fn classify(&self, _candles: &[Candle]) -> Option<MarketRegime> {
            Some(self.0)
        }
    }

    fn ai(use_ml: bool, adapt: bool, threshold: f64) -> StrategyConfig {
        StrategyConfig::AiEnhanced {
            signals: SignalParams::default(),
            ml: MlParams {
                use_ml,
                ml_confidence_threshold: threshold,
                adapt_to_regime: adapt,
            },
        }
    }

    fn multi() -> StrategyConfig {
        StrategyConfig::MultiSignal {
            signals: SignalParams::default(),
        }
    }

    fn crossover_candles(timeframe: Timeframe) -> Vec<Candle> {
        candles_from("BTC/USDT", timeframe, &pullback_then_rally()[..85])
    }

    #[test]
    fn test_multi_signal_uses_engine_as_is() {
        let selector = StrategySelector::from_config(&multi(), vec![Timeframe::M5]);
        let signal = selector
            .evaluate_candles(&crossover_candles(Timeframe::M5))
            .unwrap()
            .unwrap();

        assert_eq!(signal.action, SignalAction::Entry);
        assert_eq!(signal.confidence, None);
        assert_eq!(signal.regime, None);
        assert_eq!(selector.name(), "multi_signal");
    }

    #[test]
    fn test_low_confidence_downgrades_to_hold() {
        let selector = StrategySelector::from_config(&ai(true, false, 0.65), vec![Timeframe::M5])
            .with_confidence_model(FixedConfidence(0.4));
        let signal = selector
            .evaluate_candles(&crossover_candles(Timeframe::M5))
            .unwrap()
            .unwrap();

        assert_eq!(signal.confidence, Some(0.4));
        assert_eq!(signal.action, SignalAction::Hold);
        assert!(!signal.is_actionable());
    }

    #[test]
    fn test_confident_signal_passes() {
        let selector = StrategySelector::from_config(&ai(true, false, 0.65), vec![Timeframe::M5])
            .with_confidence_model(FixedConfidence(0.9));
        let signal = selector
            .evaluate_candles(&crossover_candles(Timeframe::M5))
            .unwrap()
            .unwrap();

        assert_eq!(signal.action, SignalAction::Entry);
    }

    #[test]
    fn test_ml_disabled_skips_confidence() {
        let selector = StrategySelector::from_config(&ai(false, false, 0.99), vec![Timeframe::M5]);
        let signal = selector
            .evaluate_candles(&crossover_candles(Timeframe::M5))
            .unwrap()
            .unwrap();

        assert_eq!(signal.confidence, None);
        assert_eq!(signal.action, SignalAction::Entry);
    }

    #[test]
    fn test_regime_shifts_thresholds() {
        let selector = StrategySelector::from_config(&ai(false, true, 0.65), vec![Timeframe::M5]);
        // defaults: entry 0.5, exit -0.3
        let (entry, exit) = selector.thresholds(Some(MarketRegime::Trending));
        assert!((entry - 0.4).abs() < 1e-12 && (exit + 0.4).abs() < 1e-12);
        let (entry, exit) = selector.thresholds(Some(MarketRegime::Ranging));
        assert!((entry - 0.6).abs() < 1e-12 && (exit + 0.3).abs() < 1e-12);
        let (entry, exit) = selector.thresholds(Some(MarketRegime::Volatile));
        assert!((entry - 0.7).abs() < 1e-12 && (exit + 0.2).abs() < 1e-12);
        assert_eq!(selector.thresholds(None), (0.5, -0.3));

        // multi_signal never adapts
        let plain = StrategySelector::from_config(&multi(), vec![Timeframe::M5]);
        assert_eq!(plain.thresholds(Some(MarketRegime::Volatile)), (0.5, -0.3));
    }

    #[test]
    fn test_thresholds_are_clamped() {
        let config = StrategyConfig::AiEnhanced {
            signals: SignalParams {
                entry_threshold: 0.95,
                ..SignalParams::default()
            },
            ml: MlParams {
                use_ml: false,
                adapt_to_regime: true,
                ..MlParams::default()
            },
        };
        let selector = StrategySelector::from_config(&config, vec![Timeframe::M5]);
        assert_eq!(selector.thresholds(Some(MarketRegime::Volatile)).0, 1.0);
    }

    #[test]
    fn test_volatile_regime_blocks_marginal_entry() {
        // Crossover score is ~0.64: enough for 0.5, not for 0.7
        let selector = StrategySelector::from_config(&ai(false, true, 0.65), vec![Timeframe::M5])
            .with_classifier(FixedRegime(MarketRegime::Volatile));
        let signal = selector
            .evaluate_candles(&crossover_candles(Timeframe::M5))
            .unwrap()
            .unwrap();

        assert_eq!(signal.regime, Some(MarketRegime::Volatile));
        assert_eq!(signal.action, SignalAction::Hold);
    }

    #[test]
    fn test_higher_timeframe_vetoes_entry() {
        let selector =
            StrategySelector::from_config(&multi(), vec![Timeframe::M5, Timeframe::H1]);
        let cache = CandleCache::new(500);
        for candle in crossover_candles(Timeframe::M5) {
            cache.add_candle(candle);
        }

        // No hourly data yet: entry stands
        let signal = selector.evaluate("BTC/USDT", &cache).unwrap().unwrap();
        assert_eq!(signal.action, SignalAction::Entry);

        // Hourly downtrend
        let closes: Vec<f64> = (0..60).map(|i| 100.0 * 0.994f64.powi(i)).collect();
        for candle in candles_from("BTC/USDT", Timeframe::H1, &closes) {
            cache.add_candle(candle);
        }
        let signal = selector.evaluate("BTC/USDT", &cache).unwrap().unwrap();
        assert_eq!(signal.action, SignalAction::Hold);
    }

    #[test]
    fn test_short_primary_series_is_insufficient() {
        let selector = StrategySelector::from_config(&multi(), vec![Timeframe::M5]);
        let cache = CandleCache::new(500);
        for candle in crossover_candles(Timeframe::M5).into_iter().take(20) {
            cache.add_candle(candle);
        }

        match selector.evaluate("BTC/USDT", &cache) {
            Err(BotError::InsufficientData { pair, have, need }) => {
                assert_eq!(pair, "BTC/USDT");
                assert_eq!(have, 20);
                assert_eq!(need, 51);
            }
            other => panic!("expected insufficient data, got {:?}", other),
        }
    }

    #[test]
    fn test_heuristic_confidence() {
        let aligned = SignalComponents {
            cross: 0.5,
            trend: 1.0,
            momentum: 0.6,
        };
        assert!((HeuristicConfidenceModel::from_components(&aligned, 0.7) - 0.7).abs() < 1e-12);

        let mixed = SignalComponents {
            cross: -0.5,
            trend: 1.0,
            momentum: 0.6,
        };
        assert!((HeuristicConfidenceModel::from_components(&mixed, 0.3) - 0.35).abs() < 1e-12);
    }
}
