use chrono::{DateTime, Utc};

use super::Strategy;
use crate::config::SignalParams;
use crate::errors::BotError;
use crate::indicators::{calculate_sma, calculate_sma_at};
use crate::models::{Candle, Signal, SignalAction, Timeframe};
use crate::Result;

// Relative moves that saturate each component at +/-1
const CROSS_SCALE: f64 = 0.01;
const TREND_SCALE: f64 = 0.02;
const MOMENTUM_SCALE: f64 = 0.005;

const CROSS_WEIGHT: f64 = 0.40;
const TREND_WEIGHT: f64 = 0.35;
const MOMENTUM_WEIGHT: f64 = 0.25;

/// Normalised score inputs, each in [-1, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalComponents {
    pub cross: f64,    // short MA vs long MA
    pub trend: f64,    // long MA vs trend MA
    pub momentum: f64, // short MA slope
}

impl SignalComponents {
    pub fn score(&self) -> f64 {
        (CROSS_WEIGHT * self.cross + TREND_WEIGHT * self.trend + MOMENTUM_WEIGHT * self.momentum)
            .clamp(-1.0, 1.0)
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.cross, self.trend, self.momentum]
    }
}

/// Scored snapshot of one series
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub pair: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub short_ma: f64,
    pub long_ma: f64,
    pub trend_ma: f64,
    pub components: SignalComponents,
    pub score: f64,
}

impl Analysis {
    /// Build a signal using the given thresholds
    pub fn to_signal(&self, entry_threshold: f64, exit_threshold: f64) -> Signal {
        Signal {
            pair: self.pair.clone(),
            timeframe: self.timeframe,
            timestamp: self.timestamp,
            score: self.score,
            confidence: None,
            regime: None,
            action: action_for(self.score, entry_threshold, exit_threshold),
        }
    }
}

pub fn action_for(score: f64, entry_threshold: f64, exit_threshold: f64) -> SignalAction {
    if score >= entry_threshold {
        SignalAction::Entry
    } else if score <= exit_threshold {
        SignalAction::Exit
    } else {
        SignalAction::Hold
    }
}

/// Moving-average signal engine
///
/// Combines three moving averages of closes into a composite score:
/// - cross: short vs long MA (40%)
/// - trend: long vs trend MA (35%)
/// - momentum: bar-over-bar change of the short MA (25%)
#[derive(Debug, Clone)]
pub struct SignalEngine {
    params: SignalParams,
}

impl SignalEngine {
    pub fn new(params: SignalParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SignalParams {
        &self.params
    }

    /// Score a series. `Ok(None)` if there are too few candles.
    pub fn analyze(&self, candles: &[Candle]) -> Result<Option<Analysis>> {
        if candles.len() < self.min_candles_required() {
            return Ok(None);
        }

        validate_series(candles)?;

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let Some((short, long, trend, prev_short)) = self.moving_averages(&closes) else {
            return Ok(None);
        };

        let components = SignalComponents {
            cross: normalise(short, long, CROSS_SCALE),
            trend: normalise(long, trend, TREND_SCALE),
            momentum: normalise(short, prev_short, MOMENTUM_SCALE),
        };

        // validate_series guarantees a last candle
        let last = &candles[candles.len() - 1];
        Ok(Some(Analysis {
            pair: last.pair.clone(),
            timeframe: last.timeframe,
            timestamp: last.timestamp,
            short_ma: short,
            long_ma: long,
            trend_ma: trend,
            components,
            score: components.score(),
        }))
    }

    fn moving_averages(&self, closes: &[f64]) -> Option<(f64, f64, f64, f64)> {
        let p = &self.params;
        Some((
            calculate_sma(closes, p.short_window)?,
            calculate_sma(closes, p.long_window)?,
            calculate_sma(closes, p.trend_window)?,
            calculate_sma_at(closes, p.short_window, 1)?,
        ))
    }
}

impl Strategy for SignalEngine {
    fn generate_signal(&self, candles: &[Candle]) -> Result<Option<Signal>> {
        Ok(self.analyze(candles)?.map(|analysis| {
            analysis.to_signal(self.params.entry_threshold, self.params.exit_threshold)
        }))
    }

    fn name(&self) -> &str {
        "multi_signal"
    }

    fn min_candles_required(&self) -> usize {
        self.params.required_candles()
    }
}

/// `((value - reference) / reference) / scale`, clamped to [-1, 1]
fn normalise(value: f64, reference: f64, scale: f64) -> f64 {
    if reference <= 0.0 {
        return 0.0;
    }
    (((value - reference) / reference) / scale).clamp(-1.0, 1.0)
}

/// Reject series the engine cannot score meaningfully
fn validate_series(candles: &[Candle]) -> Result<()> {
    let Some(first) = candles.first() else {
        return Err(BotError::InvalidData("empty candle series".into()));
    };

    for pair in candles.windows(2) {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(BotError::InvalidData(format!(
                "{} candles out of order at {}",
                first.pair, pair[1].timestamp
            )));
        }
    }

    if let Some(bad) = candles
        .iter()
        .find(|c| c.pair != first.pair || c.timeframe != first.timeframe)
    {
        return Err(BotError::InvalidData(format!(
            "mixed series: {} {} and {} {}",
            first.pair, first.timeframe, bad.pair, bad.timeframe
        )));
    }

    if let Some(bad) = candles.iter().find(|c| !(c.close.is_finite() && c.close > 0.0)) {
        return Err(BotError::InvalidData(format!(
            "{} has non-positive close {} at {}",
            bad.pair, bad.close, bad.timestamp
        )));
    }

    Ok(())
}
