use crate::error::IndicatorError;
use core_types::Bar;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The indicators the engine knows how to compute, with their parameters.
/// Persisted verbatim inside indicator-alert definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum IndicatorKind {
    Sma { period: usize },
    Ema { period: usize },
    Rsi { period: usize },
}

impl IndicatorKind {
    /// Display name used in trigger events and logs.
    pub fn name(&self) -> &'static str {
        match self {
            IndicatorKind::Sma { .. } => "sma",
            IndicatorKind::Ema { .. } => "ema",
            IndicatorKind::Rsi { .. } => "rsi",
        }
    }

    pub fn period(&self) -> usize {
        match self {
            IndicatorKind::Sma { period }
            | IndicatorKind::Ema { period }
            | IndicatorKind::Rsi { period } => *period,
        }
    }
}

/// The current value and, when enough history exists, the value one bar
/// earlier. The previous value is what crossing conditions compare against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorOutput {
    pub current: Decimal,
    pub previous: Option<Decimal>,
}

/// Computes the indicator over the given bars (close prices).
pub fn compute(kind: &IndicatorKind, bars: &[Bar]) -> Result<IndicatorOutput, IndicatorError> {
    let period = kind.period();
    if period == 0 {
        return Err(IndicatorError::InvalidPeriod(period));
    }
    let closes: Vec<Decimal> = bars.iter().map(|b| b.close).collect();
    match kind {
        IndicatorKind::Sma { period } => sma(&closes, *period),
        IndicatorKind::Ema { period } => ema(&closes, *period),
        IndicatorKind::Rsi { period } => rsi(&closes, *period),
    }
}

fn mean(window: &[Decimal]) -> Decimal {
    let sum: Decimal = window.iter().copied().sum();
    sum / Decimal::from(window.len() as u64)
}

fn sma(closes: &[Decimal], period: usize) -> Result<IndicatorOutput, IndicatorError> {
    if closes.len() < period {
        return Err(IndicatorError::NotEnoughData {
            needed: period,
            got: closes.len(),
        });
    }
    let current = mean(&closes[closes.len() - period..]);
    let previous = if closes.len() > period {
        Some(mean(&closes[closes.len() - period - 1..closes.len() - 1]))
    } else {
        None
    };
    Ok(IndicatorOutput { current, previous })
}

fn ema(closes: &[Decimal], period: usize) -> Result<IndicatorOutput, IndicatorError> {
    if closes.len() < period {
        return Err(IndicatorError::NotEnoughData {
            needed: period,
            got: closes.len(),
        });
    }
    // Seed with the SMA of the first `period` closes, then smooth.
    let multiplier = Decimal::TWO / Decimal::from((period + 1) as u64);
    let mut value = mean(&closes[..period]);
    let mut previous = None;
    for close in &closes[period..] {
        previous = Some(value);
        value = (*close - value) * multiplier + value;
    }
    Ok(IndicatorOutput {
        current: value,
        previous,
    })
}

fn rsi(closes: &[Decimal], period: usize) -> Result<IndicatorOutput, IndicatorError> {
    // Wilder's RSI needs period deltas plus one more to produce a
    // previous value on top of the current one.
    if closes.len() < period + 1 {
        return Err(IndicatorError::NotEnoughData {
            needed: period + 1,
            got: closes.len(),
        });
    }

    let mut avg_gain = Decimal::ZERO;
    let mut avg_loss = Decimal::ZERO;
    for w in closes[..period + 1].windows(2) {
        let delta = w[1] - w[0];
        if delta > Decimal::ZERO {
            avg_gain += delta;
        } else {
            avg_loss -= delta;
        }
    }
    let period_dec = Decimal::from(period as u64);
    avg_gain /= period_dec;
    avg_loss /= period_dec;

    let mut previous = None;
    let mut current = rsi_value(avg_gain, avg_loss);
    for w in closes[period..].windows(2) {
        let delta = w[1] - w[0];
        let (gain, loss) = if delta > Decimal::ZERO {
            (delta, Decimal::ZERO)
        } else {
            (Decimal::ZERO, -delta)
        };
        avg_gain = (avg_gain * (period_dec - Decimal::ONE) + gain) / period_dec;
        avg_loss = (avg_loss * (period_dec - Decimal::ONE) + loss) / period_dec;
        previous = Some(current);
        current = rsi_value(avg_gain, avg_loss);
    }

    Ok(IndicatorOutput { current, previous })
}

fn rsi_value(avg_gain: Decimal, avg_loss: Decimal) -> Decimal {
    if avg_gain.is_zero() && avg_loss.is_zero() {
        // A perfectly flat window has no momentum either way.
        return Decimal::from(50);
    }
    if avg_loss.is_zero() {
        return Decimal::ONE_HUNDRED;
    }
    let rs = avg_gain / avg_loss;
    Decimal::ONE_HUNDRED - Decimal::ONE_HUNDRED / (Decimal::ONE + rs)
}
