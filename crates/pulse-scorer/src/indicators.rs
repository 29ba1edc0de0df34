//! Indicator engine.
//!
//! Pure functions over ordered series (oldest first). No state survives between calls,
//! so identical input always yields bit-identical output.

use pulse_core::{BollingerBands, Candle, IndicatorSet, MacdValue, Trend};

pub const EMA_FAST: usize = 9;
pub const EMA_MID: usize = 21;
pub const EMA_SLOW: usize = 50;
pub const RSI_PERIOD: usize = 14;
pub const ATR_PERIOD: usize = 14;
pub const STOCH_PERIOD: usize = 14;
pub const BB_PERIOD: usize = 20;
pub const BB_K: f64 = 2.0;
pub const VOLUME_WINDOW: usize = 20;

/// EMA seeded with the SMA of the first `period` values.
///
/// Returns one value per input from index `period - 1` onward, or an empty vector when
/// the series is shorter than `period`.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut current = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(current);
    for value in &values[period..] {
        current = value * k + current * (1.0 - k);
        out.push(current);
    }
    out
}

/// Last EMA value, `None` when the series is too short.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).last().copied()
}

/// Wilder RSI. 50 when there is not enough data, 100 when there were no losses.
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < period + 1 {
        return 50.0;
    }

    let p = period as f64;
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for w in closes[..=period].windows(2) {
        let change = w[1] - w[0];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= p;
    avg_loss /= p;

    for w in closes[period..].windows(2) {
        let change = w[1] - w[0];
        let (gain, loss) = if change > 0.0 { (change, 0.0) } else { (0.0, -change) };
        avg_gain = (avg_gain * (p - 1.0) + gain) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss) / p;
    }

    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// MACD with trailing-index alignment of the fast and slow EMA series.
///
/// All zeros until `slow + signal` closes are available.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> MacdValue {
    if fast == 0 || fast > slow || closes.len() < slow + signal {
        return MacdValue::default();
    }

    let fast_series = ema_series(closes, fast);
    let slow_series = ema_series(closes, slow);
    let offset = fast_series.len() - slow_series.len();

    let macd_series: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .map(|(i, slow_val)| fast_series[i + offset] - slow_val)
        .collect();
    let signal_series = ema_series(&macd_series, signal);

    let (Some(&macd), Some(&signal)) = (macd_series.last(), signal_series.last()) else {
        return MacdValue::default();
    };
    MacdValue {
        macd,
        signal,
        histogram: macd - signal,
    }
}

/// Bollinger bands over the trailing window using the population standard deviation.
pub fn bollinger(closes: &[f64], period: usize, k: f64) -> Option<BollingerBands> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let n = period as f64;
    let middle = window.iter().sum::<f64>() / n;
    let variance = window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();

    Some(BollingerBands {
        upper: middle + k * std,
        middle,
        lower: middle - k * std,
    })
}

/// Average true range, SMA-seeded then Wilder-smoothed. 0 when there is not enough data.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> f64 {
    let len = highs.len().min(lows.len()).min(closes.len());
    if period == 0 || len < period + 1 {
        return 0.0;
    }

    let true_ranges: Vec<f64> = (1..len)
        .map(|i| {
            let prev_close = closes[i - 1];
            (highs[i] - lows[i])
                .max((highs[i] - prev_close).abs())
                .max((lows[i] - prev_close).abs())
        })
        .collect();

    let p = period as f64;
    let mut value = true_ranges[..period].iter().sum::<f64>() / p;
    for tr in &true_ranges[period..] {
        value = (value * (p - 1.0) + tr) / p;
    }
    value
}

/// Stochastic %K over the trailing window of closes. 50 on a flat or short window.
pub fn stochastic_k(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < period {
        return 50.0;
    }

    let window = &closes[closes.len() - period..];
    let lowest = window.iter().copied().fold(f64::INFINITY, f64::min);
    let highest = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = highest - lowest;
    if range == 0.0 {
        return 50.0;
    }
    let last = window[window.len() - 1];
    (last - lowest) / range * 100.0
}

/// Last volume relative to the trailing average. 1 when the average is zero.
pub fn volume_ratio(volumes: &[f64], window: usize) -> f64 {
    let Some(&current) = volumes.last() else {
        return 1.0;
    };
    let take = window.min(volumes.len()).max(1);
    let average = volumes[volumes.len() - take..].iter().sum::<f64>() / take as f64;
    if average > 0.0 {
        current / average
    } else {
        1.0
    }
}

pub fn trend(ema_fast: f64, ema_mid: f64) -> Trend {
    if ema_fast > ema_mid {
        Trend::Up
    } else if ema_fast < ema_mid {
        Trend::Down
    } else {
        Trend::Flat
    }
}

/// Compute the full indicator snapshot for a candle series.
///
/// Returns `None` for an empty series. EMA9/EMA21 fall back to the last close when the
/// series is shorter than their period.
pub fn compute_indicators(candles: &[Candle]) -> Option<IndicatorSet> {
    let last = candles.last()?;
    let price = last.close;

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

    let ema9 = ema(&closes, EMA_FAST).unwrap_or(price);
    let ema21 = ema(&closes, EMA_MID).unwrap_or(price);

    Some(IndicatorSet {
        price,
        ema9,
        ema21,
        ema50: ema(&closes, EMA_SLOW),
        rsi: rsi(&closes, RSI_PERIOD),
        macd: macd(&closes, 12, 26, 9),
        bollinger: bollinger(&closes, BB_PERIOD, BB_K),
        atr: atr(&highs, &lows, &closes, ATR_PERIOD),
        stoch_k: stochastic_k(&closes, STOCH_PERIOD),
        volume_ratio: volume_ratio(&volumes, VOLUME_WINDOW),
        trend: trend(ema9, ema21),
    })
}
