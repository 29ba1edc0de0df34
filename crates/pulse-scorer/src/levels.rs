//! TP/SL/liquidation sizing and price rounding.

use pulse_core::{Direction, Timeframe};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Take-profit and stop-loss factors for one timeframe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistancePair {
    pub tp: f64,
    pub sl: f64,
}

const fn pair(tp: f64, sl: f64) -> DistancePair {
    DistancePair { tp, sl }
}

/// ATR multipliers. Timeframes without an entry use the 15m pair.
pub fn atr_multipliers(timeframe: Timeframe) -> DistancePair {
    match timeframe {
        Timeframe::M1 => pair(2.0, 0.8),
        Timeframe::M3 => pair(2.2, 0.9),
        Timeframe::M5 => pair(2.5, 1.0),
        Timeframe::M30 => pair(3.0, 1.4),
        Timeframe::H1 => pair(3.2, 1.6),
        Timeframe::H4 => pair(3.8, 2.0),
        Timeframe::D1 => pair(4.0, 2.2),
        Timeframe::M15 | Timeframe::H2 | Timeframe::W1 => pair(2.8, 1.2),
    }
}

/// Fraction-of-price distances used when ATR is zero.
pub fn fallback_fractions(timeframe: Timeframe) -> DistancePair {
    match timeframe {
        Timeframe::M1 => pair(0.004, 0.0015),
        Timeframe::M3 => pair(0.006, 0.0025),
        Timeframe::M5 => pair(0.009, 0.004),
        Timeframe::M30 => pair(0.022, 0.010),
        Timeframe::H1 => pair(0.030, 0.015),
        Timeframe::H4 => pair(0.055, 0.028),
        Timeframe::D1 => pair(0.080, 0.045),
        Timeframe::M15 | Timeframe::H2 | Timeframe::W1 => pair(0.015, 0.007),
    }
}

/// Decimal places for prices of this magnitude.
pub fn price_precision(price: f64) -> u32 {
    if price >= 1000.0 {
        2
    } else if price >= 100.0 {
        3
    } else if price >= 1.0 {
        4
    } else if price >= 0.01 {
        5
    } else if price >= 0.001 {
        6
    } else {
        8
    }
}

fn round_dec(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// Round `value` to `dp` decimals (midpoint away from zero).
pub fn round_price(value: f64, dp: u32) -> f64 {
    Decimal::from_f64(value)
        .map(|d| round_dec(d, dp))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

/// Convert `tp` to f64, stepping it outward by ticks until the 2:1 rule also holds for
/// the f64 values callers compare.
fn widen_in_f64(price: f64, mut tp: Decimal, sl: f64, tick: Decimal, direction: Direction) -> Option<f64> {
    let risk = (sl - price).abs();
    for _ in 0..MAX_F64_NUDGES {
        let tp_f = tp.to_f64()?;
        if (tp_f - price).abs() >= 2.0 * risk {
            return Some(tp_f);
        }
        match direction {
            Direction::Long => tp += tick,
            _ => tp -= tick,
        }
    }
    tp.to_f64()
}

const MAX_F64_NUDGES: usize = 4;

/// Rounded exit levels for one side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeLevels {
    pub tp: f64,
    pub sl: f64,
    pub liq: f64,
    pub tp_distance: f64,
    pub sl_distance: f64,
    /// False when the percentage fallback was used.
    pub atr_based: bool,
}

impl TradeLevels {
    /// Size TP/SL from ATR (or the fallback table) and round to the price's precision.
    ///
    /// TP is at least twice as far from `price` as SL after rounding, and both sit strictly
    /// on their own side of `price`. Returns `None` for NEUTRAL or a non-positive price.
    pub fn compute(
        price: f64,
        direction: Direction,
        leverage: u32,
        timeframe: Timeframe,
        atr: f64,
        liquidation_factor: f64,
    ) -> Option<Self> {
        if !direction.is_tradeable() || !(price.is_finite() && price > 0.0) {
            return None;
        }

        let atr_based = atr.is_finite() && atr > 0.0;
        let (tp_raw, sl_raw) = if atr_based {
            let m = atr_multipliers(timeframe);
            (atr * m.tp, atr * m.sl)
        } else {
            let f = fallback_fractions(timeframe);
            (price * f.tp, price * f.sl)
        };

        let dp = price_precision(price);
        let tick = Decimal::new(1, dp);
        let p = Decimal::from_f64(price)?;
        let sl_dist = Decimal::from_f64(sl_raw)?;
        let tp_dist = Decimal::from_f64(tp_raw.max(sl_raw * 2.0))?;
        let two = Decimal::TWO;

        // Rounding may pull a level onto the entry price or shave the 2:1 margin;
        // nudge by one tick in either case.
        let (tp, sl) = match direction {
            Direction::Long => {
                let mut sl = round_dec(p - sl_dist, dp);
                if sl >= p {
                    sl = p.round_dp_with_strategy(dp, RoundingStrategy::ToNegativeInfinity);
                }
                if sl >= p {
                    sl -= tick;
                }
                let risk = p - sl;
                let mut tp = round_dec(p + tp_dist.max(risk * two), dp);
                if tp - p < risk * two {
                    tp += tick;
                }
                (tp, sl)
            }
            _ => {
                let mut sl = round_dec(p + sl_dist, dp);
                if sl <= p {
                    sl = p.round_dp_with_strategy(dp, RoundingStrategy::ToPositiveInfinity);
                }
                if sl <= p {
                    sl += tick;
                }
                let risk = sl - p;
                let mut tp = round_dec(p - tp_dist.max(risk * two), dp);
                if p - tp < risk * two {
                    tp -= tick;
                }
                (tp, sl)
            }
        };

        let sl = sl.to_f64()?;
        let tp = widen_in_f64(price, tp, sl, tick, direction)?;

        let lev = f64::from(leverage.max(1));
        let liq_raw = price * (1.0 - direction.sign() * liquidation_factor / lev);

        Some(Self {
            tp,
            sl,
            liq: round_price(liq_raw, dp),
            tp_distance: (tp - price).abs(),
            sl_distance: (sl - price).abs(),
            atr_based,
        })
    }

    /// Reward/risk ratio rounded to one decimal.
    pub fn rr_ratio(&self) -> Option<f64> {
        if self.sl_distance > 0.0 {
            Some(round_price(self.tp_distance / self.sl_distance, 1))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_tiers() {
        assert_eq!(price_precision(65_000.0), 2);
        assert_eq!(price_precision(150.0), 3);
        assert_eq!(price_precision(1.5), 4);
        assert_eq!(price_precision(0.05), 5);
        assert_eq!(price_precision(0.005), 6);
        assert_eq!(price_precision(0.0005), 8);
    }

    #[test]
    fn test_unlisted_timeframes_use_15m() {
        assert_eq!(atr_multipliers(Timeframe::H2), atr_multipliers(Timeframe::M15));
        assert_eq!(fallback_fractions(Timeframe::W1), fallback_fractions(Timeframe::M15));
    }

    #[test]
    fn test_long_levels_from_atr() {
        let levels = TradeLevels::compute(100.0, Direction::Long, 10, Timeframe::M15, 1.0, 0.996).unwrap();
        assert!(levels.atr_based);
        assert_eq!(levels.sl, 98.8);
        assert_eq!(levels.tp, 102.8);
        assert_eq!(levels.liq, 90.04);
        assert!(levels.tp_distance >= 2.0 * levels.sl_distance);
        assert_eq!(levels.rr_ratio(), Some(2.3));
    }

    #[test]
    fn test_short_levels_use_fallback_when_atr_zero() {
        let levels = TradeLevels::compute(2000.0, Direction::Short, 20, Timeframe::H1, 0.0, 0.996).unwrap();
        assert!(!levels.atr_based);
        // 2000 * 0.015 = 30, 2000 * 0.030 = 60
        assert_eq!(levels.sl, 2030.0);
        assert_eq!(levels.tp, 1940.0);
        assert_eq!(levels.liq, 2099.6);
    }

    #[test]
    fn test_min_two_to_one_enforced() {
        // 4h fallback: 0.055 < 2 * 0.028
        let levels = TradeLevels::compute(50.0, Direction::Long, 5, Timeframe::H4, 0.0, 0.996).unwrap();
        assert!(levels.tp_distance >= 2.0 * levels.sl_distance);
    }

    #[test]
    fn test_tiny_distance_still_separates_sl_from_price() {
        let levels =
            TradeLevels::compute(1234.5, Direction::Long, 10, Timeframe::M1, 0.000_001, 0.996).unwrap();
        assert!(levels.sl < 1234.5);
        assert!(levels.tp > 1234.5);
        assert!(levels.tp_distance >= 2.0 * levels.sl_distance);

        let levels =
            TradeLevels::compute(1234.5, Direction::Short, 10, Timeframe::M1, 0.000_001, 0.996).unwrap();
        assert!(levels.sl > 1234.5);
        assert!(levels.tp < 1234.5);
    }

    #[test]
    fn test_exact_two_to_one_holds_in_f64() {
        let levels = TradeLevels::compute(7.4347, Direction::Short, 10, Timeframe::H4, 0.01933, 0.996).unwrap();
        assert!(levels.tp < 7.4347 && 7.4347 < levels.sl);
        assert!((levels.tp - 7.4347).abs() >= 2.0 * (levels.sl - 7.4347).abs());
    }

    #[test]
    fn test_reward_risk_holds_across_price_sweep() {
        let timeframes = [Timeframe::M1, Timeframe::M5, Timeframe::M15, Timeframe::H1, Timeframe::H4, Timeframe::D1];
        for i in 0..2_000u32 {
            let price = 0.5 + f64::from(i) * 0.0371;
            let atr = price * 0.0026;
            for tf in timeframes {
                for direction in [Direction::Long, Direction::Short] {
                    let l = TradeLevels::compute(price, direction, 10, tf, atr, 0.996).unwrap();
                    assert!(
                        (l.tp - price).abs() >= 2.0 * (l.sl - price).abs(),
                        "{price} {tf:?} {direction:?}: tp {} sl {}",
                        l.tp,
                        l.sl
                    );
                }
            }
        }
    }

    #[test]
    fn test_neutral_has_no_levels() {
        assert!(TradeLevels::compute(100.0, Direction::Neutral, 10, Timeframe::M15, 1.0, 0.996).is_none());
        assert!(TradeLevels::compute(0.0, Direction::Long, 10, Timeframe::M15, 1.0, 0.996).is_none());
    }

    #[test]
    fn test_round_price() {
        assert_eq!(round_price(1.23456, 2), 1.23);
        assert_eq!(round_price(1.235, 2), 1.24);
    }
}
