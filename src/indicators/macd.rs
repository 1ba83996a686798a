use super::moving_average::compute_ema;
use crate::models::Candle;

pub const FAST_PERIOD: usize = 12;
pub const SLOW_PERIOD: usize = 26;
pub const SIGNAL_PERIOD: usize = 9;

/// MACD (12, 26, 9) written into each candle.
///
/// The signal EMA runs over the MACD line with undefined entries read as 0.
/// A candle gets MACD, signal and histogram only when both the MACD line and
/// the signal are defined at that index; otherwise all three are NaN.
pub fn compute_macd(candles: &mut [Candle]) {
    if candles.is_empty() {
        return;
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let fast = compute_ema(&closes, FAST_PERIOD);
    let slow = compute_ema(&closes, SLOW_PERIOD);

    let line: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
    let zero_filled: Vec<f64> = line
        .iter()
        .map(|v| if v.is_nan() { 0.0 } else { *v })
        .collect();
    let signal = compute_ema(&zero_filled, SIGNAL_PERIOD);

    for (i, candle) in candles.iter_mut().enumerate() {
        if line[i].is_nan() || signal[i].is_nan() {
            candle.macd = f64::NAN;
            candle.macd_signal = f64::NAN;
            candle.macd_hist = f64::NAN;
        } else {
            candle.macd = line[i];
            candle.macd_signal = signal[i];
            candle.macd_hist = line[i] - signal[i];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let c = 100.0 + i as f64;
                Candle::new(i as i64, c, c, c, c, 1.0, 1)
            })
            .collect()
    }

    #[test]
    fn test_macd_undefined_before_slow_ema() {
        let mut data = candles(70);
        compute_macd(&mut data);
        assert!(data[..25].iter().all(|c| c.macd.is_nan() && c.macd_hist.is_nan()));
        assert!(data[25..].iter().all(|c| !c.macd.is_nan()));
    }

    #[test]
    fn test_macd_histogram_is_line_minus_signal() {
        let mut data = candles(70);
        compute_macd(&mut data);
        for c in &data[25..] {
            assert!((c.macd_hist - (c.macd - c.macd_signal)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_signal_seeded_from_zero_filled_warm_up() {
        // Flat at 100, then a jump to 126 on the first candle with a slow EMA.
        let mut data: Vec<Candle> = (0..27)
            .map(|i| {
                let c = if i < 25 { 100.0 } else { 126.0 };
                Candle::new(i as i64, c, c, c, c, 1.0, 1)
            })
            .collect();
        compute_macd(&mut data);

        assert!(data[24].macd.is_nan() && data[24].macd_signal.is_nan());

        // slow = (25 * 100 + 126) / 26 = 101, fast = 100 + 26 * 2/13 = 104.
        // The signal EMA has sat at 0 since index 8: 0 + (3 - 0) * 0.2.
        let c = &data[25];
        assert!((c.macd - 3.0).abs() < 1e-9);
        assert!((c.macd_signal - 0.6).abs() < 1e-9);
        assert!((c.macd_hist - 2.4).abs() < 1e-9);

        let slow = 101.0 + (126.0 - 101.0) * 2.0 / 27.0;
        let fast = 104.0 + (126.0 - 104.0) * 2.0 / 13.0;
        let line = fast - slow;
        let c = &data[26];
        assert!((c.macd - line).abs() < 1e-9);
        assert!((c.macd_signal - (0.6 + (line - 0.6) * 0.2)).abs() < 1e-9);
    }

    #[test]
    fn test_macd_short_series_all_undefined() {
        let mut data = candles(20);
        compute_macd(&mut data);
        assert!(data.iter().all(|c| c.macd.is_nan() && c.macd_signal.is_nan()));
    }

    #[test]
    fn test_macd_empty_is_noop() {
        let mut data: Vec<Candle> = Vec::new();
        compute_macd(&mut data);
        assert!(data.is_empty());
    }
}
