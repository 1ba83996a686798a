use crate::models::Candle;

/// Calculate Relative Strength Index (RSI) in place, Wilder smoothing.
///
/// The first `period` candles have no RSI. With fewer than `period + 1`
/// candles nothing is defined. When the smoothed loss is zero the RSI is 100.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
pub fn compute_rsi(candles: &mut [Candle], period: usize) {
    for c in candles.iter_mut() {
        c.rsi = f64::NAN;
    }
    if period == 0 || candles.len() < period + 1 {
        return;
    }

    let mut gain = 0.0;
    let mut loss = 0.0;
    for i in 1..=period {
        let diff = candles[i].close - candles[i - 1].close;
        if diff > 0.0 {
            gain += diff;
        } else {
            loss -= diff;
        }
    }
    let p = period as f64;
    let mut avg_gain = gain / p;
    let mut avg_loss = loss / p;
    candles[period].rsi = rsi_value(avg_gain, avg_loss);

    for i in (period + 1)..candles.len() {
        let diff = candles[i].close - candles[i - 1].close;
        let (g, l) = if diff > 0.0 { (diff, 0.0) } else { (0.0, -diff) };
        avg_gain = (avg_gain * (p - 1.0) + g) / p;
        avg_loss = (avg_loss * (p - 1.0) + l) / p;
        candles[i].rsi = rsi_value(avg_gain, avg_loss);
    }
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}
