// Technical indicators module
// Implements RSI, EMA, MACD and OBV, written into candles in place

pub mod macd;
pub mod moving_average;
pub mod obv;
pub mod rsi;

pub use macd::compute_macd;
pub use moving_average::compute_ema;
pub use obv::compute_obv;
pub use rsi::compute_rsi;

use crate::models::Candle;

pub const RSI_PERIOD: usize = 14;

/// Annotate a full candle series with RSI(14), MACD(12,26,9) and OBV.
///
/// Must run on the whole fetched series, before any truncation, so the
/// warm-up windows are consumed by older candles.
pub fn enrich(candles: &mut [Candle]) {
    compute_rsi(candles, RSI_PERIOD);
    compute_macd(candles);
    compute_obv(candles);
}
