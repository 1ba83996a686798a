use crate::models::Candle;

/// On-Balance Volume. Starts at 0 and moves by the candle's volume on a
/// strict close-to-close rise or fall.
pub fn compute_obv(candles: &mut [Candle]) {
    let Some(first) = candles.first_mut() else {
        return;
    };
    first.obv = 0.0;

    for i in 1..candles.len() {
        let prev = candles[i - 1].obv;
        let (close, prev_close) = (candles[i].close, candles[i - 1].close);
        candles[i].obv = if close > prev_close {
            prev + candles[i].volume
        } else if close < prev_close {
            prev - candles[i].volume
        } else {
            prev
        };
    }
}
