/// Calculate Simple Moving Average (SMA) of the first `period` values.
fn seed_sma(values: &[f64], period: usize) -> f64 {
    values[..period].iter().sum::<f64>() / period as f64
}

/// Exponential Moving Average (EMA) series.
///
/// Same length as `values`. Indices before `period - 1` are NaN, index
/// `period - 1` is the SMA seed, then `k = 2 / (period + 1)`. If there are
/// fewer than `period` values the whole series is NaN.
pub fn compute_ema(values: &[f64], period: usize) -> Vec<f64> {
    let mut result = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period {
        return result;
    }

    let k = 2.0 / (period as f64 + 1.0);
    result[period - 1] = seed_sma(values, period);
    for i in period..values.len() {
        result[i] = (values[i] - result[i - 1]) * k + result[i - 1];
    }
    result
}
