/// Calculate Simple Moving Average (SMA) over the most recent `period` values
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// SMA as it stood `bars_back` bars ago
///
/// `bars_back = 0` is the same as [`calculate_sma`].
pub fn calculate_sma_at(prices: &[f64], period: usize, bars_back: usize) -> Option<f64> {
    let end = prices.len().checked_sub(bars_back)?;
    calculate_sma(prices.get(..end)?, period)
}
