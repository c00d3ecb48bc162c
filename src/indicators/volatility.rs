//! Volatility of close-to-close returns, used by the regime classifier

/// Standard deviation of close-to-close returns over the last `period` bars
///
/// Returns None if there are fewer than `period + 1` closes.
pub fn calculate_return_volatility(closes: &[f64], period: usize) -> Option<f64> {
    if period < 2 || closes.len() < period + 1 {
        return None;
    }

    let window = &closes[closes.len() - period - 1..];
    let returns: Vec<f64> = window
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();

    if returns.len() < 2 {
        return None;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;

    Some(variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_prices_have_zero_volatility() {
        let closes = vec![100.0; 30];
        let vol = calculate_return_volatility(&closes, 20).unwrap();
        assert_eq!(vol, 0.0);
    }

    #[test]
    fn test_alternating_prices_are_volatile() {
        let closes: Vec<f64> = (0..30)
            .map(|i| if i % 2 == 0 { 100.0 } else { 110.0 })
            .collect();
        let vol = calculate_return_volatility(&closes, 20).unwrap();
        assert!(vol > 0.05, "vol was {}", vol);
    }

    #[test]
    fn test_volatility_insufficient_data() {
        let closes = vec![100.0, 101.0, 102.0];
        assert!(calculate_return_volatility(&closes, 20).is_none());
    }
}
