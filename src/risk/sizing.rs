use crate::config::RiskConfig;
use crate::risk::TradeStats;

/// How much of the capital a new position may commit
#[derive(Debug, Clone, PartialEq)]
pub enum SizingPolicy {
    Fixed {
        position_size: f64,
    },
    Kelly {
        position_size: f64, // hard cap
        fraction: f64,
        min_trades: u32,
    },
}

impl SizingPolicy {
    pub fn from_config(position_size: f64, risk: &RiskConfig) -> Self {
        if risk.use_kelly_criterion {
            SizingPolicy::Kelly {
                position_size,
                fraction: risk.kelly_fraction,
                min_trades: risk.kelly_min_trades,
            }
        } else {
            SizingPolicy::Fixed { position_size }
        }
    }

    pub fn position_size(&self) -> f64 {
        match *self {
            SizingPolicy::Fixed { position_size } | SizingPolicy::Kelly { position_size, .. } => {
                position_size
            }
        }
    }

    /// Fraction of capital to commit. Non-positive means "do not trade".
    pub fn size(&self, requested: f64, stats: &TradeStats) -> f64 {
        match *self {
            SizingPolicy::Fixed { position_size } => requested.min(position_size),
            SizingPolicy::Kelly {
                position_size,
                fraction,
                min_trades,
            } => {
                // Not enough history yet
                if stats.total_trades() < min_trades {
                    return requested.min(position_size);
                }

                let kelly = kelly_fraction(stats);
                (kelly * fraction).min(position_size).min(requested)
            }
        }
    }
}

/// Raw Kelly fraction `W - (1 - W) / R`
fn kelly_fraction(stats: &TradeStats) -> f64 {
    let Some(win_rate) = stats.win_rate() else {
        return 0.0;
    };

    if stats.wins == 0 {
        return -1.0;
    }

    match stats.payoff_ratio() {
        Some(ratio) => win_rate - (1.0 - win_rate) / ratio,
        // No losses recorded
        None => win_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(wins: u32, losses: u32, avg_win: f64, avg_loss: f64) -> TradeStats {
        TradeStats {
            wins,
            losses,
            gross_profit: wins as f64 * avg_win,
            gross_loss: losses as f64 * avg_loss,
        }
    }

    #[test]
    fn test_fixed_size_is_capped() {
        let policy = SizingPolicy::Fixed { position_size: 0.02 };
        assert_eq!(policy.size(0.05, &TradeStats::default()), 0.02);
        assert_eq!(policy.size(0.01, &TradeStats::default()), 0.01);
    }

    #[test]
    fn test_kelly_falls_back_until_min_trades() {
        let policy = SizingPolicy::Kelly {
            position_size: 0.1,
            fraction: 0.5,
            min_trades: 20,
        };
        // Terrible record, but too few trades to trust it
        let history = stats(1, 9, 10.0, 10.0);
        assert_eq!(policy.size(0.1, &history), 0.1);
    }

    #[test]
    fn test_half_kelly() {
        let policy = SizingPolicy::Kelly {
            position_size: 0.5,
            fraction: 0.5,
            min_trades: 20,
        };
        // W = 0.6, R = 2 -> kelly = 0.6 - 0.4 / 2 = 0.4, half = 0.2
        let history = stats(12, 8, 20.0, 10.0);
        let size = policy.size(0.5, &history);
        assert!((size - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_kelly_capped_at_position_size() {
        let policy = SizingPolicy::Kelly {
            position_size: 0.05,
            fraction: 0.5,
            min_trades: 20,
        };
        let history = stats(12, 8, 20.0, 10.0);
        assert_eq!(policy.size(0.05, &history), 0.05);
    }

    #[test]
    fn test_negative_edge_sizes_non_positive() {
        let policy = SizingPolicy::Kelly {
            position_size: 0.1,
            fraction: 0.5,
            min_trades: 20,
        };
        // W = 0.3, R = 1 -> kelly = 0.3 - 0.7 = -0.4
        let history = stats(6, 14, 10.0, 10.0);
        assert!(policy.size(0.1, &history) <= 0.0);

        let all_losses = stats(0, 20, 0.0, 10.0);
        assert!(policy.size(0.1, &all_losses) <= 0.0);
    }
}
