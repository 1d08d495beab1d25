//! Technical indicators over closing prices.
//!
//! Outputs are aligned with the input: position `i` of the result describes
//! position `i` of the price slice, and positions without enough history are
//! `None` rather than zero.

pub const DEFAULT_SMA_WINDOW: usize = 20;
pub const DEFAULT_RSI_PERIOD: usize = 14;

/// RSI reported when there was no price movement at all over the period.
const NEUTRAL_RSI: f64 = 50.0;

/// Arithmetic mean of the `window` closes ending at each position.
pub fn simple_moving_average(closes: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; closes.len()];
    }

    let mut out = vec![None; closes.len()];
    for (end, slice) in closes.windows(window).enumerate() {
        out[end + window - 1] = Some(slice.iter().sum::<f64>() / window as f64);
    }
    out
}

/// Relative strength index using simple means of gains and losses over the
/// last `period` deltas.
///
/// Fewer than two closes yields an empty vector since no delta exists.
/// A window with no losses reads 100 when it had gains and 50 when it was flat.
pub fn relative_strength_index(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    if closes.len() < 2 || period == 0 {
        return Vec::new();
    }

    // deltas[k] is the move into closes[k + 1]
    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let mut out = vec![None; closes.len()];
    for (start, window) in deltas.windows(period).enumerate() {
        let (gain, loss) = window.iter().fold((0.0, 0.0), |(g, l), &d| {
            if d > 0.0 {
                (g + d, l)
            } else {
                (g, l - d)
            }
        });
        let avg_gain = gain / period as f64;
        let avg_loss = loss / period as f64;

        out[start + period] = Some(rsi_from_averages(avg_gain, avg_loss));
    }
    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain > 0.0 { 100.0 } else { NEUTRAL_RSI }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// Most recent defined value of an aligned indicator series.
pub fn latest(values: &[Option<f64>]) -> Option<f64> {
    values.iter().rev().find_map(|v| *v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_sma_leading_positions_are_absent() {
        let sma = simple_moving_average(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(sma.len(), 5);
        assert_eq!(sma[0], None);
        assert_eq!(sma[1], None);
        assert!(approx(sma[2].unwrap(), 2.0));
        assert!(approx(sma[3].unwrap(), 3.0));
        assert!(approx(sma[4].unwrap(), 4.0));
    }

    #[test]
    fn test_sma_window_longer_than_series() {
        let sma = simple_moving_average(&[1.0, 2.0], 20);
        assert_eq!(sma, vec![None, None]);
        assert_eq!(latest(&sma), None);
    }

    #[test]
    fn test_rsi_short_series_is_empty() {
        assert!(relative_strength_index(&[], 14).is_empty());
        assert!(relative_strength_index(&[101.5], 14).is_empty());
    }

    #[test]
    fn test_rsi_without_losses_is_100() {
        // 14 rises in a row
        let closes: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        let rsi = relative_strength_index(&closes, 14);
        assert_eq!(rsi.len(), 15);
        assert!(rsi[..14].iter().all(Option::is_none));
        assert_eq!(rsi[14], Some(100.0));
    }

    #[test]
    fn test_rsi_without_gains_or_losses_is_neutral() {
        let closes = vec![42.0; 15];
        let rsi = relative_strength_index(&closes, 14);
        assert_eq!(latest(&rsi), Some(50.0));
    }

    #[test]
    fn test_rsi_mixed_moves() {
        // deltas: +2, -1, +2, -1 => avg gain 1.0, avg loss 0.5 => rs 2
        let closes = [10.0, 12.0, 11.0, 13.0, 12.0];
        let rsi = relative_strength_index(&closes, 4);
        let expected = 100.0 - 100.0 / 3.0;
        assert!(approx(rsi[4].unwrap(), expected));
    }

    #[test]
    fn test_rsi_only_losses_is_zero() {
        let closes = [5.0, 4.0, 3.0];
        let rsi = relative_strength_index(&closes, 2);
        assert!(approx(rsi[2].unwrap(), 0.0));
    }

    #[test]
    fn test_rsi_series_shorter_than_period_has_no_values() {
        let rsi = relative_strength_index(&[1.0, 2.0, 3.0], 14);
        assert_eq!(rsi.len(), 3);
        assert_eq!(latest(&rsi), None);
    }
}
