//! Time-weighted average over a step function of prices.

use alloy::primitives::U256;

/// Average of `samples` over `[start, end]`.
///
/// Each `(time, price)` sample holds until the next sample's time; the last
/// one holds forever. `None` when no sample overlaps the window.
pub fn compute_twap(samples: &[(u64, U256)], start: u64, end: u64) -> Option<U256> {
    let mut weighted_sum = U256::ZERO;
    let mut total_time = 0u64;

    for (i, &(time, price)) in samples.iter().enumerate() {
        if time > end {
            break;
        }
        let next_time = samples.get(i + 1).map_or(u64::MAX, |(next, _)| *next);
        let window = next_time.min(end).saturating_sub(time.max(start));
        if window == 0 {
            continue;
        }
        weighted_sum = weighted_sum.saturating_add(price.saturating_mul(U256::from(window)));
        total_time += window;
    }

    if total_time == 0 {
        return None;
    }
    Some(weighted_sum / U256::from(total_time))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(value: u64) -> U256 {
        U256::from(value)
    }

    #[test]
    fn test_constant_price() {
        let samples = vec![(100, p(7)), (150, p(7)), (300, p(7))];
        for (start, end) in [(100, 400), (120, 130), (290, 310), (500, 900)] {
            assert_eq!(compute_twap(&samples, start, end), Some(p(7)));
        }
    }

    #[test]
    fn test_weighted_average() {
        // 10 for 30s, then 40 for 10s
        let samples = vec![(0, p(10)), (30, p(40))];
        assert_eq!(compute_twap(&samples, 0, 40), Some(p(17)));
    }

    #[test]
    fn test_sample_before_window_counts_from_start() {
        let samples = vec![(0, p(10)), (100, p(20))];
        // [90, 110]: 10 for 10s, 20 for 10s
        assert_eq!(compute_twap(&samples, 90, 110), Some(p(15)));
    }

    #[test]
    fn test_window_before_first_sample() {
        let samples = vec![(100, p(10))];
        assert_eq!(compute_twap(&samples, 0, 50), None);
        assert_eq!(compute_twap(&samples, 0, 100), None);
        assert_eq!(compute_twap(&[], 0, 100), None);
    }

    #[test]
    fn test_zero_length_window() {
        let samples = vec![(0, p(10))];
        assert_eq!(compute_twap(&samples, 50, 50), None);
    }
}
