//! Poisson arrival schedules for a single time-slice.
//!
//! A slice with rate `r` fires `r` requests whose offsets from the start of
//! the slice are the running sum of `r` exponential gaps with mean `1/r`.
//! The tail is unbounded, so the last offsets of a slice may land after the
//! one-second mark.

use rand::Rng;
use rand_distr::{Distribution, Exp};
use tokio::time::Duration;

/// Ordered, non-decreasing fire offsets relative to the start of a slice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArrivalSchedule {
    offsets: Vec<Duration>,
}

impl ArrivalSchedule {
    /// Draws a schedule of `rate` arrivals from `rng`.
    ///
    /// The generator is borrowed rather than owned so a single seeded source
    /// can drive every slice of a run, which keeps runs reproducible.
    /// A rate of zero never touches the generator.
    pub fn generate<R: Rng + ?Sized>(rate: u32, rng: &mut R) -> Self {
        if rate == 0 {
            return Self::default();
        }

        // lambda is a positive finite integer, so construction cannot fail
        let gaps = match Exp::new(rate as f64) {
            Ok(exp) => exp,
            Err(_) => return Self::default(),
        };

        let mut elapsed = 0.0_f64;
        let offsets = (0..rate)
            .map(|_| {
                elapsed += gaps.sample(rng);
                Duration::from_secs_f64(elapsed)
            })
            .collect();

        Self { offsets }
    }

    /// Builds a schedule from explicit offsets, sorting them into fire order.
    pub fn from_offsets(mut offsets: Vec<Duration>) -> Self {
        offsets.sort_unstable();
        Self { offsets }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn offsets(&self) -> &[Duration] {
        &self.offsets
    }

    /// Offset of the final arrival, if any.
    pub fn last(&self) -> Option<Duration> {
        self.offsets.last().copied()
    }

    pub fn into_offsets(self) -> Vec<Duration> {
        self.offsets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn zero_rate_is_empty() {
        let mut rng = StdRng::seed_from_u64(42);
        let schedule = ArrivalSchedule::generate(0, &mut rng);
        assert!(schedule.is_empty());
        assert_eq!(schedule.last(), None);
    }

    #[test]
    fn zero_rate_does_not_consume_randomness() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);

        let _ = ArrivalSchedule::generate(0, &mut a);
        assert_eq!(
            ArrivalSchedule::generate(5, &mut a),
            ArrivalSchedule::generate(5, &mut b)
        );
    }

    #[test]
    fn schedule_has_one_offset_per_request() {
        let mut rng = StdRng::seed_from_u64(42);
        for rate in [1, 5, 17, 250] {
            assert_eq!(ArrivalSchedule::generate(rate, &mut rng).len(), rate as usize);
        }
    }

    #[test]
    fn offsets_are_non_decreasing() {
        let mut rng = StdRng::seed_from_u64(42);
        for rate in 1..200 {
            let schedule = ArrivalSchedule::generate(rate, &mut rng);
            assert!(
                schedule.offsets().windows(2).all(|w| w[0] <= w[1]),
                "rate {} produced an unordered schedule",
                rate
            );
        }
    }

    #[test]
    fn same_seed_reproduces_schedules() {
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        for rate in [3, 10, 40] {
            assert_eq!(
                ArrivalSchedule::generate(rate, &mut a),
                ArrivalSchedule::generate(rate, &mut b)
            );
        }
    }

    #[test]
    fn mean_spacing_converges_to_inverse_rate() {
        let mut rng = StdRng::seed_from_u64(42);
        let rate = 20_000;
        let schedule = ArrivalSchedule::generate(rate, &mut rng);

        let mean_gap = schedule.last().unwrap().as_secs_f64() / rate as f64;
        let expected = 1.0 / rate as f64;
        let relative_error = (mean_gap - expected).abs() / expected;
        assert!(
            relative_error < 0.05,
            "mean gap {} too far from {}",
            mean_gap,
            expected
        );
    }

    #[test]
    fn small_rate_spacing_averages_out_over_many_slices() {
        let mut rng = StdRng::seed_from_u64(42);
        let rate = 5;
        let slices = 4_000;

        let total: f64 = (0..slices)
            .map(|_| {
                ArrivalSchedule::generate(rate, &mut rng)
                    .last()
                    .unwrap()
                    .as_secs_f64()
            })
            .sum();
        let mean_gap = total / (slices * rate) as f64;
        assert!((mean_gap - 0.2).abs() < 0.01, "mean gap was {}", mean_gap);
    }

    #[test]
    fn explicit_offsets_are_sorted() {
        let schedule = ArrivalSchedule::from_offsets(vec![
            Duration::from_millis(300),
            Duration::from_millis(10),
            Duration::from_millis(120),
        ]);
        assert_eq!(
            schedule.offsets(),
            &[
                Duration::from_millis(10),
                Duration::from_millis(120),
                Duration::from_millis(300)
            ]
        );
    }
}
