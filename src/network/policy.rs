//! Weighted coin flips for packet loss and reordering.

use crate::rng::Rng;

/// Decides whether a packet is lost or reordered.
///
/// Each decision is one uniform draw in `[0, 1)` compared against the
/// probability. A probability of zero short-circuits without touching the
/// random source, so enabling one impairment does not shift the random
/// sequence seen by the other.
#[derive(Debug, Clone)]
pub struct ImpairmentPolicy<R> {
    rng: R,
}

impl<R: Rng> ImpairmentPolicy<R> {
    /// Creates a policy drawing from `rng`.
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Returns `true` if the packet should be treated as lost.
    pub fn should_drop(&mut self, loss_probability: f64) -> bool {
        self.flip(loss_probability)
    }

    /// Returns `true` if the packet should be placed out of order.
    pub fn should_reorder(&mut self, reorder_probability: f64) -> bool {
        self.flip(reorder_probability)
    }

    /// Replaces the random source, e.g. to reseed after a config change.
    pub fn set_rng(&mut self, rng: R) {
        self.rng = rng;
    }

    fn flip(&mut self, probability: f64) -> bool {
        probability > 0.0 && self.rng.gen::<f64>() < probability
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::rng::{Pcg32, SeedableRng};

    /// Counts draws so tests can see when randomness is consumed.
    struct CountingRng {
        inner: Pcg32,
        draws: usize,
    }

    impl Rng for CountingRng {
        fn next_u32(&mut self) -> u32 {
            self.draws += 1;
            self.inner.next_u32()
        }

        fn next_u64(&mut self) -> u64 {
            self.draws += 1;
            self.inner.next_u64()
        }
    }

    fn counting() -> ImpairmentPolicy<CountingRng> {
        ImpairmentPolicy::new(CountingRng {
            inner: Pcg32::seed_from_u64(1),
            draws: 0,
        })
    }

    #[test]
    fn test_zero_probability_never_fires_or_draws() {
        let mut policy = counting();
        for _ in 0..100 {
            assert!(!policy.should_drop(0.0));
            assert!(!policy.should_reorder(0.0));
        }
        assert_eq!(policy.rng.draws, 0);
    }

    #[test]
    fn test_certain_probability_always_fires() {
        let mut policy = ImpairmentPolicy::new(Pcg32::seed_from_u64(2));
        for _ in 0..1000 {
            assert!(policy.should_drop(1.0));
            assert!(policy.should_reorder(1.0));
        }
    }

    #[test]
    fn test_each_decision_draws_once() {
        let mut policy = counting();
        let _ = policy.should_drop(0.5);
        let _ = policy.should_reorder(0.5);
        assert_eq!(policy.rng.draws, 2);
    }

    #[test]
    fn test_half_probability_is_roughly_half() {
        let mut policy = ImpairmentPolicy::new(Pcg32::seed_from_u64(42));
        let hits = (0..1000).filter(|_| policy.should_drop(0.5)).count();
        assert!(hits > 400, "Expected more drops, got {}", hits);
        assert!(hits < 600, "Expected fewer drops, got {}", hits);
    }

    #[test]
    fn test_same_seed_same_decisions() {
        let run = |seed| {
            let mut policy = ImpairmentPolicy::new(Pcg32::seed_from_u64(seed));
            (0..64)
                .map(|_| policy.should_reorder(0.3))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(9), run(9));
        assert_ne!(run(9), run(10));
    }

    #[test]
    fn test_set_rng_restarts_the_decision_sequence() {
        let mut policy = ImpairmentPolicy::new(Pcg32::seed_from_u64(5));
        let first: Vec<bool> = (0..64).map(|_| policy.should_drop(0.5)).collect();
        let carried_on: Vec<bool> = (0..64).map(|_| policy.should_drop(0.5)).collect();
        assert_ne!(first, carried_on);

        policy.set_rng(Pcg32::seed_from_u64(5));
        let replayed: Vec<bool> = (0..64).map(|_| policy.should_drop(0.5)).collect();
        assert_eq!(first, replayed);
    }
}
