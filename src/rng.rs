//! Seedable random number generation for impairment decisions.
//!
//! Loss and reorder decisions only need a uniform draw in `[0, 1)`, but the
//! draw must be reproducible when a test pins a seed. This module provides a
//! small PCG32 generator and the [`Rng`] trait the simulation is generic over,
//! so tests can also plug in a scripted source.
//!
//! # PCG32 Algorithm
//!
//! PCG (Permuted Congruential Generator) is a family of simple fast space-efficient
//! statistically good algorithms for random number generation. PCG32 specifically:
//! - Has 64 bits of state, producing 32-bit output
//! - Period of 2^64
//! - Passes TestU01 statistical tests
//!
//! Reference: <https://www.pcg-random.org/>
//!
//! # Usage
//!
//! ```rust
//! use latency_transport::rng::{Pcg32, Rng, SeedableRng};
//!
//! let mut rng = Pcg32::seed_from_u64(12345);
//! let draw: f64 = rng.gen();
//! assert!((0.0..1.0).contains(&draw));
//! ```

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

/// PCG32 random number generator.
///
/// A minimal implementation of the PCG-XSH-RR variant with 64-bit state.
/// NOT cryptographically secure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pcg32 {
    state: u64,
    inc: u64,
}

/// Default increment for single-stream PCG32.
const PCG_DEFAULT_INCREMENT: u64 = 1442695040888963407;

/// Multiplier constant for the LCG step.
const PCG_MULTIPLIER: u64 = 6364136223846793005;

impl Pcg32 {
    /// Creates a new PCG32 generator with the given state and stream.
    ///
    /// The increment is derived from `stream` and is always odd.
    #[must_use]
    pub const fn new(state: u64, stream: u64) -> Self {
        let inc = (stream << 1) | 1;
        // Standard PCG seeding: step, add the initial state, step again.
        let mut pcg = Self { state: 0, inc };
        pcg.state = pcg.state.wrapping_mul(PCG_MULTIPLIER).wrapping_add(pcg.inc);
        pcg.state = pcg.state.wrapping_add(state);
        pcg.state = pcg.state.wrapping_mul(PCG_MULTIPLIER).wrapping_add(pcg.inc);
        pcg
    }

    /// Generates the next 32-bit random value.
    #[inline]
    #[must_use]
    pub fn next_u32(&mut self) -> u32 {
        let old_state = self.state;
        self.state = old_state
            .wrapping_mul(PCG_MULTIPLIER)
            .wrapping_add(self.inc);
        // XSH-RR output permutation
        let xorshifted = (((old_state >> 18) ^ old_state) >> 27) as u32;
        let rot = (old_state >> 59) as u32;
        xorshifted.rotate_right(rot)
    }

    /// Generates the next 64-bit random value by combining two 32-bit values.
    #[inline]
    #[must_use]
    pub fn next_u64(&mut self) -> u64 {
        let high = u64::from(self.next_u32());
        let low = u64::from(self.next_u32());
        (high << 32) | low
    }
}

/// Trait for seeding random number generators.
pub trait SeedableRng: Sized {
    /// Creates a new RNG seeded from a 64-bit value.
    #[must_use]
    fn seed_from_u64(seed: u64) -> Self;

    /// Creates a new RNG with a non-reproducible seed.
    #[must_use]
    fn from_entropy() -> Self;
}

impl SeedableRng for Pcg32 {
    fn seed_from_u64(seed: u64) -> Self {
        Self::new(seed, PCG_DEFAULT_INCREMENT)
    }

    fn from_entropy() -> Self {
        Self::seed_from_u64(entropy_seed())
    }
}

/// Source of random bits.
///
/// Only [`next_u64`](Rng::next_u64) is needed by the impairment policy (via
/// the `f64` conversion); `next_u32` is kept for completeness.
pub trait Rng {
    /// Returns the next 32-bit random value.
    fn next_u32(&mut self) -> u32;

    /// Returns the next 64-bit random value.
    fn next_u64(&mut self) -> u64;

    /// Generates a random value of type `T`.
    fn gen<T: RandomValue>(&mut self) -> T {
        T::random(self)
    }
}

impl Rng for Pcg32 {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        Self::next_u32(self)
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        Self::next_u64(self)
    }
}

impl<R: Rng + ?Sized> Rng for Box<R> {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        (**self).next_u32()
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        (**self).next_u64()
    }
}

/// Trait for types that can be randomly generated.
pub trait RandomValue {
    /// Generates a random value of this type.
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self;
}

impl RandomValue for f64 {
    /// Generates a random `f64` in the range `[0.0, 1.0)`.
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        // Upper 53 bits (f64 mantissa precision)
        let val = rng.next_u64() >> 11;
        val as Self / (1u64 << 53) as Self
    }
}

/// Builds a seed that differs between processes, threads and calls.
///
/// `RandomState` carries per-process random keys; the wall clock and thread
/// identity are mixed in on top. Not suitable for anything security related.
fn entropy_seed() -> u64 {
    let mut hasher = RandomState::new().build_hasher();
    std::thread::current().id().hash(&mut hasher);
    if let Ok(since_epoch) = web_time::SystemTime::now().duration_since(web_time::UNIX_EPOCH) {
        since_epoch.as_nanos().hash(&mut hasher);
    }
    hasher.finish().wrapping_add(0x9e3779b97f4a7c15)
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

    #[test]
    fn test_pcg32_deterministic() {
        let mut rng1 = Pcg32::seed_from_u64(12345);
        let mut rng2 = Pcg32::seed_from_u64(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u32(), rng2.next_u32());
        }
    }

    #[test]
    fn test_pcg32_different_seeds() {
        let mut rng1 = Pcg32::seed_from_u64(12345);
        let mut rng2 = Pcg32::seed_from_u64(54321);

        let mut same_count = 0;
        for _ in 0..100 {
            if rng1.next_u32() == rng2.next_u32() {
                same_count += 1;
            }
        }
        assert!(same_count < 10);
    }

    #[test]
    fn test_f64_in_unit_interval() {
        let mut rng = Pcg32::seed_from_u64(7);
        for _ in 0..10_000 {
            let v: f64 = rng.gen();
            assert!((0.0..1.0).contains(&v), "draw {v} outside [0, 1)");
        }
    }

    #[test]
    fn test_f64_mean_is_roughly_half() {
        let mut rng = Pcg32::seed_from_u64(99);
        let n = 20_000;
        let sum: f64 = (0..n).map(|_| rng.gen::<f64>()).sum();
        let mean = sum / f64::from(n);
        assert!((0.45..0.55).contains(&mean), "mean {mean}");
    }

    #[test]
    fn test_boxed_rng_forwards() {
        let mut plain = Pcg32::seed_from_u64(3);
        let mut boxed: Box<Pcg32> = Box::new(Pcg32::seed_from_u64(3));
        for _ in 0..10 {
            assert_eq!(Rng::next_u64(&mut plain), boxed.next_u64());
        }
    }

    #[test]
    fn test_from_entropy_produces_values() {
        let mut a = Pcg32::from_entropy();
        let mut b = Pcg32::from_entropy();
        // Two entropy seeded generators agreeing on 8 draws would be astonishing.
        let same = (0..8).all(|_| a.next_u32() == b.next_u32());
        assert!(!same);
    }
}
