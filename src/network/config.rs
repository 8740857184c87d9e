//! Configuration for the impairment simulation and statistics.
//!
//! | Setting | Range | Default |
//! |---------|-------|---------|
//! | `simulate` | bool | `true` |
//! | `latency` | `0 ..= 60 s` | `0` |
//! | `packet_loss` | `0.0 ..= 1.0` | `0.0` |
//! | `out_of_order` | `0.0 ..= 1.0` | `0.0` |
//! | `show_statistics` | bool | `true` |
//! | `rotation` | `0 < interval <= 1 h` | every second |
//!
//! Out-of-range values are rejected with
//! [`LatencyError::ConfigValueOutOfRange`]; nothing is clamped.
//!
//! # Example
//!
//! ```
//! use latency_transport::SimulationConfig;
//!
//! let config = SimulationConfig::builder()
//!     .latency_ms(80)
//!     .packet_loss(0.02)
//!     .build()
//!     .unwrap();
//! assert!(config.validate().is_ok());
//!
//! assert!(SimulationConfig::builder().packet_loss(1.5).build().is_err());
//! assert!(SimulationConfig::builder().latency_secs(-0.1).build().is_err());
//! ```

use serde::{Deserialize, Serialize};
use tracing::warn;
use web_time::Duration;

use crate::{LatencyError, LatencyResult, MAX_LATENCY, MAX_ROTATION_INTERVAL};

/// When the statistics window is rotated into the readable snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RotationPolicy {
    /// Rotate each time the accumulated time reaches the interval. The
    /// remainder carries over, so the cadence does not drift.
    Interval(Duration),
    /// Rotate whenever `accumulated % 60 s >= 1 s`, then restart from zero.
    ///
    /// This is the historical behaviour. It mostly fires once per second but
    /// a single frame delta landing in `[60 s, 61 s)` does not rotate.
    LegacyModulo,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::Interval(Duration::from_secs(1))
    }
}

/// Settings for the impairment simulation.
///
/// Build with [`SimulationConfig::builder()`] or start from a preset. Use
/// [`validate`](Self::validate) when constructing the struct directly.
///
/// # Forward Compatibility
///
/// New fields may be added in future versions. Use the
/// `..SimulationConfig::default()` pattern when constructing instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Master switch. When `false` every send goes straight to the wrapped
    /// transport. (default: `true`)
    pub simulate: bool,

    /// One-way delay added to every outbound packet. When a process is both
    /// client and server the delay applies on each side, so a loopback round
    /// experiences it twice. (default: 0)
    pub latency: Duration,

    /// Probability that a packet is lost. Lost unreliable packets are
    /// discarded; lost reliable packets are delayed by one extra `latency` to
    /// stand in for the resend. (default: 0.0)
    pub packet_loss: f64,

    /// Probability that an unreliable packet overtakes the packet queued
    /// before it. (default: 0.0)
    pub out_of_order: f64,

    /// Whether send/receive statistics are collected. (default: `true`)
    pub show_statistics: bool,

    /// How the statistics window rotates.
    pub rotation: RotationPolicy,

    /// Seed for impairment decisions; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            simulate: true,
            latency: Duration::ZERO,
            packet_loss: 0.0,
            out_of_order: 0.0,
            show_statistics: true,
            rotation: RotationPolicy::default(),
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Creates a new builder for fluent configuration.
    pub fn builder() -> SimulationConfigBuilder {
        SimulationConfigBuilder::new()
    }

    /// No impairment at all; statistics are still collected.
    pub fn passthrough() -> Self {
        Self {
            simulate: false,
            ..Self::default()
        }
    }

    /// Constant added latency and nothing else.
    ///
    /// Values above 60 000 ms produce a config that fails
    /// [`validate`](Self::validate).
    pub fn high_latency(latency_ms: u64) -> Self {
        Self {
            latency: Duration::from_millis(latency_ms),
            ..Self::default()
        }
    }

    /// Packet loss only.
    pub fn lossy(packet_loss: f64) -> Self {
        Self {
            packet_loss,
            ..Self::default()
        }
    }

    /// Typical poor home connection.
    pub fn poor_network() -> Self {
        Self {
            latency: Duration::from_millis(100),
            packet_loss: 0.05,
            out_of_order: 0.05,
            ..Self::default()
        }
    }

    /// Very bad connection.
    pub fn terrible_network() -> Self {
        Self {
            latency: Duration::from_millis(250),
            packet_loss: 0.15,
            out_of_order: 0.1,
            ..Self::default()
        }
    }

    /// Latency in seconds, as used for release-time arithmetic.
    #[inline]
    #[must_use]
    pub fn latency_secs(&self) -> f64 {
        self.latency.as_secs_f64()
    }

    /// Validates every setting.
    ///
    /// # Errors
    ///
    /// Returns [`LatencyError::ConfigValueOutOfRange`] for the first value
    /// outside its range.
    pub fn validate(&self) -> LatencyResult<()> {
        validate_latency(self.latency.as_secs_f64())?;
        validate_probability("packet_loss", self.packet_loss)?;
        validate_probability("out_of_order", self.out_of_order)?;
        validate_rotation(self.rotation)?;
        Ok(())
    }
}

pub(crate) fn validate_latency(seconds: f64) -> LatencyResult<()> {
    let max = MAX_LATENCY.as_secs_f64();
    if !seconds.is_finite() || !(0.0..=max).contains(&seconds) {
        return Err(reject("latency", 0.0, max, seconds));
    }
    Ok(())
}

pub(crate) fn validate_probability(field: &'static str, value: f64) -> LatencyResult<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(reject(field, 0.0, 1.0, value));
    }
    Ok(())
}

fn validate_rotation(rotation: RotationPolicy) -> LatencyResult<()> {
    match rotation {
        RotationPolicy::Interval(interval)
            if interval.is_zero() || interval > MAX_ROTATION_INTERVAL =>
        {
            Err(reject(
                "rotation",
                f64::MIN_POSITIVE,
                MAX_ROTATION_INTERVAL.as_secs_f64(),
                interval.as_secs_f64(),
            ))
        },
        _ => Ok(()),
    }
}

fn reject(field: &'static str, min: f64, max: f64, actual: f64) -> LatencyError {
    warn!(field, actual, min, max, "rejected simulation setting");
    LatencyError::ConfigValueOutOfRange {
        field,
        min,
        max,
        actual,
    }
}

/// Latency as handed to the builder, converted at `build` time.
#[derive(Debug, Clone, Copy)]
enum LatencyInput {
    Exact(Duration),
    Millis(i64),
    Seconds(f64),
}

/// Builder for [`SimulationConfig`].
///
/// Latency is kept as given until [`build`](Self::build) so that negative or
/// non-finite values are reported instead of panicking in [`Duration`]
/// conversion.
#[derive(Debug, Clone)]
pub struct SimulationConfigBuilder {
    config: SimulationConfig,
    latency: LatencyInput,
}

impl Default for SimulationConfigBuilder {
    fn default() -> Self {
        Self {
            config: SimulationConfig::default(),
            latency: LatencyInput::Exact(Duration::ZERO),
        }
    }
}

impl SimulationConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Turns the simulation on or off.
    pub fn simulate(mut self, simulate: bool) -> Self {
        self.config.simulate = simulate;
        self
    }

    /// Sets the one-way latency.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = LatencyInput::Exact(latency);
        self
    }

    /// Sets the latency in milliseconds. Negative values fail at `build`.
    pub fn latency_ms(mut self, ms: i64) -> Self {
        self.latency = LatencyInput::Millis(ms);
        self
    }

    /// Sets the latency in seconds. Negative or non-finite values fail at `build`.
    pub fn latency_secs(mut self, seconds: f64) -> Self {
        self.latency = LatencyInput::Seconds(seconds);
        self
    }

    /// Sets the packet loss probability.
    pub fn packet_loss(mut self, probability: f64) -> Self {
        self.config.packet_loss = probability;
        self
    }

    /// Sets the out-of-order probability for unreliable packets.
    pub fn out_of_order(mut self, probability: f64) -> Self {
        self.config.out_of_order = probability;
        self
    }

    /// Enables or disables statistics collection.
    pub fn show_statistics(mut self, show: bool) -> Self {
        self.config.show_statistics = show;
        self
    }

    /// Sets the statistics rotation policy.
    pub fn rotation(mut self, rotation: RotationPolicy) -> Self {
        self.config.rotation = rotation;
        self
    }

    /// Sets the random seed for deterministic behavior.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LatencyError::ConfigValueOutOfRange`] if any value is out of range.
    pub fn build(self) -> LatencyResult<SimulationConfig> {
        let latency = match self.latency {
            LatencyInput::Exact(latency) => latency,
            LatencyInput::Millis(ms) => {
                validate_latency(ms as f64 / 1000.0)?;
                Duration::from_millis(ms.unsigned_abs())
            },
            LatencyInput::Seconds(seconds) => {
                validate_latency(seconds)?;
                Duration::from_secs_f64(seconds)
            },
        };
        let config = SimulationConfig {
            latency,
            ..self.config
        };
        config.validate()?;
        Ok(config)
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

    #[test]
    fn test_default_is_inert() {
        let config = SimulationConfig::default();
        assert!(config.simulate);
        assert_eq!(config.latency, Duration::ZERO);
        assert_eq!(config.packet_loss, 0.0);
        assert_eq!(config.out_of_order, 0.0);
        assert!(config.show_statistics);
        assert_eq!(config.rotation, RotationPolicy::Interval(Duration::from_secs(1)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_sets_values() {
        let config = SimulationConfig::builder()
            .simulate(true)
            .latency_ms(150)
            .packet_loss(0.1)
            .out_of_order(0.2)
            .show_statistics(false)
            .rotation(RotationPolicy::LegacyModulo)
            .seed(7)
            .build()
            .unwrap();

        assert_eq!(config.latency, Duration::from_millis(150));
        assert_eq!(config.latency_secs(), 0.15);
        assert_eq!(config.packet_loss, 0.1);
        assert_eq!(config.out_of_order, 0.2);
        assert!(!config.show_statistics);
        assert_eq!(config.rotation, RotationPolicy::LegacyModulo);
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn test_rejects_negative_latency() {
        let err = SimulationConfig::builder().latency_ms(-1).build().unwrap_err();
        assert!(matches!(
            err,
            LatencyError::ConfigValueOutOfRange {
                field: "latency",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_latency_above_cap() {
        assert!(SimulationConfig::builder().latency_ms(60_000).build().is_ok());
        assert!(SimulationConfig::builder().latency_ms(60_001).build().is_err());
        assert!(SimulationConfig::high_latency(60_001).validate().is_err());
    }

    #[test]
    fn test_rejects_non_finite_latency() {
        assert!(SimulationConfig::builder().latency_secs(f64::NAN).build().is_err());
        assert!(SimulationConfig::builder()
            .latency_secs(f64::INFINITY)
            .build()
            .is_err());
    }

    #[test]
    fn test_rejects_out_of_range_probabilities() {
        for bad in [-0.01, 1.01, f64::NAN] {
            let err = SimulationConfig::builder().packet_loss(bad).build().unwrap_err();
            assert!(matches!(
                err,
                LatencyError::ConfigValueOutOfRange {
                    field: "packet_loss",
                    ..
                }
            ));
            let err = SimulationConfig::builder().out_of_order(bad).build().unwrap_err();
            assert!(matches!(
                err,
                LatencyError::ConfigValueOutOfRange {
                    field: "out_of_order",
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_probability_bounds_are_inclusive() {
        assert!(SimulationConfig::builder()
            .packet_loss(1.0)
            .out_of_order(1.0)
            .build()
            .is_ok());
        assert!(SimulationConfig::builder()
            .packet_loss(0.0)
            .out_of_order(0.0)
            .build()
            .is_ok());
    }

    #[test]
    fn test_rejects_zero_rotation_interval() {
        let config = SimulationConfig {
            rotation: RotationPolicy::Interval(Duration::ZERO),
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rotation_interval_has_its_own_cap() {
        let minutes = SimulationConfig {
            rotation: RotationPolicy::Interval(MAX_LATENCY * 5),
            ..SimulationConfig::default()
        };
        assert!(minutes.validate().is_ok());

        let at_cap = SimulationConfig {
            rotation: RotationPolicy::Interval(MAX_ROTATION_INTERVAL),
            ..SimulationConfig::default()
        };
        assert!(at_cap.validate().is_ok());

        let too_long = SimulationConfig {
            rotation: RotationPolicy::Interval(MAX_ROTATION_INTERVAL + Duration::from_millis(1)),
            ..SimulationConfig::default()
        };
        assert!(matches!(
            too_long.validate(),
            Err(LatencyError::ConfigValueOutOfRange { field: "rotation", .. })
        ));
    }

    #[test]
    fn test_presets_are_valid() {
        for config in [
            SimulationConfig::passthrough(),
            SimulationConfig::high_latency(200),
            SimulationConfig::lossy(0.3),
            SimulationConfig::poor_network(),
            SimulationConfig::terrible_network(),
        ] {
            assert!(config.validate().is_ok(), "{:?}", config);
        }
        assert!(!SimulationConfig::passthrough().simulate);
        assert_eq!(
            SimulationConfig::terrible_network().latency,
            Duration::from_millis(250)
        );
    }
}
