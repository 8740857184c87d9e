use std::error::Error;
use std::fmt;
use std::fmt::Display;

/// This enum contains all error messages this library can return on its own.
///
/// Errors raised by the wrapped transport are never converted into a
/// `LatencyError`; they are handed back unchanged as the transport's own
/// [`Transport::Error`](crate::Transport::Error).
#[derive(Debug, Clone, PartialEq)]
pub enum LatencyError {
    /// A simulation setting was outside of its documented range.
    ///
    /// Configuration is validated when it is set, never clamped.
    ConfigValueOutOfRange {
        /// The name of the offending setting.
        field: &'static str,
        /// Smallest accepted value (inclusive).
        min: f64,
        /// Largest accepted value (inclusive).
        max: f64,
        /// The rejected value.
        actual: f64,
    },
    /// A raw channel id did not map to a known [`ChannelKind`](crate::ChannelKind).
    InvalidChannel {
        /// The rejected channel id.
        channel_id: u8,
    },
}

impl Display for LatencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigValueOutOfRange {
                field,
                min,
                max,
                actual,
            } => {
                write!(
                    f,
                    "Configuration value `{}` out of range: {} (expected {} ..= {})",
                    field, actual, min, max
                )
            },
            Self::InvalidChannel { channel_id } => {
                write!(
                    f,
                    "Invalid channel id {}: expected 0 (reliable) or 1 (unreliable)",
                    channel_id
                )
            },
        }
    }
}

impl Error for LatencyError {}

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
    fn test_config_out_of_range_display() {
        let err = LatencyError::ConfigValueOutOfRange {
            field: "packet_loss",
            min: 0.0,
            max: 1.0,
            actual: 1.5,
        };
        let display = err.to_string();
        assert!(display.contains("packet_loss"));
        assert!(display.contains("1.5"));
        assert!(display.contains("0 ..= 1"));
    }

    #[test]
    fn test_invalid_channel_display() {
        let err = LatencyError::InvalidChannel { channel_id: 7 };
        assert!(err.to_string().contains("Invalid channel id 7"));
    }

    #[test]
    fn test_error_is_std_error() {
        let err: Box<dyn Error> = Box::new(LatencyError::InvalidChannel { channel_id: 2 });
        assert!(err.source().is_none());
    }
}
