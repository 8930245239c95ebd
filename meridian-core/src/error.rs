//! Validation failures for settings and message sizes.

use std::fmt;

/// Shorthand for results carrying a core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Rejections raised before a value enters a forwarder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A limit or tuning knob holds an unusable value.
    InvalidSetting {
        /// Dotted path of the setting, e.g. `link_sender.messages_per_round`.
        setting: &'static str,
        /// What the value has to satisfy.
        requirement: &'static str,
    },

    /// An object message is larger than the configured maximum.
    MessageTooLarge {
        /// `max_object_message_bytes` at the time of the check.
        max_bytes: u32,
        /// Wire size of the rejected message.
        actual_bytes: u32,
    },
}

impl Error {
    /// Builds an [`Error::InvalidSetting`] for a value that must be above zero.
    #[must_use]
    pub const fn not_positive(setting: &'static str) -> Self {
        Self::InvalidSetting {
            setting,
            requirement: "must be positive",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSetting {
                setting,
                requirement,
            } => write!(f, "setting {setting} {requirement}"),
            Self::MessageTooLarge {
                max_bytes,
                actual_bytes,
            } => write!(
                f,
                "object message of {actual_bytes} bytes exceeds the {max_bytes} byte maximum"
            ),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_too_large_names_both_sizes() {
        let err = Error::MessageTooLarge {
            max_bytes: 1024,
            actual_bytes: 2048,
        };
        assert_eq!(
            err.to_string(),
            "object message of 2048 bytes exceeds the 1024 byte maximum"
        );
    }

    #[test]
    fn test_not_positive() {
        let err = Error::not_positive("maintenance_interval_us");
        assert_eq!(err.to_string(), "setting maintenance_interval_us must be positive");
    }
}
