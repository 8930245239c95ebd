//! Strongly-typed identifiers for Meridian entities.
//!
//! Servers, objects and messages are all 64-bit identifiers. Wrapping them
//! keeps a `ServerId` from ever being passed where an `ObjectId` is expected.

use std::fmt;

/// Declares a `u64` newtype id with a reserved null value of zero.
macro_rules! define_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// The reserved null identifier.
            pub const NULL: Self = Self(0);

            /// Creates a new ID from a raw u64 value.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Returns true for the reserved null identifier.
            #[inline]
            #[must_use]
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }

            /// Returns the following id, wrapping past `u64::MAX` to 1 so the
            /// null id is never produced.
            #[inline]
            #[must_use]
            pub const fn next(self) -> Self {
                match self.0.checked_add(1) {
                    Some(raw) => Self(raw),
                    None => Self(1),
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.get()
            }
        }
    };
}

define_id!(ServerId, "server", "Identifier of a space server owning a region of the world.");
define_id!(ObjectId, "object", "Identifier of a simulated object. The null object is the space itself.");
define_id!(MessageId, "msg", "Identifier of a single transmitted message, used for tracing.");

impl ObjectId {
    /// The space-control object. Messages addressed here are handled by the
    /// receiving server and never scheduled.
    pub const SPACE: Self = Self::NULL;
}
