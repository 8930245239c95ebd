//! Object location entries.

use crate::types::ServerId;

/// Radius assumed for an object whose real extent is unknown.
pub const DEFAULT_OBJECT_RADIUS: f32 = 1.0;

/// Where an object lives: the owning server and the object's radius.
///
/// A null entry (null server) means the location is unknown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationEntry {
    server: ServerId,
    radius: f32,
}

impl LocationEntry {
    /// Creates an entry for an object owned by `server`.
    #[must_use]
    pub const fn new(server: ServerId, radius: f32) -> Self {
        Self { server, radius }
    }

    /// The "unknown location" sentinel.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            server: ServerId::NULL,
            radius: 0.0,
        }
    }

    /// Owning server.
    #[must_use]
    pub const fn server(&self) -> ServerId {
        self.server
    }

    /// Object radius.
    #[must_use]
    pub const fn radius(&self) -> f32 {
        self.radius
    }

    /// True if this is the unknown-location sentinel.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.server.is_null()
    }

    /// Converts to `None` if null.
    #[must_use]
    pub const fn known(self) -> Option<Self> {
        if self.is_null() {
            None
        } else {
            Some(self)
        }
    }
}

impl Default for LocationEntry {
    fn default() -> Self {
        Self::null()
    }
}
