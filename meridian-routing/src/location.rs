//! The location service seam.
//!
//! The forwarder asks a [`LocationService`] where an object lives. Answers
//! arrive later, as a task posted to the forwarder's strand, so a service
//! backed by a remote directory and one backed by a local table look the
//! same to the forwarder.

use std::collections::HashMap;
use std::sync::Arc;

use meridian_core::{LocationEntry, ObjectId};
use parking_lot::RwLock;

use crate::strand::{ForwarderTask, StrandHandle};

/// Completion handle for one authoritative lookup.
///
/// Consuming it posts the answer to the forwarder. Dropping it without an
/// answer leaves the lookup to the forwarder's timeout.
#[derive(Debug)]
pub struct LookupReply {
    object: ObjectId,
    strand: StrandHandle,
}

impl LookupReply {
    pub(crate) const fn new(object: ObjectId, strand: StrandHandle) -> Self {
        Self { object, strand }
    }

    /// The object being looked up.
    #[must_use]
    pub const fn object(&self) -> ObjectId {
        self.object
    }

    /// Reports where the object lives.
    pub fn resolve(self, location: LocationEntry) {
        self.strand.post(ForwarderTask::LookupResolved {
            object: self.object,
            location,
        });
    }

    /// Reports that the object is unknown.
    pub fn not_found(self) {
        self.resolve(LocationEntry::null());
    }
}

/// Resolves object ids to their owning server.
pub trait LocationService: Send {
    /// Starts an authoritative lookup. Returns false if the service refused
    /// it, in which case `reply` has been dropped unused.
    fn lookup(&mut self, object: ObjectId, reply: LookupReply) -> bool;

    /// Returns the service's local, possibly stale, view of the object.
    fn cache_lookup(&self, object: ObjectId) -> Option<LocationEntry>;
}

/// A location service that knows every object's true location.
///
/// The table is shared between clones, so one instance can serve every
/// server in a process. It answers lookups on the next strand turn and keeps
/// no cache of its own.
#[derive(Debug, Clone, Default)]
pub struct OracleLocationService {
    table: Arc<RwLock<HashMap<ObjectId, LocationEntry>>>,
}

impl OracleLocationService {
    /// Creates an empty oracle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records where an object lives.
    pub fn set(&self, object: ObjectId, location: LocationEntry) {
        self.table.write().insert(object, location);
    }

    /// Forgets an object.
    pub fn remove(&self, object: ObjectId) {
        self.table.write().remove(&object);
    }

    /// Returns the true location of an object.
    #[must_use]
    pub fn get(&self, object: ObjectId) -> Option<LocationEntry> {
        self.table.read().get(&object).copied()
    }
}

impl LocationService for OracleLocationService {
    fn lookup(&mut self, object: ObjectId, reply: LookupReply) -> bool {
        match self.get(object) {
            Some(location) => reply.resolve(location),
            None => reply.not_found(),
        }
        true
    }

    fn cache_lookup(&self, _object: ObjectId) -> Option<LocationEntry> {
        None
    }
}
