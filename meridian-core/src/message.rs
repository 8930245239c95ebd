//! Messages exchanged between objects and between space servers.
//!
//! An [`ObjectMessage`] travels from one object to another and may cross
//! several servers on the way. A [`ServerMessage`] is the hop-level
//! envelope that carries an encoded object message (or a control record)
//! across one inter-server link.
//!
//! Both are moved, never shared: a message lives in exactly one container
//! at a time and is dropped exactly once.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::types::{MessageId, ObjectId, ServerId};

/// Anything that occupies link capacity.
pub trait Transmittable {
    /// Bytes this item occupies on the wire.
    fn size_bytes(&self) -> u32;
}

/// Logical channel of a server message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum ServerPort {
    /// An encoded object message being routed toward its destination.
    ObjectRouting = 1,
    /// Periodic weight and capacity report between forwarders.
    WeightUpdate = 2,
    /// Location cache correction for the previous hop.
    CacheUpdate = 3,
}

impl ServerPort {
    /// Returns the wire value of this port.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Parses a wire value.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::ObjectRouting),
            2 => Some(Self::WeightUpdate),
            3 => Some(Self::CacheUpdate),
            _ => None,
        }
    }
}

/// A message from one object to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMessage {
    /// Unique message id, for tracing.
    pub id: MessageId,
    /// Sending object.
    pub source_object: ObjectId,
    /// Port on the sending object.
    pub source_port: u16,
    /// Receiving object. [`ObjectId::SPACE`] addresses the server itself.
    pub dest_object: ObjectId,
    /// Port on the receiving object.
    pub dest_port: u16,
    /// Application payload. Opaque to the forwarding path.
    pub payload: Bytes,
}

impl ObjectMessage {
    /// Encoded header size: id, two object ids, two ports, payload length.
    pub const HEADER_BYTES: u32 = 8 + 8 + 2 + 8 + 2 + 4;

    /// Creates a new object message.
    #[must_use]
    pub fn new(
        id: MessageId,
        source_object: ObjectId,
        source_port: u16,
        dest_object: ObjectId,
        dest_port: u16,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            id,
            source_object,
            source_port,
            dest_object,
            dest_port,
            payload: payload.into(),
        }
    }

    /// Returns true if this message is addressed to the space server.
    #[must_use]
    pub const fn is_space_bound(&self) -> bool {
        self.dest_object.is_null()
    }

    /// Encodes the message to bytes.
    #[allow(clippy::cast_possible_truncation)] // Payloads bounded by Limits.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.size_bytes() as usize);
        buf.put_u64_le(self.id.get());
        buf.put_u64_le(self.source_object.get());
        buf.put_u16_le(self.source_port);
        buf.put_u64_le(self.dest_object.get());
        buf.put_u16_le(self.dest_port);
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    /// Encodes the message into a fresh buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decodes a message from bytes.
    ///
    /// Returns `None` if the buffer is too small.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < Self::HEADER_BYTES as usize {
            return None;
        }
        let id = MessageId::new(buf.get_u64_le());
        let source_object = ObjectId::new(buf.get_u64_le());
        let source_port = buf.get_u16_le();
        let dest_object = ObjectId::new(buf.get_u64_le());
        let dest_port = buf.get_u16_le();
        let payload_len = buf.get_u32_le() as usize;
        if buf.remaining() < payload_len {
            return None;
        }
        let payload = buf.copy_to_bytes(payload_len);

        Some(Self {
            id,
            source_object,
            source_port,
            dest_object,
            dest_port,
            payload,
        })
    }
}

impl Transmittable for ObjectMessage {
    #[allow(clippy::cast_possible_truncation)] // Payloads bounded by Limits.
    fn size_bytes(&self) -> u32 {
        Self::HEADER_BYTES + self.payload.len() as u32
    }
}

/// A single-hop message between two space servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    /// Unique message id, for tracing.
    pub id: MessageId,
    /// Server that sent this hop.
    pub source_server: ServerId,
    /// Server this hop is addressed to.
    pub dest_server: ServerId,
    /// Logical channel.
    pub port: ServerPort,
    /// Encoded contents; format depends on `port`.
    pub payload: Bytes,
}

impl ServerMessage {
    /// Encoded header size: id, two server ids, port, payload length.
    pub const HEADER_BYTES: u32 = 8 + 8 + 8 + 2 + 4;

    /// Creates a new server message.
    #[must_use]
    pub fn new(
        id: MessageId,
        source_server: ServerId,
        dest_server: ServerId,
        port: ServerPort,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            id,
            source_server,
            dest_server,
            port,
            payload: payload.into(),
        }
    }
}

impl Transmittable for ServerMessage {
    #[allow(clippy::cast_possible_truncation)] // Payloads bounded by Limits.
    fn size_bytes(&self) -> u32 {
        Self::HEADER_BYTES + self.payload.len() as u32
    }
}
