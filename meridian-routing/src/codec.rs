//! Wire formats of the server-to-server channels.
//!
//! Each [`ServerPort`] carries one record type in the server message
//! payload, little-endian throughout:
//!
//! ```text
//! ObjectRouting  encoded ObjectMessage (see meridian_core::ObjectMessage)
//!
//! WeightUpdate   +----------------------------+  32 bytes
//!                | server_pair_total: f64     |
//!                | server_pair_used: f64      |
//!                | receiver_total: f64        |
//!                | receiver_capacity: f64     |
//!                +----------------------------+
//!
//! CacheUpdate    +----------------------------+  20 bytes
//!                | object: u64                |
//!                | owner: u64                 |
//!                | radius: f32                |
//!                +----------------------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use meridian_core::{
    LocationEntry, MessageId, ObjectId, ObjectMessage, ServerId, ServerMessage, ServerPort,
};

/// Encoded size of a [`WeightUpdate`].
pub const WEIGHT_UPDATE_BYTES: usize = 4 * 8;

/// Encoded size of a [`CacheUpdate`].
pub const CACHE_UPDATE_BYTES: usize = 8 + 8 + 4;

/// Errors decoding a server message payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Not enough bytes for the record.
    #[error("insufficient data: need {need} bytes, have {have}")]
    InsufficientData {
        /// Bytes needed.
        need: usize,
        /// Bytes available.
        have: usize,
    },

    /// The message arrived on a different channel than the record expects.
    #[error("unexpected channel {actual:?}, expected {expected:?}")]
    UnknownChannel {
        /// Channel the record belongs on.
        expected: ServerPort,
        /// Channel it arrived on.
        actual: ServerPort,
    },

    /// Bytes left over after the record.
    #[error("{extra} trailing bytes after record")]
    TrailingBytes {
        /// Number of extra bytes.
        extra: usize,
    },

    /// A field holds a value outside its domain.
    #[error("invalid value for field '{field}'")]
    InvalidValue {
        /// Field name.
        field: &'static str,
    },
}

/// Periodic weight report sent to each peer with an active flow scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightUpdate {
    /// Total active weight of the sender's scheduler toward the receiver.
    pub server_pair_total_weight: f64,
    /// Weight that scheduler uses against the receiver's capacity.
    pub server_pair_used_weight: f64,
    /// Total used weight of the sender's link receiver.
    pub receiver_total_weight: f64,
    /// Capacity of the sender's link receiver.
    pub receiver_capacity: f64,
}

impl WeightUpdate {
    /// Encodes the record.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(WEIGHT_UPDATE_BYTES);
        buf.put_f64_le(self.server_pair_total_weight);
        buf.put_f64_le(self.server_pair_used_weight);
        buf.put_f64_le(self.receiver_total_weight);
        buf.put_f64_le(self.receiver_capacity);
    }

    /// Decodes a record, rejecting negative or non-finite figures.
    ///
    /// # Errors
    /// Returns `CodecError` if the payload is short, long, or invalid.
    pub fn decode(mut buf: &[u8]) -> Result<Self, CodecError> {
        ensure_len(buf, WEIGHT_UPDATE_BYTES)?;
        let update = Self {
            server_pair_total_weight: get_weight(&mut buf, "server_pair_total_weight")?,
            server_pair_used_weight: get_weight(&mut buf, "server_pair_used_weight")?,
            receiver_total_weight: get_weight(&mut buf, "receiver_total_weight")?,
            receiver_capacity: get_weight(&mut buf, "receiver_capacity")?,
        };
        Ok(update)
    }

    /// Wraps the record in a server message on the weight channel.
    #[must_use]
    pub fn to_message(&self, id: MessageId, source: ServerId, dest: ServerId) -> ServerMessage {
        let mut buf = BytesMut::with_capacity(WEIGHT_UPDATE_BYTES);
        self.encode(&mut buf);
        ServerMessage::new(id, source, dest, ServerPort::WeightUpdate, buf.freeze())
    }

    /// Extracts the record from a server message.
    ///
    /// # Errors
    /// Returns `CodecError` if the message is on another channel or malformed.
    pub fn from_message(msg: &ServerMessage) -> Result<Self, CodecError> {
        expect_port(msg, ServerPort::WeightUpdate)?;
        Self::decode(&msg.payload)
    }
}

/// Location correction for the server that forwarded a message here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheUpdate {
    /// The object whose location changed.
    pub object: ObjectId,
    /// Where the object actually lives.
    pub location: LocationEntry,
}

impl CacheUpdate {
    /// Encodes the record.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(CACHE_UPDATE_BYTES);
        buf.put_u64_le(self.object.get());
        buf.put_u64_le(self.location.server().get());
        buf.put_f32_le(self.location.radius());
    }

    /// Decodes a record.
    ///
    /// # Errors
    /// Returns `CodecError` if the payload is malformed or names no owner.
    pub fn decode(mut buf: &[u8]) -> Result<Self, CodecError> {
        ensure_len(buf, CACHE_UPDATE_BYTES)?;
        let object = ObjectId::new(buf.get_u64_le());
        let owner = ServerId::new(buf.get_u64_le());
        let radius = buf.get_f32_le();
        if object.is_null() {
            return Err(CodecError::InvalidValue { field: "object" });
        }
        if owner.is_null() {
            return Err(CodecError::InvalidValue { field: "owner" });
        }
        if !radius.is_finite() || radius < 0.0 {
            return Err(CodecError::InvalidValue { field: "radius" });
        }
        Ok(Self {
            object,
            location: LocationEntry::new(owner, radius),
        })
    }

    /// Wraps the record in a server message on the cache channel.
    #[must_use]
    pub fn to_message(&self, id: MessageId, source: ServerId, dest: ServerId) -> ServerMessage {
        let mut buf = BytesMut::with_capacity(CACHE_UPDATE_BYTES);
        self.encode(&mut buf);
        ServerMessage::new(id, source, dest, ServerPort::CacheUpdate, buf.freeze())
    }

    /// Extracts the record from a server message.
    ///
    /// # Errors
    /// Returns `CodecError` if the message is on another channel or malformed.
    pub fn from_message(msg: &ServerMessage) -> Result<Self, CodecError> {
        expect_port(msg, ServerPort::CacheUpdate)?;
        Self::decode(&msg.payload)
    }
}

/// Extracts the object message carried by a routing-channel server message.
///
/// # Errors
/// Returns `CodecError` if the message is on another channel, truncated, or
/// has bytes after the object message.
pub fn decode_object_message(msg: &ServerMessage) -> Result<ObjectMessage, CodecError> {
    expect_port(msg, ServerPort::ObjectRouting)?;
    let mut payload: Bytes = msg.payload.clone();
    let have = payload.len();
    let Some(object) = ObjectMessage::decode(&mut payload) else {
        return Err(CodecError::InsufficientData {
            need: declared_object_len(&msg.payload),
            have,
        });
    };
    if payload.has_remaining() {
        return Err(CodecError::TrailingBytes {
            extra: payload.remaining(),
        });
    }
    Ok(object)
}

/// Length an object message header claims, or the bare header size.
fn declared_object_len(buf: &[u8]) -> usize {
    let header = ObjectMessage::HEADER_BYTES as usize;
    if buf.len() < header {
        return header;
    }
    let mut len_field = &buf[header - 4..header];
    header + len_field.get_u32_le() as usize
}

fn expect_port(msg: &ServerMessage, expected: ServerPort) -> Result<(), CodecError> {
    if msg.port == expected {
        Ok(())
    } else {
        Err(CodecError::UnknownChannel {
            expected,
            actual: msg.port,
        })
    }
}

fn ensure_len(buf: &[u8], need: usize) -> Result<(), CodecError> {
    if buf.len() < need {
        return Err(CodecError::InsufficientData {
            need,
            have: buf.len(),
        });
    }
    if buf.len() > need {
        return Err(CodecError::TrailingBytes {
            extra: buf.len() - need,
        });
    }
    Ok(())
}

fn get_weight(buf: &mut &[u8], field: &'static str) -> Result<f64, CodecError> {
    let value = buf.get_f64_le();
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(CodecError::InvalidValue { field })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update() -> WeightUpdate {
        WeightUpdate {
            server_pair_total_weight: 3.5,
            server_pair_used_weight: 1.25,
            receiver_total_weight: 10.0,
            receiver_capacity: 125_000.0,
        }
    }

    #[test]
    fn test_weight_update_message() {
        let msg = update().to_message(MessageId::new(1), ServerId::new(1), ServerId::new(2));
        assert_eq!(msg.port, ServerPort::WeightUpdate);
        assert_eq!(msg.payload.len(), WEIGHT_UPDATE_BYTES);
        assert_eq!(WeightUpdate::from_message(&msg).unwrap(), update());
    }

    #[test]
    fn test_weight_update_rejects_bad_lengths() {
        let mut buf = BytesMut::new();
        update().encode(&mut buf);

        let short = WeightUpdate::decode(&buf[..20]);
        assert_eq!(
            short,
            Err(CodecError::InsufficientData { need: 32, have: 20 })
        );

        buf.put_u8(0);
        assert_eq!(
            WeightUpdate::decode(&buf),
            Err(CodecError::TrailingBytes { extra: 1 })
        );
    }

    #[test]
    fn test_weight_update_rejects_nan() {
        let bad = WeightUpdate {
            receiver_capacity: f64::NAN,
            ..update()
        };
        let mut buf = BytesMut::new();
        bad.encode(&mut buf);
        assert_eq!(
            WeightUpdate::decode(&buf),
            Err(CodecError::InvalidValue {
                field: "receiver_capacity"
            })
        );
    }

    #[test]
    fn test_cache_update_message() {
        let record = CacheUpdate {
            object: ObjectId::new(77),
            location: LocationEntry::new(ServerId::new(4), 2.5),
        };
        let msg = record.to_message(MessageId::new(9), ServerId::new(3), ServerId::new(1));
        assert_eq!(msg.port, ServerPort::CacheUpdate);
        assert_eq!(CacheUpdate::from_message(&msg).unwrap(), record);
    }

    #[test]
    fn test_cache_update_requires_owner() {
        let record = CacheUpdate {
            object: ObjectId::new(77),
            location: LocationEntry::null(),
        };
        let mut buf = BytesMut::new();
        record.encode(&mut buf);
        assert_eq!(
            CacheUpdate::decode(&buf),
            Err(CodecError::InvalidValue { field: "owner" })
        );
    }

    #[test]
    fn test_wrong_channel() {
        let msg = update().to_message(MessageId::new(1), ServerId::new(1), ServerId::new(2));
        assert_eq!(
            CacheUpdate::from_message(&msg),
            Err(CodecError::UnknownChannel {
                expected: ServerPort::CacheUpdate,
                actual: ServerPort::WeightUpdate,
            })
        );
        assert!(decode_object_message(&msg).is_err());
    }

    #[test]
    fn test_object_message_payload() {
        let object = ObjectMessage::new(
            MessageId::new(5),
            ObjectId::new(1),
            10,
            ObjectId::new(2),
            20,
            &b"hello"[..],
        );
        let msg = ServerMessage::new(
            object.id,
            ServerId::new(1),
            ServerId::new(2),
            ServerPort::ObjectRouting,
            object.to_bytes(),
        );
        assert_eq!(decode_object_message(&msg).unwrap(), object);
    }

    #[test]
    fn test_truncated_object_message() {
        let object = ObjectMessage::new(
            MessageId::new(5),
            ObjectId::new(1),
            0,
            ObjectId::new(2),
            0,
            vec![0u8; 10],
        );
        let bytes = object.to_bytes();
        let msg = ServerMessage::new(
            object.id,
            ServerId::new(1),
            ServerId::new(2),
            ServerPort::ObjectRouting,
            bytes.slice(..bytes.len() - 4),
        );
        assert_eq!(
            decode_object_message(&msg),
            Err(CodecError::InsufficientData {
                need: 42,
                have: 38
            })
        );
    }

    #[test]
    fn test_object_message_trailing_bytes() {
        let object = ObjectMessage::new(
            MessageId::new(5),
            ObjectId::new(1),
            0,
            ObjectId::new(2),
            0,
            Bytes::new(),
        );
        let mut buf = BytesMut::new();
        object.encode(&mut buf);
        buf.put_u16_le(0);
        let msg = ServerMessage::new(
            object.id,
            ServerId::new(1),
            ServerId::new(2),
            ServerPort::ObjectRouting,
            buf.freeze(),
        );
        assert_eq!(
            decode_object_message(&msg),
            Err(CodecError::TrailingBytes { extra: 2 })
        );
    }
}
