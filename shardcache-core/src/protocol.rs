//! Binary wire protocol for client-node and node-node traffic
//!
//! Every field is length-prefixed so a message frames itself on a raw
//! TCP stream. Integers are big-endian. Layout:
//!
//! Request:  `[u8 command][u32 key_len][key]`
//!           plus, for Set only: `[u32 val_len][value][u64 ttl_nanos]`
//! Response: `[u8 status][u32 val_len][value]`
//!           plus, for Error only: `[u32 msg_len][message]`
//!
//! Forwarded requests use exactly the same framing as client requests;
//! a peer cannot tell them apart.

use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on any length-prefixed field. Rejecting larger frames
/// keeps a malformed length prefix from allocating gigabytes.
pub const MAX_FIELD_LEN: usize = 16 * 1024 * 1024;

/// Request command tags.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Get = 1,
    Set = 2,
    Delete = 3,
    Ping = 4,
    Keys = 5,
}

impl TryFrom<u8> for Command {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(Command::Get),
            2 => Ok(Command::Set),
            3 => Ok(Command::Delete),
            4 => Ok(Command::Ping),
            5 => Ok(Command::Keys),
            other => Err(ProtocolError::InvalidCommand(other)),
        }
    }
}

/// Response status tags.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 1,
    NotFound = 2,
    Error = 3,
}

impl TryFrom<u8> for Status {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(Status::Ok),
            2 => Ok(Status::NotFound),
            3 => Ok(Status::Error),
            other => Err(ProtocolError::InvalidStatus(other)),
        }
    }
}

/// Decode and stream-read failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown command tag {0:#04x}")]
    InvalidCommand(u8),
    #[error("unknown status tag {0:#04x}")]
    InvalidStatus(u8),
    #[error("field length {0} exceeds the {MAX_FIELD_LEN} byte limit")]
    FieldTooLarge(usize),
    #[error("frame truncated")]
    Truncated,
    #[error("text field is not valid utf-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One client or peer request. Immutable for the duration of a single
/// request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub key: String,
    /// Payload for Set; empty otherwise.
    pub value: Vec<u8>,
    /// TTL for Set; zero means never expires.
    pub ttl: Duration,
}

impl Request {
    pub fn get(key: impl Into<String>) -> Self {
        Self::keyed(Command::Get, key)
    }

    pub fn set(key: impl Into<String>, value: Vec<u8>, ttl: Duration) -> Self {
        Self {
            command: Command::Set,
            key: key.into(),
            value,
            ttl,
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::keyed(Command::Delete, key)
    }

    pub fn ping() -> Self {
        Self::keyed(Command::Ping, "")
    }

    pub fn keys() -> Self {
        Self::keyed(Command::Keys, "")
    }

    fn keyed(command: Command, key: impl Into<String>) -> Self {
        Self {
            command,
            key: key.into(),
            value: Vec::new(),
            ttl: Duration::ZERO,
        }
    }

    /// Serialize into a self-contained frame.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + 4 + self.key.len() + 4 + self.value.len() + 8);
        buf.put_u8(self.command as u8);
        buf.put_u32(self.key.len() as u32);
        buf.put_slice(self.key.as_bytes());
        if self.command == Command::Set {
            buf.put_u32(self.value.len() as u32);
            buf.put_slice(&self.value);
            buf.put_u64(self.ttl.as_nanos() as u64);
        }
        buf.freeze()
    }

    /// Read one request off a stream, field by field.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, ProtocolError> {
        let command = Command::try_from(reader.read_u8().await?)?;
        let key = String::from_utf8(read_field(reader).await?)?;
        let (value, ttl) = if command == Command::Set {
            let value = read_field(reader).await?;
            let ttl = Duration::from_nanos(reader.read_u64().await?);
            (value, ttl)
        } else {
            (Vec::new(), Duration::ZERO)
        };
        Ok(Self {
            command,
            key,
            value,
            ttl,
        })
    }

    /// Decode from a complete in-memory frame.
    pub fn decode(mut frame: &[u8]) -> Result<Self, ProtocolError> {
        use bytes::Buf;

        if frame.remaining() < 1 {
            return Err(ProtocolError::Truncated);
        }
        let command = Command::try_from(frame.get_u8())?;
        let key = String::from_utf8(take_field(&mut frame)?)?;
        let (value, ttl) = if command == Command::Set {
            let value = take_field(&mut frame)?;
            if frame.remaining() < 8 {
                return Err(ProtocolError::Truncated);
            }
            (value, Duration::from_nanos(frame.get_u64()))
        } else {
            (Vec::new(), Duration::ZERO)
        };
        Ok(Self {
            command,
            key,
            value,
            ttl,
        })
    }
}

/// Take one `[u32 len][bytes]` field off the front of a slice.
fn take_field(frame: &mut &[u8]) -> Result<Vec<u8>, ProtocolError> {
    use bytes::Buf;

    if frame.remaining() < 4 {
        return Err(ProtocolError::Truncated);
    }
    let len = frame.get_u32() as usize;
    if len > MAX_FIELD_LEN {
        return Err(ProtocolError::FieldTooLarge(len));
    }
    if frame.remaining() < len {
        return Err(ProtocolError::Truncated);
    }
    let mut field = vec![0u8; len];
    frame.copy_to_slice(&mut field);
    Ok(field)
}

/// One response. Mirrors [`Request`] framing in the other direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    /// Get/Keys payload; empty otherwise.
    pub value: Vec<u8>,
    /// Human-readable message for Error; empty otherwise.
    pub message: String,
}

impl Response {
    pub fn ok(value: Vec<u8>) -> Self {
        Self {
            status: Status::Ok,
            value,
            message: String::new(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            value: Vec::new(),
            message: String::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            value: Vec::new(),
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf =
            BytesMut::with_capacity(1 + 4 + self.value.len() + 4 + self.message.len());
        buf.put_u8(self.status as u8);
        buf.put_u32(self.value.len() as u32);
        buf.put_slice(&self.value);
        if self.status == Status::Error {
            buf.put_u32(self.message.len() as u32);
            buf.put_slice(self.message.as_bytes());
        }
        buf.freeze()
    }

    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, ProtocolError> {
        let status = Status::try_from(reader.read_u8().await?)?;
        let value = read_field(reader).await?;
        let message = if status == Status::Error {
            String::from_utf8(read_field(reader).await?)?
        } else {
            String::new()
        };
        Ok(Self {
            status,
            value,
            message,
        })
    }
}

/// Read one `[u32 len][bytes]` field.
async fn read_field<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let len = reader.read_u32().await? as usize;
    if len > MAX_FIELD_LEN {
        return Err(ProtocolError::FieldTooLarge(len));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_request_round_trips() {
        let request = Request::set("user:1", b"payload".to_vec(), Duration::from_secs(30));
        let decoded = Request::decode(&request.encode()).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.ttl, Duration::from_secs(30));
    }

    #[test]
    fn get_request_carries_no_value_or_ttl() {
        let frame = Request::get("user:1").encode();
        // tag + key length prefix + key bytes, nothing else
        assert_eq!(frame.len(), 1 + 4 + 6);

        let decoded = Request::decode(&frame).unwrap();
        assert_eq!(decoded.command, Command::Get);
        assert_eq!(decoded.key, "user:1");
        assert!(decoded.value.is_empty());
        assert_eq!(decoded.ttl, Duration::ZERO);
    }

    #[test]
    fn zero_ttl_means_no_expiry() {
        let request = Request::set("k", b"v".to_vec(), Duration::ZERO);
        let decoded = Request::decode(&request.encode()).unwrap();
        assert_eq!(decoded.ttl, Duration::ZERO);
    }

    #[test]
    fn unknown_command_tag_is_rejected() {
        let err = Request::decode(&[0x2a, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidCommand(0x2a)));
    }

    #[test]
    fn truncated_request_is_rejected() {
        let frame = Request::set("key", b"value".to_vec(), Duration::ZERO).encode();
        let err = Request::decode(&frame[..frame.len() - 3]).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated));
    }

    #[test]
    fn non_utf8_key_is_rejected() {
        let mut frame = vec![Command::Get as u8];
        frame.extend_from_slice(&2u32.to_be_bytes());
        frame.extend_from_slice(&[0xff, 0xfe]);
        let err = Request::decode(&frame).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidUtf8(_)));
    }

    #[test]
    fn oversized_field_is_rejected() {
        let mut frame = vec![Command::Get as u8];
        frame.extend_from_slice(&u32::MAX.to_be_bytes());
        let err = Request::decode(&frame).unwrap_err();
        assert!(matches!(err, ProtocolError::FieldTooLarge(_)));
    }

    #[tokio::test]
    async fn error_response_round_trips_over_a_stream() {
        let response = Response::error("node unreachable");
        let frame = response.encode();

        let mut reader = frame.as_ref();
        let decoded = Response::read_from(&mut reader).await.unwrap();
        assert_eq!(decoded.status, Status::Error);
        assert_eq!(decoded.message, "node unreachable");
        assert!(decoded.value.is_empty());
    }

    #[tokio::test]
    async fn ok_response_omits_the_message_field() {
        let frame = Response::ok(b"value".to_vec()).encode();
        assert_eq!(frame.len(), 1 + 4 + 5);

        let mut reader = frame.as_ref();
        let decoded = Response::read_from(&mut reader).await.unwrap();
        assert_eq!(decoded.status, Status::Ok);
        assert_eq!(decoded.value, b"value");
        assert!(decoded.message.is_empty());
    }

    #[tokio::test]
    async fn unknown_status_tag_is_rejected() {
        let frame = [9u8, 0, 0, 0, 0];
        let mut reader = frame.as_ref();
        let err = Response::read_from(&mut reader).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidStatus(9)));
    }
}
