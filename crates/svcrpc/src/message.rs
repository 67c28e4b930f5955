//! # Remote Message
//!
//! The framed buffer exchanged between a process and the router.
//!
//! ```text
//! [len: u32][source: u64][target: u64][message id: u32][result: u16][sequence: u64][body ...]
//! ```
//!
//! `len` counts every byte after itself. It is reserved before the body is
//! written and back-patched by `finalize`, so the body can be streamed in
//! without knowing its size up front.

use svcpack::Mark;
use svcpack::Reader;
use svcpack::Writer;

use crate::connection::ResultType;
use crate::error::Result;
use crate::error::RpcError;
use crate::ids::Cookie;
use crate::ids::MessageId;

/// Bytes in front of the body, length field included.
pub const HEADER_SIZE: usize = 4 + 8 + 8 + 4 + 2 + 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMessage {
    /// Cookie of the sending process.
    pub source: Cookie,
    /// Cookie of the receiving process.
    pub target: Cookie,
    pub message_id: MessageId,
    pub result: ResultType,
    pub sequence: u64,
    pub body: Vec<u8>,
}

/// A header being written, waiting for its body.
pub struct MessageWriter {
    writer: Writer,
    len: Mark,
}

impl MessageWriter {
    pub fn new(source: Cookie, target: Cookie, message_id: MessageId, result: ResultType, sequence: u64) -> Self {
        let mut writer = Writer::with_capacity(HEADER_SIZE + 64);
        let len = writer.reserve_u32();
        writer.u64(source);
        writer.u64(target);
        writer.u32(message_id);
        writer.u16(result.as_u8() as u16);
        writer.u64(sequence);
        Self { writer, len }
    }

    /// Stream for the body.
    pub fn body(&mut self) -> &mut Writer {
        &mut self.writer
    }

    /// Patches the length field and returns the finished frame.
    pub fn finalize(mut self) -> Vec<u8> {
        let len = (self.writer.len() - 4) as u32;
        self.writer.patch_u32(self.len, len);
        self.writer.into_bytes()
    }
}

impl RemoteMessage {
    pub fn new(
        source: Cookie,
        target: Cookie,
        message_id: MessageId,
        result: ResultType,
        sequence: u64,
        body: Vec<u8>,
    ) -> Self {
        Self { source, target, message_id, result, sequence, body }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = MessageWriter::new(self.source, self.target, self.message_id, self.result, self.sequence);
        w.body().raw(&self.body);
        w.finalize()
    }

    /// Parses a complete frame, rejecting a length field that disagrees with the buffer.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        let len = r.u32()? as usize;
        if len != r.remaining() {
            return Err(RpcError::ProtocolViolation(format!(
                "Length field says {} bytes, frame has {}",
                len,
                r.remaining()
            )));
        }
        let source = r.u64()?;
        let target = r.u64()?;
        let message_id = r.u32()?;
        let raw_result = r.u16()?;
        let result = u8::try_from(raw_result)
            .ok()
            .and_then(ResultType::from_u8)
            .ok_or(RpcError::UnknownValue { what: "result type", value: raw_result as u32 })?;
        let sequence = r.u64()?;
        Ok(Self { source, target, message_id, result, sequence, body: r.rest().to_vec() })
    }

    /// The reply sent back when this message cannot be delivered: endpoints
    /// swapped, result `MessageUndelivered`, everything else unchanged.
    pub fn failed_response(&self) -> Self {
        Self {
            source: self.target,
            target: self.source,
            message_id: self.message_id,
            result: ResultType::MessageUndelivered,
            sequence: self.sequence,
            body: self.body.clone(),
        }
    }

    pub fn body_reader(&self) -> Reader<'_> {
        Reader::new(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RemoteMessage {
        RemoteMessage::new(256, 257, 0x3005, ResultType::Undefined, 42, vec![9, 8, 7])
    }

    #[test]
    fn test_length_is_patched() {
        let bytes = sample().encode();
        assert_eq!(bytes.len(), HEADER_SIZE + 3);
        let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(len, bytes.len() - 4);
        assert_eq!(RemoteMessage::decode(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let bytes = sample().encode();
        assert!(matches!(
            RemoteMessage::decode(&bytes[..bytes.len() - 1]),
            Err(RpcError::ProtocolViolation(_))
        ));
        assert!(RemoteMessage::decode(&bytes[..2]).is_err());
    }

    #[test]
    fn test_failed_response_swaps_endpoints() {
        let failed = sample().failed_response();
        assert_eq!(failed.source, 257);
        assert_eq!(failed.target, 256);
        assert_eq!(failed.result, ResultType::MessageUndelivered);
        assert_eq!(failed.sequence, 42);
        assert_eq!(failed.message_id, 0x3005);
        assert_eq!(failed.body, vec![9, 8, 7]);
    }
}
