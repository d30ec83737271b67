use bytes::{Buf, BytesMut};

use crate::envelope::{frame_from_value, Frame};
use crate::error::ProtocolError;

/// Refuses to buffer a single frame larger than this many bytes. Generous
/// relative to the 4 MiB `write-file` fragment size (§4.3) so legitimate
/// traffic never trips it, while still bounding memory if a peer sends a
/// corrupt or hostile length prefix.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

const LENGTH_PREFIX_SIZE: usize = 4;

/// Encodes a frame as `uint32_be(len) || msgpack_bytes`.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
    let value = frame.to_value()?;
    let mut payload = Vec::new();
    rmpv::encode::write_value(&mut payload, &value)?;

    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| ProtocolError::FrameTooLarge(u32::MAX))?;
    let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Streaming decoder: accumulates bytes across arbitrary partitioning and
/// yields one fully-buffered frame at a time (§4.4: "on each new byte
/// arrival it attempts to decode at most one packet").
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends newly-received bytes to the accumulation buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Attempts to decode exactly one packet from the buffer. Returns
    /// `Ok(None)` if not enough bytes have accumulated yet; the caller
    /// should call `feed` again and retry.
    pub fn decode_next(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if self.buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }
        let len = u32::from_be_bytes(self.buf[..LENGTH_PREFIX_SIZE].try_into().unwrap());
        if len > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge(len));
        }
        let total = LENGTH_PREFIX_SIZE + len as usize;
        if self.buf.len() < total {
            return Ok(None);
        }

        self.buf.advance(LENGTH_PREFIX_SIZE);
        let payload = self.buf.split_to(len as usize);

        let value = rmpv::decode::read_value(&mut &payload[..])?;
        let frame = frame_from_value(value)?;
        Ok(Some(frame))
    }

    /// True once the buffer holds bytes that can never form a valid frame
    /// (the declared length alone exceeds the cap).
    pub fn is_overflow(&self) -> bool {
        self.buf.len() >= LENGTH_PREFIX_SIZE
            && u32::from_be_bytes(self.buf[..LENGTH_PREFIX_SIZE].try_into().unwrap()) > MAX_FRAME_SIZE
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::envelope::RequestPacket;

    fn sample_frame() -> Frame {
        Frame::Request(RequestPacket::new(
            7,
            Command::CreateDir {
                path: "a/b".into(),
            },
        ))
    }

    #[test]
    fn round_trips_a_single_frame() {
        let frame = sample_frame();
        let bytes = encode_frame(&frame).unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.feed(&bytes);
        let decoded = decoder.decode_next().unwrap().unwrap();
        assert_eq!(decoded.id(), 7);
        assert!(decoder.decode_next().unwrap().is_none());
    }

    #[test]
    fn decodes_incrementally_fed_bytes() {
        let frame = sample_frame();
        let bytes = encode_frame(&frame).unwrap();

        let mut decoder = FrameDecoder::new();
        for byte in &bytes {
            assert!(decoder.decode_next().unwrap().is_none());
            decoder.feed(std::slice::from_ref(byte));
        }
        let decoded = decoder.decode_next().unwrap().unwrap();
        assert_eq!(decoded.id(), 7);
    }

    #[test]
    fn decodes_two_concatenated_frames_in_order() {
        let a = encode_frame(&Frame::Request(RequestPacket::new(
            1,
            Command::RemoveFile { path: "x".into() },
        )))
        .unwrap();
        let b = encode_frame(&Frame::Request(RequestPacket::new(
            2,
            Command::RemoveFile { path: "y".into() },
        )))
        .unwrap();

        let mut combined = a;
        combined.extend_from_slice(&b);

        let mut decoder = FrameDecoder::new();
        decoder.feed(&combined);
        let first = decoder.decode_next().unwrap().unwrap();
        let second = decoder.decode_next().unwrap().unwrap();
        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        assert!(decoder.decode_next().unwrap().is_none());
    }

    #[test]
    fn rejects_absurd_declared_length() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&(MAX_FRAME_SIZE + 1).to_be_bytes());
        assert!(matches!(
            decoder.decode_next(),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }
}
