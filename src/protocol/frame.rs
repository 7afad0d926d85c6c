//! Frame codec
//!
//! Every message on the master, worker and client sockets is a single frame:
//!
//! ```text
//! [1 byte: command][4 bytes: payload length (little-endian u32)][N bytes: payload]
//! ```
//!
//! A peer that closes the connection in the middle of a frame is reported as
//! [`FrameError::EndOfStream`] so callers can tell a disconnect apart from any
//! other transport failure.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the command byte plus the length prefix
pub const HEADER_LEN: usize = 5;

/// Largest payload accepted on read or write (256 MiB)
///
/// Fits a full 5000x5000 task block (~200 MB).
pub const MAX_PAYLOAD_LEN: usize = 256 * 1024 * 1024;

/// Frame level errors
#[derive(Error, Debug)]
pub enum FrameError {
    /// The peer closed the connection before a full frame arrived
    #[error("connection closed by peer")]
    EndOfStream,

    /// The length field exceeds [`MAX_PAYLOAD_LEN`]
    #[error("frame payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// True when the error means the connection is gone
    pub fn is_disconnect(&self) -> bool {
        match self {
            FrameError::EndOfStream => true,
            FrameError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            FrameError::PayloadTooLarge { .. } => false,
        }
    }
}

/// One decoded protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(command: u8, payload: Vec<u8>) -> Self {
        Self { command, payload }
    }

    /// Frame with no payload (reset, task-accepted, ...)
    pub fn empty(command: u8) -> Self {
        Self { command, payload: Vec::new() }
    }
}

/// Serialize a frame into a single buffer
pub fn encode_frame(command: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }

    let mut framed = Vec::with_capacity(HEADER_LEN + payload.len());
    framed.push(command);
    framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    framed.extend_from_slice(payload);
    Ok(framed)
}

/// Decode a frame from the front of `buf`
///
/// # Returns
///
/// `Ok(None)` if `buf` does not yet hold a complete frame, otherwise the frame
/// and the number of bytes it occupied (header included).
pub fn decode_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let command = buf[0];
    let len = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge { len, max: MAX_PAYLOAD_LEN });
    }

    let total = HEADER_LEN + len;
    if buf.len() < total {
        return Ok(None);
    }

    Ok(Some((Frame::new(command, buf[HEADER_LEN..total].to_vec()), total)))
}

/// Read one complete frame
///
/// Reads exactly the 5-byte header, then exactly `length` payload bytes.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await.map_err(map_read_error)?;

    let command = header[0];
    let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge { len, max: MAX_PAYLOAD_LEN });
    }

    let mut payload = vec![0u8; len];
    if len > 0 {
        reader.read_exact(&mut payload).await.map_err(map_read_error)?;
    }

    Ok(Frame::new(command, payload))
}

/// Write one frame and flush it
///
/// Header and payload go out in one `write_all` so concurrent writers that
/// share a lock never interleave partial frames.
pub async fn write_frame<W>(writer: &mut W, command: u8, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let framed = encode_frame(command, payload)?;
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

fn map_read_error(err: std::io::Error) -> FrameError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::EndOfStream
    } else {
        FrameError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let bytes = encode_frame(0x12, &[1, 2, 3]).unwrap();
        assert_eq!(bytes, vec![0x12, 3, 0, 0, 0, 1, 2, 3]);
    }

    #[test]
    fn test_decode_round_trip() {
        for payload in [Vec::new(), vec![7u8], vec![0xAB; 4096]] {
            let bytes = encode_frame(0x34, &payload).unwrap();
            let (frame, consumed) = decode_frame(&bytes).unwrap().unwrap();
            assert_eq!(consumed, bytes.len());
            assert_eq!(frame.command, 0x34);
            assert_eq!(frame.payload, payload);
        }
    }

    #[test]
    fn test_decode_incomplete() {
        let bytes = encode_frame(0x01, &[9; 16]).unwrap();
        assert!(decode_frame(&bytes[..3]).unwrap().is_none());
        assert!(decode_frame(&bytes[..10]).unwrap().is_none());
    }

    #[test]
    fn test_decode_consecutive_frames() {
        let mut buf = encode_frame(0x11, &[]).unwrap();
        buf.extend(encode_frame(0x12, &[5, 6]).unwrap());

        let (first, used) = decode_frame(&buf).unwrap().unwrap();
        assert_eq!(first, Frame::empty(0x11));
        let (second, _) = decode_frame(&buf[used..]).unwrap().unwrap();
        assert_eq!(second, Frame::new(0x12, vec![5, 6]));
    }

    #[test]
    fn test_decode_rejects_oversized_length() {
        let mut buf = vec![0x02];
        buf.extend_from_slice(&((MAX_PAYLOAD_LEN as u32) + 1).to_le_bytes());
        match decode_frame(&buf) {
            Err(FrameError::PayloadTooLarge { len, .. }) => assert_eq!(len, MAX_PAYLOAD_LEN + 1),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_decode_accepts_length_at_cap() {
        let mut buf = vec![0x02];
        buf.extend_from_slice(&(MAX_PAYLOAD_LEN as u32).to_le_bytes());
        buf.extend_from_slice(&[0; 64]);
        assert!(decode_frame(&buf).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_rejects_payload_over_cap() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        match encode_frame(0x02, &payload) {
            Err(FrameError::PayloadTooLarge { len, max }) => {
                assert_eq!(len, MAX_PAYLOAD_LEN + 1);
                assert_eq!(max, MAX_PAYLOAD_LEN);
            }
            other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
        }

        let (mut a, mut b) = tokio::io::duplex(64);
        let err = write_frame(&mut a, 0x02, &payload).await.unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));

        // Nothing reached the stream
        drop(a);
        assert!(matches!(read_frame(&mut b).await, Err(FrameError::EndOfStream)));
    }

    #[tokio::test]
    async fn test_stream_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, 0x35, b"hello").await.unwrap();
        write_frame(&mut a, 0x03, &[]).await.unwrap();

        let first = read_frame(&mut b).await.unwrap();
        assert_eq!(first, Frame::new(0x35, b"hello".to_vec()));
        let second = read_frame(&mut b).await.unwrap();
        assert_eq!(second, Frame::empty(0x03));
    }

    #[tokio::test]
    async fn test_short_read_is_end_of_stream() {
        let (mut a, mut b) = tokio::io::duplex(64);
        // Header promises 8 bytes but only 2 arrive before close
        a.write_all(&[0x12, 8, 0, 0, 0, 1, 2]).await.unwrap();
        drop(a);

        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, FrameError::EndOfStream));
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_closed_stream_is_end_of_stream() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(matches!(read_frame(&mut b).await, Err(FrameError::EndOfStream)));
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_length() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let mut header = vec![0x12];
        header.extend_from_slice(&u32::MAX.to_le_bytes());
        a.write_all(&header).await.unwrap();

        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(!err.is_disconnect());
    }
}
