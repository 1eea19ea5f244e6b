//! Frame and result codecs
//!
//! Two message shapes travel over a worker connection:
//!
//! ```text
//! dispatcher -> worker:  u32 length | length bytes of encoded image
//! worker -> dispatcher:  u8 count   | count x 16-byte detection record
//! ```
//!
//! Decoders are incremental. Bytes are accumulated into a per-connection
//! `BytesMut`; each `decode` call consumes as much as it can and returns
//! `Ok(None)` until a whole message is available. Anything past the end of
//! the current message is left in the buffer for the next call.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::*;
use crate::protocol::detection::Detection;

/// Encode a frame payload with its length prefix
pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.put_u32_le(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Encode a result set: count byte followed by fixed-width records
pub fn encode_results(detections: &[Detection]) -> Result<Bytes> {
    if detections.len() > MAX_DETECTIONS {
        return Err(ProtocolError::TooManyDetections(detections.len()).into());
    }

    let mut buf =
        BytesMut::with_capacity(RESULT_HEADER_SIZE + detections.len() * DETECTION_RECORD_SIZE);
    buf.put_u8(detections.len() as u8);

    for det in detections {
        buf.put_u16_le(det.x1);
        buf.put_u16_le(det.y1);
        buf.put_u16_le(det.x2);
        buf.put_u16_le(det.y2);
        buf.put_u16_le(det.class_id);
        buf.put_bytes(0, CONFIDENCE_OFFSET - 10);
        buf.put_f32_le(det.confidence);
    }

    Ok(buf.freeze())
}

/// Decode one record; `buf` must hold at least `DETECTION_RECORD_SIZE` bytes
fn decode_record(buf: &mut BytesMut) -> Detection {
    let x1 = buf.get_u16_le();
    let y1 = buf.get_u16_le();
    let x2 = buf.get_u16_le();
    let y2 = buf.get_u16_le();
    let class_id = buf.get_u16_le();
    buf.advance(CONFIDENCE_OFFSET - 10);
    let confidence = buf.get_f32_le();

    Detection {
        x1,
        y1,
        x2,
        y2,
        class_id,
        confidence,
    }
}

/// Incremental decoder for length-prefixed frames
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_frame_len: usize,
}

impl FrameDecoder {
    /// Create a decoder rejecting frames longer than `max_frame_len`
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    /// Try to take one complete frame payload off the front of `buf`
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len > self.max_frame_len {
            return Err(ProtocolError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            }
            .into());
        }

        let total = FRAME_HEADER_SIZE + len;
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        Ok(Some(buf.split_to(len).freeze()))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

/// Incremental decoder for result sets
///
/// The count byte and the records may arrive split across any number of
/// reads; complete records are consumed as soon as they are buffered.
#[derive(Debug, Default)]
pub struct ResultDecoder {
    /// Records still expected for the set in progress
    remaining: Option<usize>,
    /// Records decoded so far
    decoded: Vec<Detection>,
}

impl ResultDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a result set is partially decoded
    pub fn in_progress(&self) -> bool {
        self.remaining.is_some()
    }

    /// Consume what is available; returns the set once all records arrived
    pub fn decode(&mut self, buf: &mut BytesMut) -> Option<Vec<Detection>> {
        let remaining = match self.remaining {
            Some(n) => n,
            None => {
                if buf.is_empty() {
                    return None;
                }
                let count = buf.get_u8() as usize;
                self.decoded.reserve(count);
                count
            }
        };

        let ready = (buf.len() / DETECTION_RECORD_SIZE).min(remaining);
        for _ in 0..ready {
            self.decoded.push(decode_record(buf));
        }

        let remaining = remaining - ready;
        if remaining == 0 {
            self.remaining = None;
            Some(std::mem::take(&mut self.decoded))
        } else {
            self.remaining = Some(remaining);
            None
        }
    }

    /// Drop any partially decoded set
    pub fn reset(&mut self) {
        self.remaining = None;
        self.decoded.clear();
    }
}

/// Read one frame from `reader`, accumulating into `buf`
///
/// Returns `Ok(None)` if the peer closes before the frame is complete.
pub async fn read_frame<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    decoder: &mut FrameDecoder,
) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(frame) = decoder.decode(buf)? {
            return Ok(Some(frame));
        }

        if reader.read_buf(buf).await? == 0 {
            if !buf.is_empty() {
                tracing::debug!(buffered = buf.len(), "Peer closed mid-frame");
            }
            return Ok(None);
        }
    }
}

/// Read one result set from `reader`, accumulating into `buf`
///
/// Returns `Ok(None)` if the peer closes before the set is complete.
pub async fn read_results<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    decoder: &mut ResultDecoder,
) -> Result<Option<Vec<Detection>>>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(results) = decoder.decode(buf) {
            return Ok(Some(results));
        }

        if reader.read_buf(buf).await? == 0 {
            if decoder.in_progress() {
                tracing::debug!("Peer closed mid-result");
            }
            decoder.reset();
            return Ok(None);
        }
    }
}

/// Write one length-prefixed frame
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let data = encode_frame(payload)?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

/// Write one result set as a single write sequence
pub async fn write_results<W>(writer: &mut W, detections: &[Detection]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let data = encode_results(detections)?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}
