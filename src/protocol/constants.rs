//! Wire protocol constants
//!
//! Both ends encode every multi-byte field little-endian.

/// Size of the frame length prefix
pub const FRAME_HEADER_SIZE: usize = 4;

/// Size of the result count prefix
pub const RESULT_HEADER_SIZE: usize = 1;

/// Size of one encoded detection record
///
/// Layout: x1, y1, x2, y2, class_id as u16 (10 bytes), 2 bytes of zero
/// padding, then confidence as f32 at offset 12.
pub const DETECTION_RECORD_SIZE: usize = 16;

/// Offset of the confidence field inside a detection record
pub const CONFIDENCE_OFFSET: usize = 12;

/// Maximum detections in one result set (count prefix is a single byte)
pub const MAX_DETECTIONS: usize = u8::MAX as usize;

/// Default cap on a declared frame payload length (16 MiB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Default listening port for the dispatcher
pub const DEFAULT_PORT: u16 = 45005;

/// Default inference input resolution (width and height)
pub const DEFAULT_INFERENCE_DIM: u32 = 300;

/// Initial capacity of a per-connection receive accumulator
pub const READ_BUFFER_SIZE: usize = 64 * 1024;
