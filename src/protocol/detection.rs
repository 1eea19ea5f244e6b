//! Detection records carried in result sets

use crate::media::frame::Size;

/// Class id conventionally used for "background"
pub const BACKGROUND_CLASS: u16 = 0;

/// One labeled bounding box with a confidence score
///
/// Coordinates are in whatever resolution the producer worked at; results
/// coming off the wire are in the inference-input space until rescaled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// Top-left x
    pub x1: u16,
    /// Top-left y
    pub y1: u16,
    /// Bottom-right x
    pub x2: u16,
    /// Bottom-right y
    pub y2: u16,
    /// Class identifier
    pub class_id: u16,
    /// Confidence score
    pub confidence: f32,
}

impl Detection {
    /// Create a detection from a box, a class id and a confidence
    pub fn new(bbox: (u16, u16, u16, u16), class_id: u16, confidence: f32) -> Self {
        Self {
            x1: bbox.0,
            y1: bbox.1,
            x2: bbox.2,
            y2: bbox.3,
            class_id,
            confidence,
        }
    }

    /// Box corners as a tuple
    pub fn bbox(&self) -> (u16, u16, u16, u16) {
        (self.x1, self.y1, self.x2, self.y2)
    }

    /// Whether this is the background class
    ///
    /// The transport never filters on this; consumers may.
    pub fn is_background(&self) -> bool {
        self.class_id == BACKGROUND_CLASS
    }

    /// Map the box from resolution `from` to resolution `to`
    ///
    /// Uses integer scaling (`v * to / from`), saturating at `u16::MAX`.
    pub fn rescale(&self, from: Size, to: Size) -> Self {
        let sx = |v: u16| scale(v, from.width, to.width);
        let sy = |v: u16| scale(v, from.height, to.height);

        Self {
            x1: sx(self.x1),
            y1: sy(self.y1),
            x2: sx(self.x2),
            y2: sy(self.y2),
            class_id: self.class_id,
            confidence: self.confidence,
        }
    }
}

fn scale(v: u16, from: u32, to: u32) -> u16 {
    if from == 0 {
        return v;
    }
    let scaled = u64::from(v) * u64::from(to) / u64::from(from);
    u16::try_from(scaled).unwrap_or(u16::MAX)
}
