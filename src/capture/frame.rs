//! Screen frames and the frame source contract

use crate::recorder::error::{RecordingError, RecordingResult};
use crate::recorder::state::Region;

/// One raw screen capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw pixel data (BGRA format, tightly packed)
    pub data: Vec<u8>,

    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    /// Reject frames whose byte layout does not match what the encoder was told to expect
    pub fn check_layout(&self, region: &Region) -> RecordingResult<()> {
        let expected = region.frame_len();
        if self.width != region.width() || self.height != region.height() || self.data.len() != expected {
            return Err(RecordingError::CaptureError(format!(
                "Frame is {}x{} ({} bytes), expected {}x{} ({} bytes)",
                self.width,
                self.height,
                self.data.len(),
                region.width(),
                region.height(),
                expected
            )));
        }
        Ok(())
    }
}

/// Produces one screenshot of a region on demand.
///
/// Implementations hold no timing state; pacing belongs to the scheduler.
/// A region that is off-screen or otherwise invalid must fail rather than
/// return a frame of the wrong size.
pub trait FrameSource: Send + Sync {
    fn capture(&self, region: &Region) -> RecordingResult<Frame>;
}

/// Swap the red and blue channels of packed 4-byte pixels in place (RGBA <-> BGRA)
pub fn swap_red_blue(data: &mut [u8]) {
    for pixel in data.chunks_exact_mut(4) {
        pixel.swap(0, 2);
    }
}
