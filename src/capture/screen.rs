//! Cross-platform screen capture using xcap
//!
//! Each capture looks up the monitor containing the region's origin, grabs it
//! and crops the region out. The monitor handle is not cached: a fresh lookup
//! per frame keeps the source stateless and follows monitor hot-plugging.

use crate::capture::frame::{swap_red_blue, Frame, FrameSource};
use crate::recorder::error::{RecordingError, RecordingResult};
use crate::recorder::state::Region;
use xcap::Monitor;

/// [`FrameSource`] backed by xcap
#[derive(Debug, Default)]
pub struct XcapFrameSource;

impl XcapFrameSource {
    pub fn new() -> Self {
        Self
    }
}

impl FrameSource for XcapFrameSource {
    fn capture(&self, region: &Region) -> RecordingResult<Frame> {
        let monitor = Monitor::from_point(region.left(), region.top()).map_err(|e| {
            RecordingError::CaptureError(format!("No monitor contains {}: {}", region, e))
        })?;

        let origin_x = monitor
            .x()
            .map_err(|e| RecordingError::CaptureError(format!("Monitor x: {}", e)))?;
        let origin_y = monitor
            .y()
            .map_err(|e| RecordingError::CaptureError(format!("Monitor y: {}", e)))?;

        let image = monitor
            .capture_image()
            .map_err(|e| RecordingError::CaptureError(format!("capture_image: {}", e)))?;

        let x = u32::try_from(region.left() - origin_x).unwrap_or(u32::MAX);
        let y = u32::try_from(region.top() - origin_y).unwrap_or(u32::MAX);
        let fits = x.checked_add(region.width()).is_some_and(|r| r <= image.width())
            && y.checked_add(region.height()).is_some_and(|b| b <= image.height());
        if !fits {
            return Err(RecordingError::CaptureError(format!(
                "Region {} extends past the {}x{} monitor at {},{}",
                region,
                image.width(),
                image.height(),
                origin_x,
                origin_y
            )));
        }

        let cropped = image::imageops::crop_imm(&image, x, y, region.width(), region.height()).to_image();
        let mut data = cropped.into_raw();
        swap_red_blue(&mut data);

        Ok(Frame::new(data, region.width(), region.height()))
    }
}
