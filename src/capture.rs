use std::path::Path;

use image::{DynamicImage, ImageBuffer, Rgb};
use serde::{Deserialize, Serialize};

/// A single captured color frame. Wraps an RGB8 buffer so callers never
/// touch raw bytes directly.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgb: ImageBuffer<Rgb<u8>, Vec<u8>>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        ImageBuffer::from_raw(width, height, data).map(|rgb| Frame { width, height, rgb })
    }
}

/// The seam between this crate's capture policy (ROI, grayscale, motion
/// diffing) and a real camera binding. Implemented here only as a thin
/// contract; the V4L2 adapter that backs this in production is out of
/// scope and lives outside this crate.
pub trait CameraDevice: Send {
    /// Opens (or re-opens) the device at the given resolution. Never
    /// panics; returns `false` on any failure.
    fn open(&mut self, width: u32, height: u32) -> bool;

    fn is_open(&self) -> bool;

    fn close(&mut self);

    /// Grabs one frame. Returns `None` if the device isn't open or a read
    /// fails.
    fn capture_frame(&mut self) -> Option<Frame>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraTestResult {
    pub accessible: bool,
    pub opened: bool,
    pub frame_captured: bool,
    pub resolution: Option<(u32, u32)>,
    pub roi_valid: bool,
    pub error: Option<String>,
}

/// Owns the camera device through its lifetime. Single-owner by design:
/// AutoPunch and the calibration live-view stream share one `Capture`
/// instance (behind a mutex at the call site) rather than opening the
/// device twice.
pub struct Capture {
    device: Box<dyn CameraDevice>,
    width: u32,
    height: u32,
}

impl Capture {
    pub fn new(device: Box<dyn CameraDevice>, width: u32, height: u32) -> Self {
        Self { device, width, height }
    }

    /// Idempotent: calling `open` on an already-open device is a no-op
    /// success, never a re-open.
    pub fn open(&mut self) -> bool {
        if self.device.is_open() {
            return true;
        }
        self.device.open(self.width, self.height)
    }

    pub fn capture_frame(&mut self) -> Option<Frame> {
        if !self.device.is_open() && !self.open() {
            return None;
        }
        self.device.capture_frame()
    }

    /// Closes the underlying device. Idempotent: closing an already-closed
    /// device is a no-op.
    pub fn close(&mut self) {
        self.device.close();
    }

    /// Crops to `roi`. Falls back to the full frame (logging a warning,
    /// never crashing) if the ROI doesn't fit within the frame bounds.
    pub fn get_roi_frame(&mut self, roi: Roi) -> Option<Frame> {
        let frame = self.capture_frame()?;
        if roi.x.saturating_add(roi.w) > frame.width || roi.y.saturating_add(roi.h) > frame.height {
            tracing::warn!(
                ?roi,
                frame_width = frame.width,
                frame_height = frame.height,
                "roi exceeds frame bounds, falling back to full frame"
            );
            return Some(frame);
        }
        let cropped = image::imageops::crop_imm(&frame.rgb, roi.x, roi.y, roi.w, roi.h).to_image();
        Some(Frame {
            width: roi.w,
            height: roi.h,
            rgb: cropped,
        })
    }

    /// Converts a frame to 8-bit grayscale (required by the NBIS extractor)
    /// and writes it as a PNG to `path`.
    pub fn capture_fingerprint(&mut self, roi: Roi, path: &Path) -> Result<(), String> {
        let frame = self
            .get_roi_frame(roi)
            .ok_or_else(|| "no frame available".to_string())?;
        let gray = DynamicImage::ImageRgb8(frame.rgb).to_luma8();
        gray.save(path).map_err(|e| e.to_string())
    }

    /// JPEG-encodes the current frame for the calibration live view.
    pub fn get_frame_jpeg(&mut self) -> Option<Vec<u8>> {
        let frame = self.capture_frame()?;
        let mut buf = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buf);
        DynamicImage::ImageRgb8(frame.rgb)
            .write_to(&mut cursor, image::ImageFormat::Jpeg)
            .ok()?;
        Some(buf)
    }

    pub fn test_camera(&mut self, roi: Roi) -> CameraTestResult {
        let accessible = true;
        let opened = self.open();
        if !opened {
            return CameraTestResult {
                accessible,
                opened: false,
                frame_captured: false,
                resolution: None,
                roi_valid: false,
                error: Some("failed to open camera device".to_string()),
            };
        }
        let frame = self.capture_frame();
        let frame_captured = frame.is_some();
        let resolution = frame.as_ref().map(|f| (f.width, f.height));
        let roi_valid = frame
            .as_ref()
            .map(|f| roi.x + roi.w <= f.width && roi.y + roi.h <= f.height)
            .unwrap_or(false);
        CameraTestResult {
            accessible,
            opened,
            frame_captured,
            resolution,
            roi_valid,
            error: if frame_captured {
                None
            } else {
                Some("failed to capture a test frame".to_string())
            },
        }
    }
}

/// Computes the fraction of pixels that changed beyond `threshold_delta`
/// between two grayscale-equivalent frames. Used by AutoPunch's
/// finger-placement detector against a baseline frame.
pub fn frame_difference_ratio(baseline: &Frame, current: &Frame, threshold_delta: u8) -> f64 {
    if baseline.width != current.width || baseline.height != current.height {
        return 1.0;
    }
    let base_gray = DynamicImage::ImageRgb8(baseline.rgb.clone()).to_luma8();
    let cur_gray = DynamicImage::ImageRgb8(current.rgb.clone()).to_luma8();
    let total = base_gray.len();
    if total == 0 {
        return 0.0;
    }
    let changed = base_gray
        .as_raw()
        .iter()
        .zip(cur_gray.as_raw().iter())
        .filter(|(a, b)| (**a as i32 - **b as i32).unsigned_abs() as u8 > threshold_delta)
        .count();
    changed as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeCamera {
        open: bool,
        should_open: bool,
        frames: Vec<Frame>,
    }

    impl FakeCamera {
        fn new(should_open: bool, frames: Vec<Frame>) -> Self {
            Self {
                open: false,
                should_open,
                frames,
            }
        }
    }

    impl CameraDevice for FakeCamera {
        fn open(&mut self, _width: u32, _height: u32) -> bool {
            self.open = self.should_open;
            self.open
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn close(&mut self) {
            self.open = false;
        }

        fn capture_frame(&mut self) -> Option<Frame> {
            if !self.open {
                return None;
            }
            self.frames.pop()
        }
    }

    fn solid_frame(width: u32, height: u32, value: u8) -> Frame {
        Frame::new(width, height, vec![value; (width * height * 3) as usize]).unwrap()
    }

    #[test]
    fn open_is_idempotent() {
        let device = FakeCamera::new(true, vec![]);
        let mut capture = Capture::new(Box::new(device), 640, 480);
        assert!(capture.open());
        assert!(capture.open());
    }

    #[test]
    fn open_failure_is_reported_not_raised() {
        let device = FakeCamera::new(false, vec![]);
        let mut capture = Capture::new(Box::new(device), 640, 480);
        assert!(!capture.open());
    }

    #[test]
    fn roi_within_bounds_crops_frame() {
        let frame = solid_frame(100, 100, 128);
        let device = FakeCamera::new(true, vec![frame]);
        let mut capture = Capture::new(Box::new(device), 100, 100);
        let roi = Roi { x: 10, y: 10, w: 20, h: 20 };
        let cropped = capture.get_roi_frame(roi).unwrap();
        assert_eq!((cropped.width, cropped.height), (20, 20));
    }

    #[test]
    fn roi_exceeding_bounds_falls_back_to_full_frame() {
        let frame = solid_frame(100, 100, 128);
        let device = FakeCamera::new(true, vec![frame]);
        let mut capture = Capture::new(Box::new(device), 100, 100);
        let roi = Roi { x: 90, y: 90, w: 50, h: 50 };
        let fallback = capture.get_roi_frame(roi).unwrap();
        assert_eq!((fallback.width, fallback.height), (100, 100));
    }

    #[test]
    fn capture_frame_returns_none_when_device_closed_and_open_fails() {
        let device = FakeCamera::new(false, vec![solid_frame(10, 10, 0)]);
        let mut capture = Capture::new(Box::new(device), 10, 10);
        assert!(capture.capture_frame().is_none());
    }

    #[test]
    fn test_camera_reports_full_diagnostic_record() {
        let frame = solid_frame(640, 480, 100);
        let device = FakeCamera::new(true, vec![frame]);
        let mut capture = Capture::new(Box::new(device), 640, 480);
        let result = capture.test_camera(Roi { x: 0, y: 0, w: 320, h: 240 });
        assert!(result.accessible);
        assert!(result.opened);
        assert!(result.frame_captured);
        assert_eq!(result.resolution, Some((640, 480)));
        assert!(result.roi_valid);
    }

    #[test]
    fn frame_difference_ratio_detects_full_change() {
        let baseline = solid_frame(4, 4, 0);
        let current = solid_frame(4, 4, 255);
        assert_eq!(frame_difference_ratio(&baseline, &current, 30), 1.0);
    }

    #[test]
    fn frame_difference_ratio_zero_for_identical_frames() {
        let baseline = solid_frame(4, 4, 100);
        let current = solid_frame(4, 4, 100);
        assert_eq!(frame_difference_ratio(&baseline, &current, 30), 0.0);
    }

    #[test]
    fn frame_difference_ratio_mismatched_dimensions_reports_full_change() {
        let baseline = solid_frame(4, 4, 100);
        let current = solid_frame(8, 8, 100);
        assert_eq!(frame_difference_ratio(&baseline, &current, 30), 1.0);
    }
}
