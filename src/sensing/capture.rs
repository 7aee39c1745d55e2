use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, ImageFormat};

use super::command::run_command;
use crate::error::VisionServiceError;

const CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

/// Frames narrower or shorter than this are treated as blank captures
/// (hidden or minimised windows).
const MIN_FRAME_SIDE: u32 = 8;

/// One captured screen image, kept both encoded (for OCR) and decoded (for
/// hashing).
#[derive(Clone)]
pub struct Frame {
    pub png: Arc<Vec<u8>>,
    pub image: Arc<DynamicImage>,
}

impl Frame {
    pub fn from_png(png: Vec<u8>) -> Result<Self, VisionServiceError> {
        if png.is_empty() {
            return Err(VisionServiceError::EmptyFrame(0));
        }
        let image = image::load_from_memory_with_format(&png, ImageFormat::Png)
            .map_err(|err| VisionServiceError::InvalidFrame(err.to_string()))?;
        let (width, height) = image.dimensions();
        if width < MIN_FRAME_SIDE || height < MIN_FRAME_SIDE {
            return Err(VisionServiceError::EmptyFrame(png.len()));
        }
        Ok(Self {
            png: Arc::new(png),
            image: Arc::new(image),
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn capture_frame(&self) -> Result<Frame, VisionServiceError>;
}

/// Captures the screen with a helper that writes a PNG to stdout.
pub struct CommandScreenCapture {
    command: Vec<String>,
}

impl CommandScreenCapture {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    /// `screencapture` on macOS, ImageMagick `import` elsewhere.
    pub fn platform_default() -> Self {
        let argv: &[&str] = if cfg!(target_os = "macos") {
            &["screencapture", "-x", "-t", "png", "/dev/stdout"]
        } else {
            &["import", "-window", "root", "png:-"]
        };
        Self::new(argv.iter().map(|part| part.to_string()).collect())
    }
}

#[async_trait]
impl ScreenCapture for CommandScreenCapture {
    async fn capture_frame(&self) -> Result<Frame, VisionServiceError> {
        let png = run_command(&self.command, None, CAPTURE_TIMEOUT)
            .await
            .map_err(|err| VisionServiceError::Capture(format!("{err:#}")))?;

        tokio::task::spawn_blocking(move || Frame::from_png(png))
            .await
            .map_err(|err| VisionServiceError::other("frame decode worker join failed", err))?
    }
}

#[cfg(test)]
pub(crate) fn test_png(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let buffer = image::RgbImage::from_fn(width, height, |x, y| {
        let v = shade.wrapping_add(((x * 7 + y * 3) % 32) as u8);
        image::Rgb([v, v, v])
    });
    let mut out = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(buffer)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_decodes_png() {
        let frame = Frame::from_png(test_png(64, 32, 10)).unwrap();
        assert_eq!((frame.width(), frame.height()), (64, 32));
    }

    #[test]
    fn test_empty_and_tiny_frames_rejected() {
        assert!(matches!(Frame::from_png(Vec::new()), Err(VisionServiceError::EmptyFrame(0))));
        assert!(matches!(
            Frame::from_png(test_png(4, 4, 0)),
            Err(VisionServiceError::EmptyFrame(_))
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            Frame::from_png(b"definitely not a png".to_vec()),
            Err(VisionServiceError::InvalidFrame(_))
        ));
    }
}
