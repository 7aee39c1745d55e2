//! Screen capture plus OCR behind one call.
//!
//! Consecutive captures that look the same (perceptual hash within
//! [`PHASH_CHANGE_THRESHOLD`]) reuse the previous OCR text until the
//! cooldown runs out, so polling a static page does not re-run OCR.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Mutex, time::Instant};

use super::capture::ScreenCapture;
use super::ocr::OcrEngine;
use super::phash::{compute_hamming_distance, compute_phash};
use super::preprocess::normalize_ocr_text;
use crate::error::VisionServiceError;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

const OCR_COOLDOWN: Duration = Duration::from_secs(20);
const PHASH_CHANGE_THRESHOLD: u32 = 8;

/// What the pipeline needs from the vision side: the text currently on
/// screen.
#[async_trait]
pub trait TextCapture: Send + Sync {
    async fn init(&self) -> Result<(), VisionServiceError> {
        Ok(())
    }

    async fn capture_text(&self) -> Result<String, VisionServiceError>;

    async fn dispose(&self) {}
}

struct OcrMemo {
    phash: String,
    text: String,
    at: Instant,
}

pub struct VisionService {
    capture: Arc<dyn ScreenCapture>,
    ocr: Arc<dyn OcrEngine>,
    last_ocr: Mutex<Option<OcrMemo>>,
}

impl VisionService {
    pub fn new(capture: Arc<dyn ScreenCapture>, ocr: Arc<dyn OcrEngine>) -> Self {
        Self {
            capture,
            ocr,
            last_ocr: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TextCapture for VisionService {
    async fn init(&self) -> Result<(), VisionServiceError> {
        self.ocr.init().await
    }

    async fn capture_text(&self) -> Result<String, VisionServiceError> {
        let capture_start = Instant::now();
        let frame = self.capture.capture_frame().await?;

        let phash = tokio::task::spawn_blocking({
            let image = Arc::clone(&frame.image);
            move || compute_phash(&image)
        })
        .await
        .map_err(|err| VisionServiceError::other("phash worker join failed", err))?;

        let mut memo = self.last_ocr.lock().await;
        if let Some(previous) = memo.as_ref() {
            if !should_perform_ocr(&phash, &previous.phash, previous.at) {
                log_debug!("frame unchanged (pHash {phash}), reusing previous OCR text");
                return Ok(previous.text.clone());
            }
        }

        let raw = self.ocr.recognize_text(&frame.png).await?;
        let text = normalize_ocr_text(&raw);
        log_info!(
            "OCR read {} chars from {}x{} frame in {}ms",
            text.len(),
            frame.width(),
            frame.height(),
            capture_start.elapsed().as_millis()
        );

        *memo = Some(OcrMemo {
            phash,
            text: text.clone(),
            at: Instant::now(),
        });
        Ok(text)
    }

    async fn dispose(&self) {
        self.ocr.dispose().await;
        *self.last_ocr.lock().await = None;
    }
}

fn should_perform_ocr(current_phash: &str, last_phash: &str, last_ocr_at: Instant) -> bool {
    if last_ocr_at.elapsed() >= OCR_COOLDOWN {
        return true;
    }
    compute_hamming_distance(current_phash, last_phash) >= PHASH_CHANGE_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensing::capture::{test_png, Frame};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedCapture {
        png: std::sync::Mutex<Vec<u8>>,
    }

    #[async_trait]
    impl ScreenCapture for FixedCapture {
        async fn capture_frame(&self) -> Result<Frame, VisionServiceError> {
            Frame::from_png(self.png.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct CountingOcr {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OcrEngine for CountingOcr {
        async fn init(&self) -> Result<(), VisionServiceError> {
            Ok(())
        }

        async fn recognize_text(&self, _png: &[u8]) -> Result<String, VisionServiceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("  reading   number {n} |  "))
        }

        async fn dispose(&self) {}
    }

    fn service(png: Vec<u8>) -> (VisionService, Arc<CountingOcr>, Arc<FixedCapture>) {
        let capture = Arc::new(FixedCapture {
            png: std::sync::Mutex::new(png),
        });
        let ocr = Arc::new(CountingOcr::default());
        (VisionService::new(capture.clone(), ocr.clone()), ocr, capture)
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_frame_reuses_text_until_cooldown() {
        let (vision, ocr, _) = service(test_png(64, 64, 0));

        assert_eq!(vision.capture_text().await.unwrap(), "reading number 0");
        assert_eq!(vision.capture_text().await.unwrap(), "reading number 0");
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(OCR_COOLDOWN).await;
        assert_eq!(vision.capture_text().await.unwrap(), "reading number 1");
    }

    #[tokio::test]
    async fn test_capture_errors_propagate() {
        let (vision, ocr, capture) = service(Vec::new());
        assert!(matches!(
            vision.capture_text().await,
            Err(VisionServiceError::EmptyFrame(0))
        ));
        *capture.png.lock().unwrap() = test_png(64, 64, 0);
        assert!(vision.capture_text().await.is_ok());
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    }
}
