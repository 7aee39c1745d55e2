use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;

use super::command::{is_missing_program, run_command};
use crate::error::VisionServiceError;

const OCR_TIMEOUT: Duration = Duration::from_secs(20);

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn init(&self) -> Result<(), VisionServiceError>;
    async fn recognize_text(&self, png: &[u8]) -> Result<String, VisionServiceError>;
    async fn dispose(&self);
}

/// Runs the `tesseract` CLI, piping the PNG in on stdin.
pub struct TesseractOcr {
    command: Vec<String>,
    initialized: AtomicBool,
}

impl TesseractOcr {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn platform_default() -> Self {
        Self::new(
            ["tesseract", "stdin", "stdout"]
                .iter()
                .map(|part| part.to_string())
                .collect(),
        )
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn init(&self) -> Result<(), VisionServiceError> {
        let Some(program) = self.command.first() else {
            return Err(VisionServiceError::Ocr("empty OCR command".into()));
        };
        let probe = vec![program.clone(), "--version".to_string()];
        match run_command(&probe, None, OCR_TIMEOUT).await {
            Ok(_) => {
                self.initialized.store(true, Ordering::SeqCst);
                log::info!("OCR engine '{program}' ready");
                Ok(())
            }
            Err(err) if is_missing_program(&err) => Err(VisionServiceError::Ocr(format!(
                "'{program}' is not installed"
            ))),
            Err(err) => Err(VisionServiceError::Ocr(format!("{err:#}"))),
        }
    }

    async fn recognize_text(&self, png: &[u8]) -> Result<String, VisionServiceError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(VisionServiceError::OcrNotInitialized);
        }
        if png.is_empty() {
            return Err(VisionServiceError::InvalidInput("empty image".into()));
        }
        let out = run_command(&self.command, Some(png), OCR_TIMEOUT)
            .await
            .map_err(|err| VisionServiceError::Ocr(format!("{err:#}")))?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    async fn dispose(&self) {
        self.initialized.store(false, Ordering::SeqCst);
    }
}
