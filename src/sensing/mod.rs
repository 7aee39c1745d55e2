pub mod capture;
pub mod command;
pub mod observer;
pub mod ocr;
pub mod phash;
pub mod preprocess;
pub mod vision;

pub use capture::{CommandScreenCapture, Frame, ScreenCapture};
pub use observer::{window_identifier, CommandWindowObserver, WindowObserver};
pub use ocr::{OcrEngine, TesseractOcr};
pub use vision::{TextCapture, VisionService};
