mod controller;
pub mod debounce;
mod loop_worker;
pub mod replay;
pub mod source;

pub use controller::ScannerController;
pub use debounce::{Clock, DebounceGate, ManualClock, SystemClock};
pub use loop_worker::{scan_loop, CaptureSettings, ScanLoopReport, ScannerStatus};
pub use replay::{ReplayDecoder, ReplaySource};
pub use source::{BoundingBox, Decoder, Detection, FrameSource, ImageDirSource};
