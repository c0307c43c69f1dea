pub mod scan;

pub use scan::{NoteUpdate, PendingScan, ScanEvent};
