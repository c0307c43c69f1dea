use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::DynamicImage;
use log::warn;

/// Pixel rectangle a decoder found a symbol in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// One decoded symbol, as reported by a [`Decoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub payload: Vec<u8>,
    pub bounding_box: BoundingBox,
}

impl Detection {
    pub fn new(payload: impl Into<Vec<u8>>, bounding_box: BoundingBox) -> Self {
        Self {
            payload: payload.into(),
            bounding_box,
        }
    }

    /// Payload as text. `None` for non-UTF-8 or empty payloads.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload)
            .ok()
            .filter(|text| !text.is_empty())
    }
}

/// Camera or any other producer of frames.
pub trait FrameSource: Send + 'static {
    type Frame: Send + 'static;

    /// Next frame, or `None` when the source could not deliver one.
    fn next_frame(&mut self) -> Option<Self::Frame>;

    /// True once the source will never produce another frame.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// Symbol decoder. Results may come in any order.
pub trait Decoder<F>: Send + 'static {
    fn decode(&mut self, frame: &F) -> Vec<Detection>;
}

/// Replays the image files of a directory as frames, in file name order.
pub struct ImageDirSource {
    files: Vec<PathBuf>,
    position: usize,
    looping: bool,
}

impl ImageDirSource {
    pub fn open(dir: &Path, looping: bool) -> Result<Self> {
        let mut files = std::fs::read_dir(dir)
            .with_context(|| format!("failed to list frames in {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && image::ImageFormat::from_path(path).is_ok())
            .collect::<Vec<_>>();
        files.sort();

        Ok(Self {
            files,
            position: 0,
            looping,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageDirSource {
    type Frame = DynamicImage;

    fn next_frame(&mut self) -> Option<DynamicImage> {
        if self.position >= self.files.len() {
            if !self.looping || self.files.is_empty() {
                return None;
            }
            self.position = 0;
        }

        let path = &self.files[self.position];
        self.position += 1;

        match image::open(path) {
            Ok(frame) => Some(frame),
            Err(err) => {
                warn!("failed to load frame {}: {err}", path.display());
                None
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        !self.looping && self.position >= self.files.len()
    }
}
