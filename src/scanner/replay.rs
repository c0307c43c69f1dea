//! Recorded detection logs, for driving the pipeline without a camera.
//!
//! One line per frame. Codes in a frame are separated by tabs, an empty line
//! is a frame with nothing in it and a line holding only `!` is a frame the
//! source failed to deliver.

use std::{
    collections::VecDeque,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use anyhow::{Context, Result};

use super::source::{BoundingBox, Decoder, Detection, FrameSource};

const FAILED_FRAME: &str = "!";

pub struct ReplaySource {
    frames: VecDeque<Option<Vec<String>>>,
}

impl ReplaySource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open replay log {}", path.display()))?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader(reader: impl BufRead) -> Result<Self> {
        let mut frames = VecDeque::new();
        for line in reader.lines() {
            let line = line.context("failed to read replay log")?;
            let line = line.trim_end_matches('\r');
            if line == FAILED_FRAME {
                frames.push_back(None);
            } else {
                let codes = line
                    .split('\t')
                    .filter(|code| !code.is_empty())
                    .map(str::to_string)
                    .collect();
                frames.push_back(Some(codes));
            }
        }
        Ok(Self { frames })
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for ReplaySource {
    type Frame = Vec<String>;

    fn next_frame(&mut self) -> Option<Vec<String>> {
        self.frames.pop_front().flatten()
    }

    fn is_exhausted(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Pass-through decoder for replayed frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplayDecoder;

impl Decoder<Vec<String>> for ReplayDecoder {
    fn decode(&mut self, frame: &Vec<String>) -> Vec<Detection> {
        frame
            .iter()
            .map(|code| Detection::new(code.as_bytes(), BoundingBox::default()))
            .collect()
    }
}
