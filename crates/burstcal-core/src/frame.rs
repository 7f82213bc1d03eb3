use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use ndarray::Array2;

/// A single calibrated or raw image frame.
/// Pixel values are f32 in detector units (no normalisation).
#[derive(Clone, Debug)]
pub struct Frame {
    /// Pixel data, row-major, shape = (height, width)
    pub data: Array2<f32>,
}

impl Frame {
    pub fn new(data: Array2<f32>) -> Self {
        Self { data }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// (height, width), the order used throughout for shape checks.
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }
}

/// Ordering key derived from a frame's file name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SortKey {
    /// Plain lexicographic file name.
    Name(String),
    /// Sequence number recovered from the file name, ties broken by name.
    Sequence(u64, String),
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Name(a), Self::Name(b)) => a.cmp(b),
            (Self::Sequence(a, an), Self::Sequence(b, bn)) => a.cmp(b).then_with(|| an.cmp(bn)),
            // Sequenced names sort before unsequenced ones.
            (Self::Sequence(..), Self::Name(_)) => Ordering::Less,
            (Self::Name(_), Self::Sequence(..)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A resolved, existing frame file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameHandle {
    pub path: PathBuf,
    pub sort_key: SortKey,
}

impl FrameHandle {
    pub fn new(path: PathBuf, sort_key: SortKey) -> Self {
        Self { path, sort_key }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
