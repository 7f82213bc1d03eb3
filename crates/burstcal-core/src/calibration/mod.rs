//! Master dark, master flat and gain table construction.

mod builder;
pub mod mean;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use ndarray::Zip;

use crate::consts::EPSILON;
use crate::error::{BurstcalError, Result};
use crate::frame::Frame;

pub use builder::{artifact_path, noise_path, CalibrationBuilder};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CalibrationKind {
    Dark,
    Flat,
    Gain,
}

impl CalibrationKind {
    /// File-name suffix of the cached artifact, e.g. `ZYLA_dark.cal`.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Dark => "dark",
            Self::Flat => "flat",
            Self::Gain => "gain",
        }
    }
}

impl fmt::Display for CalibrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dark => write!(f, "Master dark"),
            Self::Flat => write!(f, "Master flat"),
            Self::Gain => write!(f, "Gain table"),
        }
    }
}

/// A derived calibration frame. Built once per run and never mutated.
#[derive(Clone, Debug)]
pub struct CalibrationArtifact {
    pub profile: String,
    pub kind: CalibrationKind,
    pub frame: Frame,
    /// Where the artifact is cached in the work directory.
    pub path: PathBuf,
}

/// Everything needed to flat-field a profile's data frames.
#[derive(Clone, Debug)]
pub struct CalibrationSet {
    pub dark: Arc<CalibrationArtifact>,
    pub flat: Arc<CalibrationArtifact>,
    pub gain: Arc<CalibrationArtifact>,
    /// Noise cube handed to the reconstruction program.
    pub noise_path: PathBuf,
}

impl CalibrationSet {
    /// (height, width) shared by every calibration frame.
    pub fn shape(&self) -> (usize, usize) {
        self.dark.frame.shape()
    }

    /// `gain * (data - dark)`.
    pub fn correct(&self, data: &Frame, source: &std::path::Path) -> Result<Frame> {
        if data.shape() != self.shape() {
            return Err(BurstcalError::FrameShapeMismatch {
                path: source.to_path_buf(),
                expected: self.shape(),
                found: data.shape(),
            });
        }
        let mut out = data.data.clone();
        Zip::from(&mut out)
            .and(&self.dark.frame.data)
            .and(&self.gain.frame.data)
            .par_for_each(|o, &d, &g| *o = g * (*o - d));
        Ok(Frame::new(out))
    }
}

/// `median(flat - dark) / (flat - dark)`, zero where the difference vanishes.
pub fn gain_table(dark: &Frame, flat: &Frame) -> Result<Frame> {
    if dark.shape() != flat.shape() {
        return Err(BurstcalError::FrameShapeMismatch {
            path: PathBuf::new(),
            expected: dark.shape(),
            found: flat.shape(),
        });
    }
    let diff = &flat.data - &dark.data;
    let med = mean::median(&diff).ok_or(BurstcalError::EmptySequence)?;
    let gain = diff.mapv(|d| if d.abs() < EPSILON { 0.0 } else { med / d });
    Ok(Frame::new(gain))
}
