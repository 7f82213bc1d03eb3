//! Frame decoding and artifact writing.
//!
//! Pixel formats are a collaborator concern: the pipeline only sees the
//! [`FrameReader`] trait, so the decoder can be swapped per profile.

pub mod artifact;
pub mod atomic;
pub mod image_io;
pub mod raw;

use crate::error::Result;
use crate::frame::{Frame, FrameHandle};
use crate::profile::{FrameFormat, InstrumentProfile};

/// Decodes one frame file into pixels.
pub trait FrameReader: Send + Sync {
    fn read(&self, handle: &FrameHandle) -> Result<Frame>;
}

/// Reads anything the `image` crate understands.
pub struct ImageFrameReader;

impl FrameReader for ImageFrameReader {
    fn read(&self, handle: &FrameHandle) -> Result<Frame> {
        image_io::load_image(handle.path())
    }
}

/// Reads headerless u16 frames of a fixed (height, width).
pub struct RawFrameReader {
    pub shape: (usize, usize),
}

impl FrameReader for RawFrameReader {
    fn read(&self, handle: &FrameHandle) -> Result<Frame> {
        raw::read_raw16(handle.path(), self.shape)
    }
}

/// Pick the reader a profile's `frameFormat` asks for.
pub fn reader_for(profile: &InstrumentProfile) -> Box<dyn FrameReader> {
    match (profile.frame_format, profile.frame_shape) {
        (FrameFormat::Raw16, Some(shape)) => Box::new(RawFrameReader { shape }),
        _ => Box::new(ImageFrameReader),
    }
}
