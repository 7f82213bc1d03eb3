use std::fs::File;
use std::io::Write;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use memmap2::Mmap;
use ndarray::Array2;

use crate::error::{BurstcalError, Result};
use crate::frame::Frame;

use super::atomic::write_atomic;

/// Bytes per sample of a raw detector frame.
const RAW16_BYTES: usize = 2;

/// Read a headerless little-endian u16 frame of a known shape.
///
/// A file whose length does not match `height * width * 2` fails with
/// `FrameShapeMismatch`; the found shape reports the implied row count.
pub fn read_raw16(path: &Path, shape: (usize, usize)) -> Result<Frame> {
    let (height, width) = shape;
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };

    let expected_len = height.checked_mul(width).and_then(|n| n.checked_mul(RAW16_BYTES));
    if expected_len != Some(mmap.len()) {
        let row_bytes = width.saturating_mul(RAW16_BYTES).max(1);
        return Err(BurstcalError::FrameShapeMismatch {
            path: path.to_path_buf(),
            expected: shape,
            found: (mmap.len() / row_bytes, width),
        });
    }

    let mut data = Array2::<f32>::zeros((height, width));
    for (px, chunk) in data.iter_mut().zip(mmap.chunks_exact(RAW16_BYTES)) {
        *px = LittleEndian::read_u16(chunk) as f32;
    }
    Ok(Frame::new(data))
}

/// Write frames back to back as a headerless little-endian f32 cube.
///
/// This is the burst/noise layout the reconstruction program reads: frame
/// major, each frame row-major.
pub fn write_f32_cube<'a, I>(path: &Path, frames: I) -> Result<()>
where
    I: IntoIterator<Item = &'a Frame>,
{
    write_atomic(path, |w| {
        for frame in frames {
            write_f32_plane(w, frame)?;
        }
        Ok(())
    })
}

pub(crate) fn write_f32_plane(w: &mut impl Write, frame: &Frame) -> Result<()> {
    for &v in frame.data.iter() {
        w.write_f32::<LittleEndian>(v)?;
    }
    Ok(())
}

/// Read a headerless f32 cube written by [`write_f32_cube`].
pub fn read_f32_cube(path: &Path, shape: (usize, usize)) -> Result<Vec<Frame>> {
    let (height, width) = shape;
    let bytes = std::fs::read(path)?;
    let plane_bytes = height
        .checked_mul(width)
        .and_then(|n| n.checked_mul(4))
        .unwrap_or(0);
    if plane_bytes == 0 || bytes.len() % plane_bytes != 0 {
        return Err(BurstcalError::FrameShapeMismatch {
            path: path.to_path_buf(),
            expected: shape,
            found: (bytes.len() / width.saturating_mul(4).max(1), width),
        });
    }
    Ok(bytes
        .chunks_exact(plane_bytes)
        .map(|plane| {
            let mut data = Array2::<f32>::zeros((height, width));
            for (px, chunk) in data.iter_mut().zip(plane.chunks_exact(4)) {
                *px = LittleEndian::read_f32(chunk);
            }
            Frame::new(data)
        })
        .collect())
}
