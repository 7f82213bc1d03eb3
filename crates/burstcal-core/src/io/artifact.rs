use std::io::Write;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;
use ndarray::Array2;

use crate::consts::{ARTIFACT_HEADER_SIZE, ARTIFACT_MAGIC};
use crate::error::{BurstcalError, Result};
use crate::frame::Frame;

use super::atomic::write_atomic;
use super::raw::write_f32_plane;

/// Write a master frame: 8-byte magic, width and height as little-endian
/// u32, then row-major little-endian f32 pixels.
pub fn write_master(path: &Path, frame: &Frame) -> Result<()> {
    write_atomic(path, |w| {
        w.write_all(ARTIFACT_MAGIC)?;
        w.write_u32::<LittleEndian>(frame.width() as u32)?;
        w.write_u32::<LittleEndian>(frame.height() as u32)?;
        write_f32_plane(w, frame)
    })
}

/// Read a master frame written by [`write_master`].
pub fn read_master(path: &Path) -> Result<Frame> {
    let invalid = |reason: &str| BurstcalError::InvalidArtifact {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let file = std::fs::File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };

    if mmap.len() < ARTIFACT_HEADER_SIZE {
        return Err(invalid("file too small for header"));
    }
    if &mmap[0..8] != ARTIFACT_MAGIC {
        return Err(invalid("missing magic"));
    }

    let mut cursor = std::io::Cursor::new(&mmap[8..ARTIFACT_HEADER_SIZE]);
    let width = cursor.read_u32::<LittleEndian>()? as usize;
    let height = cursor.read_u32::<LittleEndian>()? as usize;
    if width == 0 || height == 0 {
        return Err(invalid("zero dimension"));
    }

    let expected = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(4))
        .and_then(|n| n.checked_add(ARTIFACT_HEADER_SIZE))
        .ok_or_else(|| invalid(&format!("dimensions {width}x{height} overflow")))?;
    if mmap.len() != expected {
        return Err(invalid(&format!(
            "expected {expected} bytes for {width}x{height}, got {}",
            mmap.len()
        )));
    }

    let mut pixels = std::io::Cursor::new(&mmap[ARTIFACT_HEADER_SIZE..]);
    let mut data = Array2::<f32>::zeros((height, width));
    for px in data.iter_mut() {
        *px = pixels.read_f32::<LittleEndian>()?;
    }
    Ok(Frame::new(data))
}
