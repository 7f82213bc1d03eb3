use std::path::Path;

use ndarray::Array2;

use crate::error::Result;
use crate::frame::Frame;

/// Load an image file as a grayscale frame in 16-bit detector units.
pub fn load_image(path: &Path) -> Result<Frame> {
    let img = image::open(path)?;
    let gray = img.to_luma16();
    let (w, h) = gray.dimensions();
    let mut data = Array2::<f32>::zeros((h as usize, w as usize));

    for row in 0..h as usize {
        for col in 0..w as usize {
            let pixel = gray.get_pixel(col as u32, row as u32);
            data[[row, col]] = pixel.0[0] as f32;
        }
    }

    Ok(Frame::new(data))
}
