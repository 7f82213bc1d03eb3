use ndarray::Array2;
use tracing::info;

use crate::consts::AVERAGE_PROGRESS_INTERVAL;
use crate::error::{BurstcalError, Result};
use crate::frame::{Frame, FrameHandle};
use crate::io::FrameReader;

/// Average frames straight from disk without holding the stack in memory.
pub fn mean_from_files(handles: &[FrameHandle], reader: &dyn FrameReader) -> Result<Frame> {
    let first = handles.first().ok_or(BurstcalError::EmptySequence)?;
    let dir = first
        .path()
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    info!(files = handles.len(), dir = %dir, "Computing average image");

    let mut sum: Option<Array2<f64>> = None;
    for (n, handle) in handles.iter().enumerate() {
        let frame = reader.read(handle)?;
        let acc = sum.get_or_insert_with(|| Array2::zeros(frame.shape()));
        if acc.dim() != frame.shape() {
            return Err(BurstcalError::FrameShapeMismatch {
                path: handle.path.clone(),
                expected: acc.dim(),
                found: frame.shape(),
            });
        }
        acc.zip_mut_with(&frame.data, |s, &v| *s += v as f64);

        if n % AVERAGE_PROGRESS_INTERVAL == 0 {
            info!(
                progress = %format!("{:.1}%", 100.0 * n as f64 / handles.len() as f64),
                "Averaging"
            );
        }
    }

    let sum = sum.ok_or(BurstcalError::EmptySequence)?;
    info!(dir = %dir, "Average complete");
    Ok(Frame::new(finish_mean(sum, handles.len())))
}

fn finish_mean(sum: Array2<f64>, count: usize) -> Array2<f32> {
    let n = count as f64;
    sum.mapv(|s| (s / n) as f32)
}

/// Median over all pixels; even counts average the two middle values.
pub fn median(data: &Array2<f32>) -> Option<f32> {
    let mut values: Vec<f32> = data.iter().copied().filter(|v| !v.is_nan()).collect();
    if values.is_empty() {
        return None;
    }
    let mid = values.len() / 2;
    let (_, upper, _) = values.select_nth_unstable_by(mid, f32::total_cmp);
    let upper = *upper;
    if values.len() % 2 == 1 {
        return Some(upper);
    }
    let lower = values[..mid]
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max);
    Some((lower + upper) / 2.0)
}
