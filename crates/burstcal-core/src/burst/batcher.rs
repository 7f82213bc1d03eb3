use std::path::PathBuf;

use tracing::{info, warn};

use crate::calibration::CalibrationSet;
use crate::consts::PRE_SPECKLE_DIR;
use crate::error::{BurstcalError, Result};
use crate::frame::FrameHandle;
use crate::io::atomic::write_atomic;
use crate::io::raw::write_f32_plane;
use crate::io::FrameReader;
use crate::profile::InstrumentProfile;

/// A complete window of `burstNumber` consecutive data frames.
#[derive(Clone, Debug, PartialEq)]
pub struct Burst {
    /// Position of this window among all complete windows, from 0.
    pub ordinal: usize,
    pub batch: usize,
    pub index: usize,
    pub frames: Vec<FrameHandle>,
    /// Final location of the burst cube.
    pub path: PathBuf,
}

/// A burst that could not be named or written.
#[derive(Debug)]
pub struct BurstFailure {
    pub ordinal: usize,
    pub batch: usize,
    pub index: usize,
    pub error: BurstcalError,
}

/// Result of partitioning (and optionally writing) one profile's data frames.
#[derive(Debug, Default)]
pub struct BatchPlan {
    pub bursts: Vec<Burst>,
    pub failures: Vec<BurstFailure>,
    /// Trailing frames that did not fill a whole burst.
    pub skipped_frames: usize,
}

impl BatchPlan {
    /// Distinct batch numbers in ascending order.
    pub fn batches(&self) -> Vec<usize> {
        let mut batches: Vec<usize> = self.bursts.iter().map(|b| b.batch).collect();
        batches.dedup();
        batches
    }
}

/// (batch, index) of the `ordinal`-th burst.
///
/// Without a split threshold every burst is its own batch at index 0. With
/// one, batches hold `bursts_per_batch` consecutive bursts numbered by index.
pub fn coordinates(ordinal: usize, bursts_per_batch: Option<usize>) -> (usize, usize) {
    match bursts_per_batch {
        Some(per) if per > 0 => (ordinal / per, ordinal % per),
        _ => (ordinal, 0),
    }
}

pub struct BurstBatcher;

impl BurstBatcher {
    /// Partition ordered frames into bursts and name them, without touching
    /// the filesystem. Naming overflows are recorded per burst.
    pub fn plan(profile: &InstrumentProfile, frames: &[FrameHandle]) -> Result<BatchPlan> {
        let template = profile.burst_template()?;
        let n = profile.burst_number;
        let dir = profile.work_base.join(PRE_SPECKLE_DIR);

        let mut plan = BatchPlan {
            skipped_frames: frames.len() % n,
            ..Default::default()
        };

        for (ordinal, window) in frames.chunks_exact(n).enumerate() {
            let (batch, index) = coordinates(ordinal, profile.bursts_per_batch);
            match template.render(&profile.obs_date, &profile.obs_time, batch, index) {
                Ok(name) => plan.bursts.push(Burst {
                    ordinal,
                    batch,
                    index,
                    frames: window.to_vec(),
                    path: dir.join(name),
                }),
                Err(error) => {
                    warn!(profile = %profile.name, batch, index, "Cannot name burst: {error}");
                    plan.failures.push(BurstFailure {
                        ordinal,
                        batch,
                        index,
                        error,
                    });
                }
            }
        }

        if plan.skipped_frames > 0 {
            info!(
                profile = %profile.name,
                skipped = plan.skipped_frames,
                burst_number = n,
                "Dropping trailing partial burst"
            );
        }
        Ok(plan)
    }

    /// Plan, flat-field and write every burst cube. A burst that fails to
    /// write moves to `failures`; the remaining bursts are still written.
    pub fn batch(
        profile: &InstrumentProfile,
        frames: &[FrameHandle],
        calibration: &CalibrationSet,
        reader: &dyn FrameReader,
    ) -> Result<BatchPlan> {
        let planned = Self::plan(profile, frames)?;
        let total = planned.bursts.len();
        info!(
            profile = %profile.name,
            stage = "batching",
            bursts = total,
            dir = %profile.work_base.join(PRE_SPECKLE_DIR).display(),
            "Writing burst files"
        );

        let mut out = BatchPlan {
            bursts: Vec::with_capacity(total),
            failures: planned.failures,
            skipped_frames: planned.skipped_frames,
        };
        for burst in planned.bursts {
            match Self::materialize(&burst, calibration, reader) {
                Ok(()) => {
                    info!(
                        profile = %profile.name,
                        batch = burst.batch,
                        index = burst.index,
                        progress = %format!("{}/{}", burst.ordinal + 1, total),
                        "Burst written"
                    );
                    out.bursts.push(burst);
                }
                Err(error) => {
                    warn!(
                        profile = %profile.name,
                        batch = burst.batch,
                        index = burst.index,
                        "Burst write failed: {error}"
                    );
                    out.failures.push(BurstFailure {
                        ordinal: burst.ordinal,
                        batch: burst.batch,
                        index: burst.index,
                        error,
                    });
                }
            }
        }
        out.failures.sort_by_key(|f| f.ordinal);
        Ok(out)
    }

    /// Flat-field each frame of `burst` and write the cube atomically.
    pub fn materialize(
        burst: &Burst,
        calibration: &CalibrationSet,
        reader: &dyn FrameReader,
    ) -> Result<()> {
        write_atomic(&burst.path, |w| {
            for handle in &burst.frames {
                let raw = reader.read(handle)?;
                let corrected = calibration.correct(&raw, handle.path())?;
                write_f32_plane(w, &corrected)?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_without_threshold() {
        assert_eq!(coordinates(0, None), (0, 0));
        assert_eq!(coordinates(5, None), (5, 0));
    }

    #[test]
    fn coordinates_with_threshold() {
        assert_eq!(coordinates(0, Some(1000)), (0, 0));
        assert_eq!(coordinates(999, Some(1000)), (0, 999));
        assert_eq!(coordinates(1000, Some(1000)), (1, 0));
        assert_eq!(coordinates(7, Some(3)), (2, 1));
    }
}
