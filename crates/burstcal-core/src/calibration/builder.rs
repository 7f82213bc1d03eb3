use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::consts::{ARTIFACT_EXTENSION, PRE_SPECKLE_DIR};
use crate::error::{BurstcalError, Result};
use crate::frame::Frame;
use crate::index::FrameIndexer;
use crate::io::artifact::{read_master, write_master};
use crate::io::raw::write_f32_cube;
use crate::io::{reader_for, FrameReader};
use crate::profile::InstrumentProfile;

use super::mean::mean_from_files;
use super::{gain_table, CalibrationArtifact, CalibrationKind, CalibrationSet};

/// Builds and memoizes calibration artifacts per profile.
///
/// An artifact already present in the work directory is loaded instead of
/// rebuilt; once built or loaded it is reused for the rest of the run.
#[derive(Default)]
pub struct CalibrationBuilder {
    cache: HashMap<(String, CalibrationKind), Arc<CalibrationArtifact>>,
}

impl CalibrationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build_dark(&mut self, profile: &InstrumentProfile) -> Result<Arc<CalibrationArtifact>> {
        let reader = reader_for(profile);
        self.build_average(profile, CalibrationKind::Dark, reader.as_ref())
    }

    pub fn build_flat(&mut self, profile: &InstrumentProfile) -> Result<Arc<CalibrationArtifact>> {
        let reader = reader_for(profile);
        self.build_average(profile, CalibrationKind::Flat, reader.as_ref())
    }

    /// Dark, flat, gain and noise cube for one profile.
    pub fn build_set(&mut self, profile: &InstrumentProfile) -> Result<CalibrationSet> {
        let reader = reader_for(profile);
        self.build_set_with(profile, reader.as_ref())
    }

    pub fn build_set_with(
        &mut self,
        profile: &InstrumentProfile,
        reader: &dyn FrameReader,
    ) -> Result<CalibrationSet> {
        let dark = self.build_average(profile, CalibrationKind::Dark, reader)?;
        let flat = self.build_average(profile, CalibrationKind::Flat, reader)?;
        if flat.frame.shape() != dark.frame.shape() {
            return Err(BurstcalError::FrameShapeMismatch {
                path: flat.path.clone(),
                expected: dark.frame.shape(),
                found: flat.frame.shape(),
            });
        }
        let gain = self.memoized(profile, CalibrationKind::Gain, || {
            info!(profile = %profile.name, "Computing gain table");
            gain_table(&dark.frame, &flat.frame)
        })?;

        let set = CalibrationSet {
            dark,
            flat,
            gain,
            noise_path: noise_path(profile),
        };
        self.ensure_noise_cube(profile, &set, reader)?;
        Ok(set)
    }

    /// Number of artifacts built or loaded so far.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn build_average(
        &mut self,
        profile: &InstrumentProfile,
        kind: CalibrationKind,
        reader: &dyn FrameReader,
    ) -> Result<Arc<CalibrationArtifact>> {
        let (base, pattern) = match kind {
            CalibrationKind::Dark => (&profile.dark_base, &profile.dark_pattern),
            _ => (&profile.flat_base, &profile.flat_pattern),
        };
        self.memoized(profile, kind, || {
            let frames = FrameIndexer::new(profile.frame_order).index(base, pattern, true)?;
            info!(
                profile = %profile.name,
                stage = "calibration",
                kind = %kind,
                frames = frames.len(),
                "Averaging calibration frames"
            );
            mean_from_files(frames.as_slice(), reader)
        })
    }

    fn memoized<F>(
        &mut self,
        profile: &InstrumentProfile,
        kind: CalibrationKind,
        build: F,
    ) -> Result<Arc<CalibrationArtifact>>
    where
        F: FnOnce() -> Result<Frame>,
    {
        let key = (profile.name.clone(), kind);
        if let Some(artifact) = self.cache.get(&key) {
            return Ok(Arc::clone(artifact));
        }

        let path = artifact_path(profile, kind);
        let frame = if path.is_file() {
            info!(profile = %profile.name, kind = %kind, path = %path.display(), "Using cached artifact");
            read_master(&path)?
        } else {
            let frame = build()?;
            write_master(&path, &frame)?;
            info!(profile = %profile.name, kind = %kind, path = %path.display(), "Saved artifact");
            frame
        };

        let artifact = Arc::new(CalibrationArtifact {
            profile: profile.name.clone(),
            kind,
            frame,
            path,
        });
        self.cache.insert(key, Arc::clone(&artifact));
        Ok(artifact)
    }

    /// The first `burstNumber` flats, dark-subtracted and gain-corrected.
    fn ensure_noise_cube(
        &self,
        profile: &InstrumentProfile,
        set: &CalibrationSet,
        reader: &dyn FrameReader,
    ) -> Result<()> {
        if set.noise_path.is_file() {
            return Ok(());
        }
        let flats = FrameIndexer::new(profile.frame_order).index(
            &profile.flat_base,
            &profile.flat_pattern,
            true,
        )?;
        let mut cube = Vec::with_capacity(profile.burst_number);
        for handle in flats.iter().take(profile.burst_number) {
            let raw = reader.read(handle)?;
            cube.push(set.correct(&raw, handle.path())?);
        }
        info!(
            profile = %profile.name,
            frames = cube.len(),
            path = %set.noise_path.display(),
            "Saving noise cube"
        );
        write_f32_cube(&set.noise_path, &cube)
    }
}

/// `<workBase>/<PROFILE>_<kind>.cal`
pub fn artifact_path(profile: &InstrumentProfile, kind: CalibrationKind) -> PathBuf {
    profile.work_base.join(format!(
        "{}_{}.{}",
        profile.name,
        kind.suffix(),
        ARTIFACT_EXTENSION
    ))
}

/// `<workBase>/preSpeckle/<noiseFile>`
pub fn noise_path(profile: &InstrumentProfile) -> PathBuf {
    profile.work_base.join(PRE_SPECKLE_DIR).join(&profile.noise_file)
}
