use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_POLL_INTERVAL_MS;
use crate::error::{BurstcalError, Result};

/// Name of the shared table holding reconstruction method parameters.
pub const METHOD_SECTION: &str = "KISIP_METHOD";
/// Name of the shared table holding telescope/invocation properties.
pub const PROPS_SECTION: &str = "KISIP_PROPS";
/// Name of the shared table describing how to launch the reconstruction binary.
pub const ENV_SECTION: &str = "KISIP_ENV";
/// Name of the optional run-policy table.
pub const PIPELINE_SECTION: &str = "PIPELINE";

pub const SHARED_SECTIONS: [&str; 4] = [METHOD_SECTION, PROPS_SECTION, ENV_SECTION, PIPELINE_SECTION];

/// How frame files of a profile are decoded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrameFormat {
    /// Any format the `image` crate decodes, read as 16-bit luma.
    #[default]
    Image,
    /// Headerless little-endian u16 frames of a fixed size.
    Raw16,
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "Image"),
            Self::Raw16 => write!(f, "Raw 16-bit"),
        }
    }
}

/// How frame file names map to acquisition order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FrameOrder {
    /// Lexicographic by file name.
    #[default]
    Name,
    /// Leading digit run written least-significant digit first (Zyla).
    ReversedDigits,
}

impl fmt::Display for FrameOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name => write!(f, "Name"),
            Self::ReversedDigits => write!(f, "Reversed Digits"),
        }
    }
}

/// A boolean that also accepts the 0/1 integers of older config files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Int(i64),
}

impl Flag {
    pub fn is_set(self) -> bool {
        match self {
            Self::Bool(b) => b,
            Self::Int(i) => i != 0,
        }
    }
}

/// One profile table exactly as written in the config file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileSection {
    pub dark_base: String,
    pub data_base: String,
    pub flat_base: String,
    pub work_base: String,
    pub dark_file_pattern: String,
    pub data_file_pattern: String,
    pub flat_file_pattern: String,
    pub burst_number: Option<i64>,
    pub burst_file_form: String,
    pub speckled_file_form: String,
    pub obs_date: String,
    pub obs_time: String,
    pub noise_file: String,
    pub wavelengthnm: Option<f64>,
    pub kisip_arcsec_per_pix_x: Option<f64>,
    pub kisip_arcsec_per_pix_y: Option<f64>,
    pub exp_timems: Option<f64>,
    pub bursts_per_batch: Option<i64>,
    pub frame_format: FrameFormat,
    pub frame_order: FrameOrder,
    pub frame_width: Option<usize>,
    pub frame_height: Option<usize>,
    /// Per-profile overrides of the shared method parameters.
    #[serde(flatten)]
    pub method: MethodSection,
}

/// Method parameters as written; every key is optional so a profile table can
/// override any subset of the shared `[KISIP_METHOD]` table.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodSection {
    #[serde(rename = "kisipMethodMethod")]
    pub method: Option<i64>,
    #[serde(rename = "kisipMethodSubfieldArcsec")]
    pub subfield_arcsec: Option<f64>,
    #[serde(rename = "kisipMethodPhaseRecLimit")]
    pub phase_rec_limit: Option<f64>,
    #[serde(rename = "kisipMethodUX")]
    pub ux: Option<i64>,
    #[serde(rename = "kisipMethodUV")]
    pub uv: Option<i64>,
    #[serde(rename = "kisipMethodMaxIter")]
    pub max_iter: Option<i64>,
    #[serde(rename = "kisipMethodSNThresh")]
    pub sn_thresh: Option<f64>,
    #[serde(rename = "kisipMethodWeightExp")]
    pub weight_exp: Option<f64>,
    #[serde(rename = "kisipMethodPhaseRecApod")]
    pub phase_rec_apod: Option<f64>,
    #[serde(rename = "kisipMethodNoiseFilter")]
    pub noise_filter: Option<Flag>,
}

impl MethodSection {
    /// Overlay `self` on `base`, keeping `self`'s values where present.
    pub fn merged_over(&self, base: &MethodSection) -> MethodSection {
        MethodSection {
            method: self.method.or(base.method),
            subfield_arcsec: self.subfield_arcsec.or(base.subfield_arcsec),
            phase_rec_limit: self.phase_rec_limit.or(base.phase_rec_limit),
            ux: self.ux.or(base.ux),
            uv: self.uv.or(base.uv),
            max_iter: self.max_iter.or(base.max_iter),
            sn_thresh: self.sn_thresh.or(base.sn_thresh),
            weight_exp: self.weight_exp.or(base.weight_exp),
            phase_rec_apod: self.phase_rec_apod.or(base.phase_rec_apod),
            noise_filter: self.noise_filter.or(base.noise_filter),
        }
    }

    /// Resolve into complete parameters, naming the first missing key.
    pub fn resolve(&self) -> std::result::Result<MethodParameters, &'static str> {
        Ok(MethodParameters {
            method: self.method.ok_or("kisipMethodMethod")?,
            subfield_arcsec: self.subfield_arcsec.ok_or("kisipMethodSubfieldArcsec")?,
            phase_rec_limit: self.phase_rec_limit.ok_or("kisipMethodPhaseRecLimit")?,
            ux: self.ux.ok_or("kisipMethodUX")?,
            uv: self.uv.ok_or("kisipMethodUV")?,
            max_iter: self.max_iter.ok_or("kisipMethodMaxIter")?,
            sn_thresh: self.sn_thresh.ok_or("kisipMethodSNThresh")?,
            weight_exp: self.weight_exp.ok_or("kisipMethodWeightExp")?,
            phase_rec_apod: self.phase_rec_apod.ok_or("kisipMethodPhaseRecApod")?,
            noise_filter: self.noise_filter.ok_or("kisipMethodNoiseFilter")?.is_set(),
        })
    }
}

/// Reconstruction tuning values.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodParameters {
    pub method: i64,
    /// Subfield edge length in arcseconds.
    pub subfield_arcsec: f64,
    pub phase_rec_limit: f64,
    pub ux: i64,
    pub uv: i64,
    /// Iteration limit.
    pub max_iter: i64,
    /// Signal-to-noise threshold.
    pub sn_thresh: f64,
    pub weight_exp: f64,
    pub phase_rec_apod: f64,
    pub noise_filter: bool,
}

impl MethodParameters {
    /// Subfield size in pixels for a given plate scale, at least one pixel.
    pub fn subfield_pixels(&self, arcsec_per_pixel: f64) -> usize {
        if arcsec_per_pixel <= 0.0 || !arcsec_per_pixel.is_finite() {
            return 1;
        }
        let px = (self.subfield_arcsec / arcsec_per_pixel).round();
        if px < 1.0 {
            1
        } else {
            px as usize
        }
    }
}

/// Telescope and data-layout properties handed to the reconstruction program.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvocationProperties {
    #[serde(rename = "kisipPropsHeaderOff")]
    pub header_off: i64,
    #[serde(rename = "kisipPropsTelescopeDiamm")]
    pub telescope_diam_mm: f64,
    #[serde(rename = "kisipPropsAoLockX")]
    pub ao_lock_x: f64,
    #[serde(rename = "kisipPropsAoLockY")]
    pub ao_lock_y: f64,
    #[serde(rename = "kisipPropsAoUsed")]
    pub ao_used: Flag,
}

/// How to invoke the external reconstruction program.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    /// Directory holding the launcher and the reconstruction binary.
    #[serde(rename = "kisipEnvBin")]
    pub bin: PathBuf,
    /// Library directory prepended to the child's `LD_LIBRARY_PATH`.
    #[serde(rename = "kisipEnvLib", default)]
    pub lib: PathBuf,
    #[serde(rename = "kisipEnvMpiNproc")]
    pub nproc: u32,
    /// Launcher executable name, e.g. `mpirun`.
    #[serde(rename = "kisipEnvMpirun")]
    pub mpirun: String,
    /// Reconstruction executable name.
    #[serde(rename = "kisipEnvKisipExe")]
    pub kisip_exe: String,
    /// Appended to the rendered speckled file name to form the expected output.
    #[serde(rename = "kisipEnvOutputSuffix", default)]
    pub output_suffix: String,
}

/// Run policy shared by every profile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelinePolicy {
    /// Reconstruction jobs allowed to run at once within a profile.
    pub max_concurrent_jobs: usize,
    /// Relaunches of a failed job before it is reported failed.
    pub max_retries: u32,
    /// Exit-status polling interval for running jobs.
    pub poll_interval_ms: u64,
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 1,
            max_retries: 0,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl PipelinePolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(BurstcalError::Config(
                "maxConcurrentJobs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
