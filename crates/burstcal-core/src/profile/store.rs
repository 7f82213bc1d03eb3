use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::burst::naming::FileTemplate;
use crate::error::{BurstcalError, ProfileValidationError, Result};

use super::config::{
    EnvironmentSpec, FrameFormat, FrameOrder, InvocationProperties, MethodParameters,
    MethodSection, PipelinePolicy, ProfileSection, ENV_SECTION, METHOD_SECTION,
    PIPELINE_SECTION, PROPS_SECTION, SHARED_SECTIONS,
};

/// Immutable, validated configuration for one instrument/band.
#[derive(Clone, Debug)]
pub struct InstrumentProfile {
    pub name: String,
    pub dark_base: PathBuf,
    pub data_base: PathBuf,
    pub flat_base: PathBuf,
    pub work_base: PathBuf,
    pub dark_pattern: String,
    pub data_pattern: String,
    pub flat_pattern: String,
    pub burst_number: usize,
    pub burst_form: Option<FileTemplate>,
    pub speckled_form: Option<FileTemplate>,
    pub obs_date: String,
    pub obs_time: String,
    pub noise_file: String,
    pub wavelength_nm: Option<f64>,
    pub arcsec_per_pix_x: f64,
    pub arcsec_per_pix_y: f64,
    pub exp_time_ms: Option<f64>,
    /// Bursts per batch before the index rolls over; `None` keeps index at 0.
    pub bursts_per_batch: Option<usize>,
    pub frame_format: FrameFormat,
    pub frame_order: FrameOrder,
    /// (height, width) for raw frames.
    pub frame_shape: Option<(usize, usize)>,
    pub method: MethodParameters,
    inactive_fields: Vec<&'static str>,
}

impl InstrumentProfile {
    /// A profile is active when every directory, pattern and date/time
    /// field is filled in.
    pub fn is_active(&self) -> bool {
        self.inactive_fields.is_empty()
    }

    /// Config keys left empty, which is what makes a profile inactive.
    pub fn empty_fields(&self) -> &[&'static str] {
        &self.inactive_fields
    }

    pub fn burst_template(&self) -> Result<&FileTemplate> {
        self.burst_form.as_ref().ok_or_else(|| self.missing("burstFileForm"))
    }

    pub fn speckled_template(&self) -> Result<&FileTemplate> {
        self.speckled_form
            .as_ref()
            .ok_or_else(|| self.missing("speckledFileForm"))
    }

    fn missing(&self, field: &str) -> BurstcalError {
        ProfileValidationError::new(&self.name, field, "template not configured").into()
    }
}

/// All profiles from one config file, plus the shared sections.
#[derive(Clone, Debug)]
pub struct ProfileStore {
    profiles: BTreeMap<String, InstrumentProfile>,
    rejected: BTreeMap<String, ProfileValidationError>,
    pub props: InvocationProperties,
    pub env: EnvironmentSpec,
    pub policy: PipelinePolicy,
}

impl ProfileStore {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parse a config document. Shared sections must be valid; each profile
    /// section is validated on its own and a bad one is recorded as rejected
    /// without affecting the rest.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let doc: toml::Table = toml::from_str(text)?;

        let shared_method: MethodSection = shared_section(&doc, METHOD_SECTION)?;
        let props: InvocationProperties = shared_section(&doc, PROPS_SECTION)?;
        let env: EnvironmentSpec = shared_section(&doc, ENV_SECTION)?;
        let policy: PipelinePolicy = match doc.get(PIPELINE_SECTION) {
            Some(value) => value.clone().try_into().map_err(|e| {
                BurstcalError::Config(format!("[{PIPELINE_SECTION}]: {e}"))
            })?,
            None => PipelinePolicy::default(),
        };
        policy.validate()?;

        let mut profiles = BTreeMap::new();
        let mut rejected = BTreeMap::new();

        for (name, value) in &doc {
            if SHARED_SECTIONS.contains(&name.as_str()) || !value.is_table() {
                continue;
            }
            let parsed = value
                .clone()
                .try_into::<ProfileSection>()
                .map_err(|e| ProfileValidationError::new(name, "section", e.to_string()))
                .and_then(|section| validate_profile(name, &section, &shared_method));

            match parsed {
                Ok(profile) => {
                    info!(
                        profile = %name,
                        active = profile.is_active(),
                        burst_number = profile.burst_number,
                        "Loaded profile"
                    );
                    profiles.insert(name.clone(), profile);
                }
                Err(err) => {
                    warn!(profile = %name, field = %err.field, "Rejected profile: {}", err.reason);
                    rejected.insert(name.clone(), err);
                }
            }
        }

        Ok(Self {
            profiles,
            rejected,
            props,
            env,
            policy,
        })
    }

    /// Look up a profile by name. Names are matched exactly, then
    /// upper-cased, since instrument sections are conventionally upper case.
    pub fn get(&self, name: &str) -> Result<&InstrumentProfile> {
        let upper = name.to_uppercase();
        for key in [name, upper.as_str()] {
            if let Some(profile) = self.profiles.get(key) {
                return Ok(profile);
            }
            if let Some(err) = self.rejected.get(key) {
                return Err(err.clone().into());
            }
        }
        Err(BurstcalError::UnknownProfile(name.to_string()))
    }

    /// Every section name, loaded or rejected, in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .profiles
            .keys()
            .chain(self.rejected.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn profiles(&self) -> impl Iterator<Item = &InstrumentProfile> {
        self.profiles.values()
    }

    pub fn rejected(&self) -> impl Iterator<Item = &ProfileValidationError> {
        self.rejected.values()
    }
}

fn shared_section<T: DeserializeOwned>(doc: &toml::Table, name: &str) -> Result<T> {
    let value = doc
        .get(name)
        .ok_or_else(|| BurstcalError::Config(format!("missing [{name}] section")))?;
    value
        .clone()
        .try_into()
        .map_err(|e| BurstcalError::Config(format!("[{name}]: {e}")))
}

fn validate_profile(
    name: &str,
    section: &ProfileSection,
    shared_method: &MethodSection,
) -> std::result::Result<InstrumentProfile, ProfileValidationError> {
    let fail = |field: &str, reason: String| ProfileValidationError::new(name, field, reason);

    let dirs = [
        ("darkBase", &section.dark_base),
        ("dataBase", &section.data_base),
        ("flatBase", &section.flat_base),
        ("workBase", &section.work_base),
    ];
    for (field, dir) in dirs {
        if !dir.is_empty() {
            check_directory(Path::new(dir)).map_err(|reason| fail(field, reason))?;
        }
    }

    let activity_fields: [(&'static str, &String); 9] = [
        ("darkBase", &section.dark_base),
        ("dataBase", &section.data_base),
        ("flatBase", &section.flat_base),
        ("workBase", &section.work_base),
        ("darkFilePattern", &section.dark_file_pattern),
        ("dataFilePattern", &section.data_file_pattern),
        ("flatFilePattern", &section.flat_file_pattern),
        ("obsDate", &section.obs_date),
        ("obsTime", &section.obs_time),
    ];
    let inactive_fields: Vec<&'static str> = activity_fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| *field)
        .collect();
    let active = inactive_fields.is_empty();

    let burst_number = match section.burst_number {
        Some(n) if n > 0 => n as usize,
        Some(n) => return Err(fail("burstNumber", format!("must be positive, got {n}"))),
        None => return Err(fail("burstNumber", "missing".into())),
    };

    let burst_form = parse_template(&section.burst_file_form, active)
        .map_err(|reason| fail("burstFileForm", reason))?;
    let speckled_form = parse_template(&section.speckled_file_form, active)
        .map_err(|reason| fail("speckledFileForm", reason))?;

    if active && section.noise_file.trim().is_empty() {
        return Err(fail("noiseFile", "required for an active profile".into()));
    }

    let bursts_per_batch = match section.bursts_per_batch {
        Some(n) if n > 0 => Some(n as usize),
        Some(n) => return Err(fail("burstsPerBatch", format!("must be positive, got {n}"))),
        None => None,
    };

    let frame_shape = match section.frame_format {
        FrameFormat::Image => None,
        FrameFormat::Raw16 => match (section.frame_height, section.frame_width) {
            (Some(h), Some(w)) if h > 0 && w > 0 => Some((h, w)),
            _ => {
                return Err(fail(
                    "frameWidth",
                    "raw16 frames need positive frameWidth and frameHeight".into(),
                ))
            }
        },
    };

    let scale = |field: &str, value: Option<f64>| match value {
        Some(v) if v > 0.0 && v.is_finite() => Ok(v),
        Some(v) => Err(fail(field, format!("must be positive, got {v}"))),
        None => Err(fail(field, "missing".into())),
    };
    let arcsec_per_pix_x = scale("kisipArcsecPerPixX", section.kisip_arcsec_per_pix_x)?;
    let arcsec_per_pix_y = scale("kisipArcsecPerPixY", section.kisip_arcsec_per_pix_y)?;

    let method = section
        .method
        .merged_over(shared_method)
        .resolve()
        .map_err(|key| fail(key, "missing from profile and [KISIP_METHOD]".into()))?;

    if !active {
        debug!(profile = name, empty = ?inactive_fields, "Profile is inactive");
    }

    Ok(InstrumentProfile {
        name: name.to_string(),
        dark_base: PathBuf::from(&section.dark_base),
        data_base: PathBuf::from(&section.data_base),
        flat_base: PathBuf::from(&section.flat_base),
        work_base: PathBuf::from(&section.work_base),
        dark_pattern: section.dark_file_pattern.clone(),
        data_pattern: section.data_file_pattern.clone(),
        flat_pattern: section.flat_file_pattern.clone(),
        burst_number,
        burst_form,
        speckled_form,
        obs_date: section.obs_date.clone(),
        obs_time: section.obs_time.clone(),
        noise_file: section.noise_file.clone(),
        wavelength_nm: section.wavelengthnm,
        arcsec_per_pix_x,
        arcsec_per_pix_y,
        exp_time_ms: section.exp_timems,
        bursts_per_batch,
        frame_format: section.frame_format,
        frame_order: section.frame_order,
        frame_shape,
        method,
        inactive_fields,
    })
}

fn check_directory(path: &Path) -> std::result::Result<(), String> {
    if !path.is_dir() {
        return Err(format!("directory does not exist: {}", path.display()));
    }
    fs::read_dir(path)
        .map(|_| ())
        .map_err(|e| format!("directory not readable: {}: {e}", path.display()))
}

fn parse_template(
    source: &str,
    required: bool,
) -> std::result::Result<Option<FileTemplate>, String> {
    if source.trim().is_empty() {
        return if required {
            Err("required for an active profile".into())
        } else {
            Ok(None)
        };
    }
    FileTemplate::parse(source).map(Some).map_err(|e| e.to_string())
}
