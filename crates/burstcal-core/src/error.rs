use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BurstcalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Unknown profile: {0}")]
    UnknownProfile(String),

    #[error(transparent)]
    ProfileValidation(#[from] ProfileValidationError),

    #[error("No frames matching '{pattern}' in {}", .dir.display())]
    NoMatchingFrames { dir: PathBuf, pattern: String },

    #[error(
        "Frame shape mismatch in {}: expected {}x{}, found {}x{}",
        .path.display(), .expected.1, .expected.0, .found.1, .found.0
    )]
    FrameShapeMismatch {
        path: PathBuf,
        /// (height, width)
        expected: (usize, usize),
        /// (height, width)
        found: (usize, usize),
    },

    #[error("Batch number {batch} does not fit in {width} digits")]
    BatchNumberOverflow { batch: usize, width: usize },

    #[error("Index {index} does not fit in {width} digits")]
    IndexOverflow { index: usize, width: usize },

    #[error("Invalid file name template '{template}': {reason}")]
    Template { template: String, reason: String },

    #[error("Invalid frame pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Image format error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid calibration artifact {}: {reason}", .path.display())]
    InvalidArtifact { path: PathBuf, reason: String },

    #[error(transparent)]
    Reconstruction(#[from] ReconstructionFailure),

    #[error("Worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Empty frame sequence")]
    EmptySequence,
}

pub type Result<T> = std::result::Result<T, BurstcalError>;

/// A profile section that failed load-time validation.
#[derive(Error, Clone, Debug, PartialEq)]
#[error("Profile '{profile}': invalid {field}: {reason}")]
pub struct ProfileValidationError {
    pub profile: String,
    pub field: String,
    pub reason: String,
}

impl ProfileValidationError {
    pub fn new(profile: &str, field: &str, reason: impl Into<String>) -> Self {
        Self {
            profile: profile.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Why a reconstruction job did not produce its output.
#[derive(Clone, Debug, PartialEq)]
pub enum FailureReason {
    /// The process exited with a non-zero status (`None` when killed by a signal).
    NonZeroExit { code: Option<i32> },
    /// The process exited zero but the expected output file is absent.
    MissingOutput { expected: PathBuf },
    /// The process could not be started.
    LaunchFailed(String),
    /// Job preparation (init files, job directory) failed before launch.
    Setup(String),
    /// The job was cancelled while running.
    Cancelled,
}

impl FailureReason {
    /// Whether relaunching the same job can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NonZeroExit { .. } | Self::MissingOutput { .. } | Self::LaunchFailed(_)
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonZeroExit { code: Some(code) } => write!(f, "exited with code {code}"),
            Self::NonZeroExit { code: None } => write!(f, "terminated by signal"),
            Self::MissingOutput { expected } => {
                write!(f, "exited zero but {} is missing", expected.display())
            }
            Self::LaunchFailed(msg) => write!(f, "launch failed: {msg}"),
            Self::Setup(msg) => write!(f, "setup failed: {msg}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Error, Clone, Debug, PartialEq)]
#[error("Reconstruction of batch {batch:02} index {index:03} failed: {reason}")]
pub struct ReconstructionFailure {
    pub batch: usize,
    pub index: usize,
    pub reason: FailureReason,
}
