/// Digits used for the batch number when a template slot gives no width.
pub const DEFAULT_BATCH_WIDTH: usize = 2;

/// Digits used for the within-batch index when a template slot gives no width.
pub const DEFAULT_INDEX_WIDTH: usize = 3;

/// Subdirectory of `workBase` holding burst cubes and the noise cube.
pub const PRE_SPECKLE_DIR: &str = "preSpeckle";

/// Subdirectory of `workBase` receiving reconstruction outputs.
pub const SPECKLE_DIR: &str = "speckle";

/// Subdirectory of the speckle directory holding one working directory per job.
pub const JOBS_DIR: &str = "jobs";

/// Extension of master dark/flat/gain artifacts in the work directory.
pub const ARTIFACT_EXTENSION: &str = "cal";

/// Magic bytes at the start of every calibration artifact file.
pub const ARTIFACT_MAGIC: &[u8; 8] = b"BCALMSTR";

/// Size of the artifact header: magic + width (u32) + height (u32).
pub const ARTIFACT_HEADER_SIZE: usize = 16;

/// Init file listing burst/output prefixes, index range and noise file.
pub const INIT_FILE_NAME: &str = "init_file.dat";

/// Init file listing the reconstruction method parameters.
pub const INIT_METHOD_NAME: &str = "init_method.dat";

/// Init file listing image geometry and telescope properties.
pub const INIT_PROPS_NAME: &str = "init_props.dat";

/// Differences smaller than this are treated as zero when inverting flats.
pub const EPSILON: f32 = 1e-10;

/// Log a progress line every this many frames while averaging.
pub const AVERAGE_PROGRESS_INTERVAL: usize = 100;

/// Default interval between exit-status polls of a running job.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
