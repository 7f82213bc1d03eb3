#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use burstcal_core::consts::INIT_FILE_NAME;
use burstcal_core::reconstruct::{LaunchCommand, ProcessExit, ProcessLauncher, RunningProcess};
use tempfile::TempDir;

pub const HEIGHT: usize = 4;
pub const WIDTH: usize = 6;

pub const BURST_FORM: &str = "{0:s}_{1:s}_halpha_kisip.raw.batch.{2:02d}.{3:03d}";
pub const SPECKLED_FORM: &str = "{0:s}_{1:s}_halpha_kisip.speckle.batch.{2:02d}.{3:03d}";

/// Directory tree for one profile: darks, flats, data and work.
pub struct Fixture {
    pub root: TempDir,
    pub dark: PathBuf,
    pub flat: PathBuf,
    pub data: PathBuf,
    pub work: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let root = TempDir::new().expect("create temp dir");
        let dark = root.path().join("dark");
        let flat = root.path().join("flat");
        let data = root.path().join("data");
        let work = root.path().join("work");
        for dir in [&dark, &flat, &data, &work] {
            fs::create_dir_all(dir).expect("create fixture dir");
        }
        Self {
            root,
            dark,
            flat,
            data,
            work,
        }
    }

    /// Darks of 100, flats of 300, data of 500 plus the frame number.
    pub fn populate(&self, darks: usize, flats: usize, data: usize) {
        write_frames(&self.dark, "dark", darks, |_| 100);
        write_frames(&self.flat, "flat", flats, |_| 300);
        write_frames(&self.data, "data", data, |i| 500 + i as u16);
    }

    /// Profile table for this fixture, with `extra` appended verbatim.
    pub fn profile_toml(&self, name: &str, burst_number: usize, extra: &str) -> String {
        format!(
            r#"
[{name}]
darkBase = "{dark}"
dataBase = "{data}"
flatBase = "{flat}"
workBase = "{work}"
darkFilePattern = "dark_*.raw"
dataFilePattern = "data_*.raw"
flatFilePattern = "flat_*.raw"
burstNumber = {burst_number}
burstFileForm = "{BURST_FORM}"
speckledFileForm = "{SPECKLED_FORM}"
obsDate = "20180619"
obsTime = "140100"
noiseFile = "noise.raw"
wavelengthnm = 656.3
kisipArcsecPerPixX = 0.1
kisipArcsecPerPixY = 0.1
kisipMethodSubfieldArcsec = 5.0
frameFormat = "raw16"
frameWidth = {WIDTH}
frameHeight = {HEIGHT}
{extra}
"#,
            dark = toml_path(&self.dark),
            data = toml_path(&self.data),
            flat = toml_path(&self.flat),
            work = toml_path(&self.work),
        )
    }

    /// Full config document: shared sections plus the given profile tables.
    pub fn config(&self, profiles: &[String]) -> String {
        let mut doc = shared_sections(&self.root.path().join("bin"));
        for p in profiles {
            doc.push_str(p);
        }
        doc
    }

    pub fn write_config(&self, profiles: &[String]) -> PathBuf {
        let path = self.root.path().join("burstcal.toml");
        fs::write(&path, self.config(profiles)).expect("write config");
        path
    }
}

fn toml_path(p: &Path) -> String {
    p.display().to_string().replace('\\', "\\\\")
}

pub fn shared_sections(bin: &Path) -> String {
    format!(
        r#"
[KISIP_METHOD]
kisipMethodMethod = 1
kisipMethodPhaseRecLimit = 95.0
kisipMethodUX = 10
kisipMethodUV = 10
kisipMethodMaxIter = 30
kisipMethodSNThresh = 80.0
kisipMethodWeightExp = 1.2
kisipMethodPhaseRecApod = 15.0
kisipMethodNoiseFilter = true

[KISIP_PROPS]
kisipPropsHeaderOff = 0
kisipPropsTelescopeDiamm = 760.0
kisipPropsAoLockX = 0.0
kisipPropsAoLockY = 0.0
kisipPropsAoUsed = 1

[KISIP_ENV]
kisipEnvBin = "{bin}"
kisipEnvLib = ""
kisipEnvMpiNproc = 4
kisipEnvMpirun = "mpirun"
kisipEnvKisipExe = "entry"
"#,
        bin = toml_path(bin)
    )
}

/// Write `count` raw16 frames named `<prefix>_NNNN.raw`, each filled with
/// `value(i)`.
pub fn write_frames(dir: &Path, prefix: &str, count: usize, value: impl Fn(usize) -> u16) {
    for i in 0..count {
        write_raw16(&dir.join(format!("{prefix}_{i:04}.raw")), HEIGHT, WIDTH, value(i));
    }
}

pub fn write_raw16(path: &Path, height: usize, width: usize, value: u16) {
    let mut f = File::create(path).expect("create frame");
    for _ in 0..height * width {
        f.write_all(&value.to_le_bytes()).expect("write frame");
    }
}

// ---------------------------------------------------------------------------
// Fake reconstruction launcher
// ---------------------------------------------------------------------------

/// What one fake launch does.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FakeRun {
    /// Write the expected output, exit 0.
    Succeed,
    /// Exit 0 without writing anything.
    SucceedWithoutOutput,
    /// Exit with the given non-zero code.
    Exit(i32),
    /// The launcher itself fails.
    LaunchError,
    /// Run until killed.
    Hang,
}

/// In-process stand-in for the MPI launcher. Outcomes can be scripted per
/// job directory name (`BB.III`); unscripted launches use the default.
pub struct FakeLauncher {
    default: FakeRun,
    scripts: Mutex<HashMap<String, VecDeque<FakeRun>>>,
    pub launched: Mutex<Vec<LaunchCommand>>,
    pub killed: Arc<AtomicBool>,
}

impl FakeLauncher {
    pub fn new(default: FakeRun) -> Self {
        Self {
            default,
            scripts: Mutex::new(HashMap::new()),
            launched: Mutex::new(Vec::new()),
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_job(self, job: &str, runs: &[FakeRun]) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(job.to_string(), runs.iter().copied().collect());
        self
    }

    pub fn launch_count(&self) -> usize {
        self.launched.lock().unwrap().len()
    }

    fn next_run(&self, job: &str) -> FakeRun {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(job)
            .and_then(|q| q.pop_front())
            .unwrap_or(self.default)
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&self, command: &LaunchCommand) -> io::Result<Box<dyn RunningProcess>> {
        self.launched.lock().unwrap().push(command.clone());
        let job = command
            .cwd
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let exit = match self.next_run(&job) {
            FakeRun::Succeed => {
                fs::write(output_from_init(&command.cwd), b"speckled")?;
                Some(ProcessExit { code: Some(0) })
            }
            FakeRun::SucceedWithoutOutput => Some(ProcessExit { code: Some(0) }),
            FakeRun::Exit(code) => Some(ProcessExit { code: Some(code) }),
            FakeRun::LaunchError => {
                return Err(io::Error::new(io::ErrorKind::NotFound, "mpirun not found"))
            }
            FakeRun::Hang => None,
        };
        Ok(Box::new(FakeProcess {
            exit,
            killed: Arc::clone(&self.killed),
        }))
    }
}

/// Output path the reconstruction program would write, recovered from the
/// job's init file: speckled prefix plus `.NNN`.
pub fn output_from_init(job_dir: &Path) -> PathBuf {
    let text = fs::read_to_string(job_dir.join(INIT_FILE_NAME)).expect("read init file");
    let lines: Vec<&str> = text.lines().collect();
    PathBuf::from(format!("{}.{}", lines[3], lines[1]))
}

struct FakeProcess {
    exit: Option<ProcessExit>,
    killed: Arc<AtomicBool>,
}

impl RunningProcess for FakeProcess {
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(self.exit)
    }

    fn kill(&mut self) -> io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        self.exit = Some(ProcessExit { code: None });
        Ok(())
    }
}

/// Launcher whose processes stay running for a number of polls, then write
/// their output and exit 0. Tracks how many run at the same time.
pub struct SlowLauncher {
    polls: usize,
    in_flight: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

impl SlowLauncher {
    pub fn new(polls: usize) -> Self {
        Self {
            polls,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl ProcessLauncher for SlowLauncher {
    fn launch(&self, command: &LaunchCommand) -> io::Result<Box<dyn RunningProcess>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(SlowProcess {
            remaining: self.polls,
            output: output_from_init(&command.cwd),
            in_flight: Arc::clone(&self.in_flight),
        }))
    }
}

struct SlowProcess {
    remaining: usize,
    output: PathBuf,
    in_flight: Arc<AtomicUsize>,
}

impl RunningProcess for SlowProcess {
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        if self.remaining > 0 {
            self.remaining -= 1;
            return Ok(None);
        }
        fs::write(&self.output, b"speckled")?;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Some(ProcessExit { code: Some(0) }))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
