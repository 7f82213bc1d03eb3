mod common;

use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use burstcal_core::burst::{BatchPlan, BurstBatcher};
use burstcal_core::calibration::{CalibrationBuilder, CalibrationSet};
use burstcal_core::consts::{INIT_FILE_NAME, INIT_METHOD_NAME, INIT_PROPS_NAME};
use burstcal_core::error::FailureReason;
use burstcal_core::frame::{FrameHandle, SortKey};
use burstcal_core::profile::{InstrumentProfile, PipelinePolicy, ProfileStore};
use burstcal_core::reconstruct::{
    CancelToken, JobOutcome, JobState, ReconstructionDispatcher,
};

use common::{FakeLauncher, FakeRun, Fixture, SlowLauncher};

struct Setup {
    fx: Fixture,
    store: ProfileStore,
    calibration: CalibrationSet,
    plan: BatchPlan,
}

impl Setup {
    fn new(bursts: usize, extra: &str) -> Self {
        let fx = Fixture::new();
        fx.populate(1, 2, 0);
        let store =
            ProfileStore::from_toml_str(&fx.config(&[fx.profile_toml("ZYLA", 2, extra)])).unwrap();
        let profile = store.get("ZYLA").unwrap();
        let calibration = CalibrationBuilder::new().build_set(profile).unwrap();
        let frames: Vec<FrameHandle> = (0..bursts * 2)
            .map(|i| {
                let path = fx.data.join(format!("data_{i:04}.raw"));
                FrameHandle::new(path, SortKey::Name(format!("data_{i:04}.raw")))
            })
            .collect();
        let plan = BurstBatcher::plan(profile, &frames).unwrap();
        Self {
            fx,
            store,
            calibration,
            plan,
        }
    }

    fn profile(&self) -> &InstrumentProfile {
        self.store.get("ZYLA").unwrap()
    }

    fn dispatcher(&self, launcher: Arc<FakeLauncher>) -> ReconstructionDispatcher {
        ReconstructionDispatcher::new(launcher, self.store.env.clone(), self.store.props.clone())
            .with_poll_interval(Duration::from_millis(5))
    }
}

// ---------------------------------------------------------------------------
// Job setup
// ---------------------------------------------------------------------------

#[test]
fn test_prepare_builds_command_and_output_path() {
    let s = Setup::new(1, "");
    let d = s.dispatcher(Arc::new(FakeLauncher::new(FakeRun::Succeed)));
    let job = d.prepare(s.profile(), &s.plan.bursts[0], &s.calibration).unwrap();

    assert_eq!(job.state(), &JobState::Pending);
    assert_eq!(job.attempts, 0);
    let bin = s.fx.root.path().join("bin");
    assert_eq!(job.command.program, bin.join("mpirun"));
    assert_eq!(
        job.command.args,
        vec![
            "-np".to_string(),
            "4".to_string(),
            bin.join("entry").display().to_string()
        ]
    );
    assert_eq!(job.command.cwd, s.fx.work.join("speckle/jobs/00.000"));
    assert!(job.command.env.iter().any(|(k, _)| k == "PATH"));
    assert_eq!(
        job.expected_output,
        s.fx
            .work
            .join("speckle/20180619_140100_halpha_kisip.speckle.batch.00.000")
    );
}

#[test]
fn test_init_files_content() {
    let s = Setup::new(1, "");
    let d = s.dispatcher(Arc::new(FakeLauncher::new(FakeRun::Succeed)));
    let job = d.prepare(s.profile(), &s.plan.bursts[0], &s.calibration).unwrap();

    let file: Vec<&str> = job.init.file.lines().collect();
    assert_eq!(file.len(), 5);
    assert!(file[0].ends_with("preSpeckle/20180619_140100_halpha_kisip.raw.batch.00"));
    assert_eq!(file[1], "000");
    assert_eq!(file[2], "000");
    assert!(file[3].ends_with("speckle/20180619_140100_halpha_kisip.speckle.batch.00"));
    assert!(file[4].ends_with("preSpeckle/noise.raw"));

    let method: Vec<&str> = job.init.method.lines().collect();
    assert_eq!(method.len(), 10);
    // 5 arcsec at 0.1 arcsec/pixel.
    assert_eq!(method[1], "50");
    assert_eq!(method[5], "30");
    assert_eq!(method[9], "1");

    let props: Vec<&str> = job.init.props.lines().collect();
    assert_eq!(props.len(), 11);
    assert_eq!(props[0], common::WIDTH.to_string());
    assert_eq!(props[1], common::HEIGHT.to_string());
    assert_eq!(props[2], "2");
    assert_eq!(props[7], "656.3");
    assert_eq!(props[10], "1");
}

#[test]
fn test_missing_wavelength_is_setup_failure() {
    let fx = Fixture::new();
    fx.populate(1, 2, 0);
    let profile = fx
        .profile_toml("ZYLA", 2, "")
        .replace("wavelengthnm = 656.3\n", "");
    let store = ProfileStore::from_toml_str(&fx.config(&[profile])).unwrap();
    let profile = store.get("ZYLA").unwrap();
    let calibration = CalibrationBuilder::new().build_set(profile).unwrap();
    let frames: Vec<FrameHandle> = (0..2)
        .map(|i| FrameHandle::new(fx.data.join(format!("{i}")), SortKey::Name(format!("{i}"))))
        .collect();
    let plan = BurstBatcher::plan(profile, &frames).unwrap();

    let d = ReconstructionDispatcher::new(
        Arc::new(FakeLauncher::new(FakeRun::Succeed)),
        store.env.clone(),
        store.props.clone(),
    );
    let failure = d.prepare(profile, &plan.bursts[0], &calibration).unwrap_err();
    assert!(matches!(failure.reason, FailureReason::Setup(_)));
}

// ---------------------------------------------------------------------------
// Job lifecycle
// ---------------------------------------------------------------------------

#[test]
fn test_successful_job() {
    let s = Setup::new(1, "");
    let launcher = Arc::new(FakeLauncher::new(FakeRun::Succeed));
    let d = s.dispatcher(launcher.clone());

    let mut job = d.dispatch(s.profile(), &s.plan.bursts[0], &s.calibration).unwrap();
    assert_eq!(job.state(), &JobState::Running);
    for name in [INIT_FILE_NAME, INIT_METHOD_NAME, INIT_PROPS_NAME] {
        assert!(job.command.cwd.join(name).is_file());
    }

    let outcome = d.await_job(&mut job, &CancelToken::new());
    match outcome {
        JobOutcome::Succeeded(out) => {
            assert_eq!(out.batch, 0);
            assert_eq!(out.index, 0);
            assert_eq!(out.path, job.expected_output);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(launcher.launch_count(), 1);
}

#[test]
fn test_missing_output_and_nonzero_exit_are_distinguished() {
    let s = Setup::new(2, "");
    let launcher = Arc::new(
        FakeLauncher::new(FakeRun::Succeed)
            .with_job("00.000", &[FakeRun::SucceedWithoutOutput])
            .with_job("01.000", &[FakeRun::Exit(3)]),
    );
    let d = s.dispatcher(launcher);
    let cancel = CancelToken::new();

    let mut missing = d.dispatch(s.profile(), &s.plan.bursts[0], &s.calibration).unwrap();
    let mut nonzero = d.dispatch(s.profile(), &s.plan.bursts[1], &s.calibration).unwrap();

    match d.await_job(&mut missing, &cancel) {
        JobOutcome::Failed(f) => {
            assert_eq!(f.batch, 0);
            assert!(matches!(f.reason, FailureReason::MissingOutput { .. }));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    match d.await_job(&mut nonzero, &cancel) {
        JobOutcome::Failed(f) => {
            assert_eq!(f.batch, 1);
            assert_eq!(f.reason, FailureReason::NonZeroExit { code: Some(3) });
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[test]
fn test_stale_output_does_not_count_as_success() {
    let s = Setup::new(1, "");
    let launcher = Arc::new(FakeLauncher::new(FakeRun::SucceedWithoutOutput));
    let d = s.dispatcher(launcher);

    let mut job = d.prepare(s.profile(), &s.plan.bursts[0], &s.calibration).unwrap();
    fs::create_dir_all(job.expected_output.parent().unwrap()).unwrap();
    fs::write(&job.expected_output, b"old run").unwrap();

    d.launch(&mut job);
    let outcome = d.await_job(&mut job, &CancelToken::new());
    assert!(matches!(outcome, JobOutcome::Failed(ref f) if matches!(f.reason, FailureReason::MissingOutput { .. })));
    assert!(!job.expected_output.exists());
}

#[test]
fn test_launch_failure() {
    let s = Setup::new(1, "");
    let d = s.dispatcher(Arc::new(FakeLauncher::new(FakeRun::LaunchError)));
    let job = d.dispatch(s.profile(), &s.plan.bursts[0], &s.calibration).unwrap();
    match job.state() {
        JobState::Failed(f) => assert!(matches!(f.reason, FailureReason::LaunchFailed(_))),
        other => panic!("unexpected state {other}"),
    }
}

#[test]
fn test_launch_reports_new_state() {
    let s = Setup::new(1, "");
    let d = s.dispatcher(Arc::new(FakeLauncher::new(FakeRun::Succeed)));
    let mut job = d.prepare(s.profile(), &s.plan.bursts[0], &s.calibration).unwrap();

    assert_eq!(d.launch(&mut job), &JobState::Running);
    // A running job is not launched twice.
    assert_eq!(d.launch(&mut job), &JobState::Running);
    assert_eq!(job.attempts, 1);
}

#[test]
fn test_awaiting_unlaunched_job_is_not_a_cancellation() {
    let s = Setup::new(1, "");
    let launcher = Arc::new(FakeLauncher::new(FakeRun::Succeed));
    let d = s.dispatcher(launcher.clone());
    let mut job = d.prepare(s.profile(), &s.plan.bursts[0], &s.calibration).unwrap();

    match d.await_job(&mut job, &CancelToken::new()) {
        JobOutcome::Failed(f) => {
            assert_eq!(f.reason, FailureReason::LaunchFailed("not launched".into()))
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(launcher.launch_count(), 0);
}

#[test]
fn test_cancel_running_job_kills_process() {
    let s = Setup::new(1, "");
    let launcher = Arc::new(FakeLauncher::new(FakeRun::Hang));
    let d = s.dispatcher(launcher.clone());
    let cancel = CancelToken::new();

    let mut job = d.dispatch(s.profile(), &s.plan.bursts[0], &s.calibration).unwrap();
    let trigger = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        trigger.cancel();
    });

    let outcome = d.await_job(&mut job, &cancel);
    canceller.join().unwrap();

    assert_eq!(outcome, JobOutcome::Cancelled { batch: 0, index: 0 });
    assert!(launcher.killed.load(Ordering::SeqCst));
    match job.state() {
        JobState::Failed(f) => assert_eq!(f.reason, FailureReason::Cancelled),
        other => panic!("unexpected state {other}"),
    }
}

// ---------------------------------------------------------------------------
// Batches of jobs
// ---------------------------------------------------------------------------

#[test]
fn test_retries_relaunch_failed_jobs() {
    let s = Setup::new(1, "");
    let launcher = Arc::new(
        FakeLauncher::new(FakeRun::Succeed).with_job("00.000", &[FakeRun::Exit(1), FakeRun::Exit(1)]),
    );
    let d = s.dispatcher(launcher.clone());
    let mut job = d.prepare(s.profile(), &s.plan.bursts[0], &s.calibration).unwrap();

    let outcome = d.run_job(&mut job, 2, &CancelToken::new());
    assert!(outcome.is_success());
    assert_eq!(job.attempts, 3);
    assert_eq!(launcher.launch_count(), 3);
}

#[test]
fn test_no_retry_by_default() {
    let s = Setup::new(1, "");
    let launcher = Arc::new(FakeLauncher::new(FakeRun::Exit(1)));
    let d = s.dispatcher(launcher.clone());
    let mut jobs = vec![d.prepare(s.profile(), &s.plan.bursts[0], &s.calibration).unwrap()];

    let outcomes = d
        .run_all(&mut jobs, &PipelinePolicy::default(), &CancelToken::new())
        .unwrap();
    assert!(matches!(outcomes[0], JobOutcome::Failed(_)));
    assert_eq!(launcher.launch_count(), 1);
}

#[test]
fn test_run_all_keeps_burst_order() {
    let s = Setup::new(5, "");
    let launcher = Arc::new(FakeLauncher::new(FakeRun::Succeed).with_job("02.000", &[FakeRun::Exit(9)]));
    let d = s.dispatcher(launcher);
    let mut jobs: Vec<_> = s
        .plan
        .bursts
        .iter()
        .map(|b| d.prepare(s.profile(), b, &s.calibration).unwrap())
        .collect();
    let policy = PipelinePolicy {
        max_concurrent_jobs: 3,
        ..Default::default()
    };

    let outcomes = d.run_all(&mut jobs, &policy, &CancelToken::new()).unwrap();
    assert_eq!(outcomes.len(), 5);
    for (i, outcome) in outcomes.iter().enumerate() {
        match outcome {
            JobOutcome::Succeeded(out) => assert_eq!(out.batch, i),
            JobOutcome::Failed(f) => {
                assert_eq!(i, 2);
                assert_eq!(f.batch, 2);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}

#[test]
fn test_cancelled_pending_jobs_never_launch() {
    let s = Setup::new(3, "");
    let launcher = Arc::new(FakeLauncher::new(FakeRun::Succeed));
    let d = s.dispatcher(launcher.clone());
    let mut jobs: Vec<_> = s
        .plan
        .bursts
        .iter()
        .map(|b| d.prepare(s.profile(), b, &s.calibration).unwrap())
        .collect();

    let cancel = CancelToken::new();
    cancel.cancel();
    let outcomes = d
        .run_all(&mut jobs, &PipelinePolicy::default(), &cancel)
        .unwrap();

    assert!(outcomes
        .iter()
        .all(|o| matches!(o, JobOutcome::Cancelled { .. })));
    assert_eq!(launcher.launch_count(), 0);
    // No side effects: job directories were never created.
    assert!(!s.fx.work.join("speckle/jobs/00.000").exists());
}

fn peak_concurrency(limit: usize) -> usize {
    let s = Setup::new(6, "");
    let launcher = Arc::new(SlowLauncher::new(4));
    let d = ReconstructionDispatcher::new(launcher.clone(), s.store.env.clone(), s.store.props.clone())
        .with_poll_interval(Duration::from_millis(5));
    let mut jobs: Vec<_> = s
        .plan
        .bursts
        .iter()
        .map(|b| d.prepare(s.profile(), b, &s.calibration).unwrap())
        .collect();
    let policy = PipelinePolicy {
        max_concurrent_jobs: limit,
        ..Default::default()
    };

    let outcomes = d.run_all(&mut jobs, &policy, &CancelToken::new()).unwrap();
    assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 6);
    launcher.peak.load(Ordering::SeqCst)
}

#[test]
fn test_default_policy_runs_jobs_one_at_a_time() {
    assert_eq!(PipelinePolicy::default().max_concurrent_jobs, 1);
    assert_eq!(peak_concurrency(1), 1);
}

#[test]
fn test_concurrency_limit_is_respected() {
    assert_eq!(peak_concurrency(2), 2);
}
