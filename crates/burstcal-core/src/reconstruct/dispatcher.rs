use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::burst::Burst;
use crate::calibration::CalibrationSet;
use crate::consts::DEFAULT_POLL_INTERVAL_MS;
use crate::error::{FailureReason, ReconstructionFailure, Result};
use crate::profile::{EnvironmentSpec, InstrumentProfile, InvocationProperties, PipelinePolicy};

use super::command::{expected_output, job_dir, InitContext, InitFiles, LaunchCommand};
use super::job::{CancelToken, JobOutcome, JobState, ReconstructionJob, SpeckledBurst};
use super::launcher::ProcessLauncher;

/// Prepares, launches and supervises reconstruction jobs.
pub struct ReconstructionDispatcher {
    launcher: Arc<dyn ProcessLauncher>,
    env: EnvironmentSpec,
    props: InvocationProperties,
    poll_interval: Duration,
}

impl ReconstructionDispatcher {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        env: EnvironmentSpec,
        props: InvocationProperties,
    ) -> Self {
        Self {
            launcher,
            env,
            props,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Build a pending job for `burst`: command line, init file contents and
    /// expected output. Nothing is written yet.
    pub fn prepare(
        &self,
        profile: &InstrumentProfile,
        burst: &Burst,
        calibration: &CalibrationSet,
    ) -> std::result::Result<ReconstructionJob, ReconstructionFailure> {
        let setup = |reason: String| ReconstructionFailure {
            batch: burst.batch,
            index: burst.index,
            reason: FailureReason::Setup(reason),
        };

        let dir = job_dir(profile, burst);
        let init = InitFiles::build(&InitContext {
            profile,
            props: &self.props,
            burst,
            image_shape: calibration.shape(),
            noise_path: &calibration.noise_path,
        })
        .map_err(setup)?;
        let expected = expected_output(profile, &self.env, burst).map_err(|e| setup(e.to_string()))?;

        Ok(ReconstructionJob {
            profile: profile.name.clone(),
            burst: burst.clone(),
            command: LaunchCommand::from_env_spec(&self.env, &dir),
            init,
            expected_output: expected,
            attempts: 0,
            state: JobState::Pending,
            process: None,
        })
    }

    /// Write the job's init files and start the external program.
    ///
    /// Only a pending job is launched. Any failure leaves the job `Failed`.
    pub fn launch<'a>(&self, job: &'a mut ReconstructionJob) -> &'a JobState {
        if job.state != JobState::Pending {
            return &job.state;
        }
        job.attempts += 1;

        if let Err(e) = self.stage_files(job) {
            warn!(profile = %job.profile, batch = job.batch(), index = job.index(), "Job setup failed: {e}");
            job.fail(FailureReason::Setup(e.to_string()));
            return &job.state;
        }

        match self.launcher.launch(&job.command) {
            Ok(process) => {
                info!(
                    profile = %job.profile,
                    batch = job.batch(),
                    index = job.index(),
                    attempt = job.attempts,
                    command = %job.command,
                    "Launched reconstruction"
                );
                job.process = Some(process);
                job.state = JobState::Running;
            }
            Err(e) => {
                warn!(profile = %job.profile, batch = job.batch(), index = job.index(), "Launch failed: {e}");
                job.fail(FailureReason::LaunchFailed(e.to_string()));
            }
        }
        &job.state
    }

    /// Prepare and launch in one step.
    pub fn dispatch(
        &self,
        profile: &InstrumentProfile,
        burst: &Burst,
        calibration: &CalibrationSet,
    ) -> std::result::Result<ReconstructionJob, ReconstructionFailure> {
        let mut job = self.prepare(profile, burst, calibration)?;
        self.launch(&mut job);
        Ok(job)
    }

    /// Poll a running job until it exits or `cancel` fires.
    ///
    /// A job that was never launched fails with `LaunchFailed`.
    pub fn await_job(&self, job: &mut ReconstructionJob, cancel: &CancelToken) -> JobOutcome {
        if job.state == JobState::Pending {
            warn!(profile = %job.profile, batch = job.batch(), index = job.index(), "Awaited a job that was never launched");
            job.fail(FailureReason::LaunchFailed("not launched".into()));
        }
        while job.state == JobState::Running {
            if cancel.is_cancelled() {
                if let Some(process) = job.process.as_mut() {
                    if let Err(e) = process.kill() {
                        warn!(profile = %job.profile, batch = job.batch(), index = job.index(), "Kill failed: {e}");
                    }
                }
                info!(profile = %job.profile, batch = job.batch(), index = job.index(), "Cancelled running job");
                job.fail(FailureReason::Cancelled);
                break;
            }

            let polled = match job.process.as_mut() {
                Some(process) => process.try_wait(),
                None => {
                    job.fail(FailureReason::LaunchFailed("no process handle".into()));
                    break;
                }
            };

            match polled {
                Ok(Some(exit)) if exit.success() => {
                    if job.expected_output.is_file() {
                        info!(
                            profile = %job.profile,
                            batch = job.batch(),
                            index = job.index(),
                            output = %job.expected_output.display(),
                            "Reconstruction finished"
                        );
                        job.process = None;
                        job.state = JobState::Succeeded(SpeckledBurst {
                            batch: job.batch(),
                            index: job.index(),
                            path: job.expected_output.clone(),
                        });
                    } else {
                        warn!(
                            profile = %job.profile,
                            batch = job.batch(),
                            index = job.index(),
                            expected = %job.expected_output.display(),
                            "Exit status 0 but output is missing"
                        );
                        job.fail(FailureReason::MissingOutput {
                            expected: job.expected_output.clone(),
                        });
                    }
                }
                Ok(Some(exit)) => {
                    warn!(
                        profile = %job.profile,
                        batch = job.batch(),
                        index = job.index(),
                        code = ?exit.code,
                        "Reconstruction exited with failure"
                    );
                    job.fail(FailureReason::NonZeroExit { code: exit.code });
                }
                Ok(None) => thread::sleep(self.poll_interval),
                Err(e) => {
                    job.fail(FailureReason::LaunchFailed(format!("wait failed: {e}")));
                }
            }
        }
        outcome_of(job)
    }

    /// Launch and await one job, relaunching retryable failures up to
    /// `max_retries` times.
    pub fn run_job(
        &self,
        job: &mut ReconstructionJob,
        max_retries: u32,
        cancel: &CancelToken,
    ) -> JobOutcome {
        loop {
            if cancel.is_cancelled() && !job.state.is_terminal() {
                job.fail(FailureReason::Cancelled);
                return outcome_of(job);
            }
            self.launch(job);
            let outcome = self.await_job(job, cancel);

            let retry = match &job.state {
                JobState::Failed(f) => f.reason.is_retryable() && job.attempts <= max_retries,
                _ => false,
            };
            if !retry || cancel.is_cancelled() {
                return outcome;
            }
            debug!(
                profile = %job.profile,
                batch = job.batch(),
                index = job.index(),
                attempt = job.attempts + 1,
                "Retrying reconstruction"
            );
            job.state = JobState::Pending;
        }
    }

    /// Run every job on a pool of `maxConcurrentJobs` workers. Outcomes are
    /// returned in job order.
    pub fn run_all(
        &self,
        jobs: &mut [ReconstructionJob],
        policy: &PipelinePolicy,
        cancel: &CancelToken,
    ) -> Result<Vec<JobOutcome>> {
        self.run_all_with(jobs, policy, cancel, |_| {})
    }

    /// Like [`run_all`](Self::run_all), calling `on_finished` with the running
    /// count of finished jobs as each one reaches a final outcome.
    pub fn run_all_with<F>(
        &self,
        jobs: &mut [ReconstructionJob],
        policy: &PipelinePolicy,
        cancel: &CancelToken,
        on_finished: F,
    ) -> Result<Vec<JobOutcome>>
    where
        F: Fn(usize) + Sync,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(policy.max_concurrent_jobs.max(1))
            .thread_name(|i| format!("reconstruct-{i}"))
            .build()?;
        let finished = AtomicUsize::new(0);

        let outcomes: Vec<JobOutcome> = pool.install(|| {
            jobs.par_iter_mut()
                .map(|job| {
                    let outcome = self.run_job(job, policy.max_retries, cancel);
                    on_finished(finished.fetch_add(1, Ordering::SeqCst) + 1);
                    outcome
                })
                .collect()
        });
        Ok(outcomes)
    }
}

fn outcome_of(job: &ReconstructionJob) -> JobOutcome {
    match &job.state {
        JobState::Succeeded(out) => JobOutcome::Succeeded(out.clone()),
        JobState::Failed(f) if f.reason == FailureReason::Cancelled => JobOutcome::Cancelled {
            batch: f.batch,
            index: f.index,
        },
        JobState::Failed(f) => JobOutcome::Failed(f.clone()),
        JobState::Pending | JobState::Running => JobOutcome::Cancelled {
            batch: job.batch(),
            index: job.index(),
        },
    }
}

impl ReconstructionDispatcher {
    /// Job directory, init files, and removal of a stale output so a previous
    /// run cannot satisfy the completion check.
    fn stage_files(&self, job: &ReconstructionJob) -> Result<()> {
        fs::create_dir_all(&job.command.cwd)?;
        if let Some(parent) = job.expected_output.parent() {
            fs::create_dir_all(parent)?;
        }
        job.init.write_to(&job.command.cwd)?;
        if job.expected_output.exists() {
            debug!(path = %job.expected_output.display(), "Removing stale output");
            fs::remove_file(&job.expected_output)?;
        }
        Ok(())
    }
}
