use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::burst::BurstBatcher;
use crate::calibration::CalibrationBuilder;
use crate::error::{BurstcalError, Result};
use crate::index::FrameIndexer;
use crate::io::reader_for;
use crate::profile::{InstrumentProfile, PipelinePolicy, ProfileStore};
use crate::reconstruct::{CancelToken, JobOutcome, ProcessLauncher, ReconstructionDispatcher};

use super::types::{
    NoOpReporter, PipelineStage, ProfilePlan, ProfileReport, ProfileStatus, ProgressReporter,
};

/// Runs calibration, batching and reconstruction for each profile in a store.
pub struct PipelineOrchestrator {
    store: ProfileStore,
    launcher: Arc<dyn ProcessLauncher>,
    policy: PipelinePolicy,
    calibration: CalibrationBuilder,
    cancel: CancelToken,
    reporter: Arc<dyn ProgressReporter>,
}

impl PipelineOrchestrator {
    pub fn new(store: ProfileStore, launcher: Arc<dyn ProcessLauncher>) -> Self {
        let policy = store.policy.clone();
        Self {
            store,
            launcher,
            policy,
            calibration: CalibrationBuilder::new(),
            cancel: CancelToken::new(),
            reporter: Arc::new(NoOpReporter),
        }
    }

    /// Replace the run policy loaded from `[PIPELINE]`.
    pub fn with_policy(mut self, policy: PipelinePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn store(&self) -> &ProfileStore {
        &self.store
    }

    pub fn policy(&self) -> &PipelinePolicy {
        &self.policy
    }

    /// A handle that cancels pending and running jobs when fired.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run every profile in name order. Rejected profiles are reported as
    /// `Invalid`; one profile's failure never stops the next.
    pub fn run_all(&mut self) -> Vec<ProfileReport> {
        let names = self.store.names();
        let mut reports = Vec::with_capacity(names.len());
        for name in names {
            match self.run_profile(&name) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(profile = %name, "{e}");
                    let mut report = ProfileReport::new(&name, ProfileStatus::Invalid);
                    report.failures.push(e.to_string());
                    reports.push(report);
                }
            }
        }
        reports
    }

    /// Run one profile. Only an unknown name is an error; everything else is
    /// recorded in the report.
    pub fn run_profile(&mut self, name: &str) -> Result<ProfileReport> {
        let profile = match self.store.get(name) {
            Ok(profile) => profile.clone(),
            Err(BurstcalError::ProfileValidation(e)) => {
                warn!(profile = %name, outcome = "invalid", "{e}");
                let mut report = ProfileReport::new(&e.profile, ProfileStatus::Invalid);
                report.failures.push(e.to_string());
                return Ok(report);
            }
            Err(e) => return Err(e),
        };
        let report = self.execute(&profile);
        info!(
            profile = %report.name,
            outcome = %report.status,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped_bursts = report.skipped_bursts,
            skipped_frames = report.skipped_frames,
            cancelled = report.cancelled,
            "Profile finished"
        );
        Ok(report)
    }

    /// Index data frames and name bursts without writing or launching
    /// anything.
    pub fn plan_profile(&self, name: &str) -> Result<ProfilePlan> {
        let profile = self.store.get(name)?;
        if !profile.is_active() {
            return Ok(ProfilePlan {
                name: profile.name.clone(),
                data_frames: 0,
                plan: Default::default(),
            });
        }
        let frames = FrameIndexer::new(profile.frame_order).index(
            &profile.data_base,
            &profile.data_pattern,
            false,
        )?;
        let plan = BurstBatcher::plan(profile, frames.as_slice())?;
        Ok(ProfilePlan {
            name: profile.name.clone(),
            data_frames: frames.len(),
            plan,
        })
    }

    fn execute(&mut self, profile: &InstrumentProfile) -> ProfileReport {
        let name = profile.name.as_str();
        if !profile.is_active() {
            info!(profile = name, outcome = "inactive", empty = ?profile.empty_fields(), "Skipping inactive profile");
            return ProfileReport::new(name, ProfileStatus::Inactive);
        }
        if self.cancel.is_cancelled() {
            let mut report = ProfileReport::new(name, ProfileStatus::Aborted);
            report.failures.push("cancelled before start".into());
            return report;
        }
        let reporter = Arc::clone(&self.reporter);

        reporter.begin_stage(name, PipelineStage::Calibration, None);
        let calibration = self.calibration.build_set(profile);
        reporter.finish_stage();
        let calibration = match calibration {
            Ok(set) => set,
            Err(e) => return aborted(name, PipelineStage::Calibration, e),
        };

        reporter.begin_stage(name, PipelineStage::Indexing, None);
        let frames = FrameIndexer::new(profile.frame_order).index(
            &profile.data_base,
            &profile.data_pattern,
            true,
        );
        reporter.finish_stage();
        let frames = match frames {
            Ok(frames) => frames,
            Err(e) => return aborted(name, PipelineStage::Indexing, e),
        };

        reporter.begin_stage(
            name,
            PipelineStage::Batching,
            Some(frames.len() / profile.burst_number),
        );
        let reader = reader_for(profile);
        let batched = BurstBatcher::batch(profile, frames.as_slice(), &calibration, reader.as_ref());
        reporter.finish_stage();
        let batched = match batched {
            Ok(plan) => plan,
            Err(e) => return aborted(name, PipelineStage::Batching, e),
        };

        let mut report = ProfileReport::new(name, ProfileStatus::Active);
        report.skipped_frames = batched.skipped_frames;
        report.skipped_bursts = batched.failures.len();
        report.failures.extend(batched.failures.iter().map(|f| {
            format!("batch {:02} index {:03}: {}", f.batch, f.index, f.error)
        }));

        let dispatcher = ReconstructionDispatcher::new(
            Arc::clone(&self.launcher),
            self.store.env.clone(),
            self.store.props.clone(),
        )
        .with_poll_interval(Duration::from_millis(self.policy.poll_interval_ms));

        let mut jobs = Vec::with_capacity(batched.bursts.len());
        for burst in &batched.bursts {
            match dispatcher.prepare(profile, burst, &calibration) {
                Ok(job) => jobs.push(job),
                Err(failure) => {
                    warn!(profile = name, batch = burst.batch, index = burst.index, outcome = "failed", "{failure}");
                    report.failed += 1;
                    report.failures.push(failure.to_string());
                }
            }
        }

        reporter.begin_stage(name, PipelineStage::Reconstruction, Some(jobs.len()));
        let outcomes = dispatcher.run_all_with(&mut jobs, &self.policy, &self.cancel, |done| {
            reporter.advance(done)
        });
        reporter.finish_stage();
        let outcomes = match outcomes {
            Ok(outcomes) => outcomes,
            Err(e) => return aborted(name, PipelineStage::Reconstruction, e),
        };

        for outcome in outcomes {
            match outcome {
                JobOutcome::Succeeded(_) => report.succeeded += 1,
                JobOutcome::Failed(failure) => {
                    report.failed += 1;
                    report.failures.push(failure.to_string());
                }
                JobOutcome::Cancelled { .. } => report.cancelled += 1,
            }
        }
        report
    }
}

fn aborted(name: &str, stage: PipelineStage, e: BurstcalError) -> ProfileReport {
    error!(profile = name, stage = %stage, outcome = "aborted", "{e}");
    let mut report = ProfileReport::new(name, ProfileStatus::Aborted);
    report.failures.push(format!("{stage}: {e}"));
    report
}
