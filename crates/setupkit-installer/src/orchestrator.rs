use anyhow::{anyhow, Context, Result};
use setupkit_core::{InstallOutcome, InstallPreferences, ProductConfig, Stage, Version};
use setupkit_workitems::fs_utils::{path_exists, remove_path};
use setupkit_workitems::{FailedAt, InUseCheck, MutationEnv, RollbackReport, SequenceError};
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, error, info, warn};

use crate::builder::{build_install_sequence, InstallRequest, VERSION_VALUE};
use crate::collaborators::{Collaborators, LocalCollaborators};
use crate::journal::{
    claim_active_run, clear_active_run, current_unix_timestamp, new_run_id,
    update_run_status, write_run_metadata, JournalEvent, RunMetadata, RunStatus,
    RUN_METADATA_VERSION,
};
use crate::probe::ProcProbe;
use crate::resolver::{
    check_version_order, resolve_outcome, CommitStatus, VersionOrderingViolation,
};
use crate::shortcuts::{describe_shortcut_operation, plan_shortcuts, InstallShortcutOperation};
use crate::stage::{JournalSink, StageTracker};
use crate::visual_manifest::create_visual_elements_manifest;
use crate::InstallLayout;

/// Why an install did not leave the new version active.
#[derive(Debug)]
pub enum InstallFailure {
    /// The mutation sequence failed and was rolled back.
    Mutation {
        failed_at: FailedAt,
        rollback: RollbackReport,
    },
    /// The sequence committed but the staged version is older than the one
    /// it replaced.
    Downgrade(VersionOrderingViolation),
}

#[derive(Debug)]
pub struct NewVersionResult {
    pub outcome: InstallOutcome,
    pub existing_version: Option<Version>,
    pub failure: Option<InstallFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Completed,
    Skipped,
    Failed(String),
}

/// Result of one best-effort post-commit step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step: Stage,
    pub result: StepResult,
}

impl StepRecord {
    pub fn is_failure(&self) -> bool {
        matches!(self.result, StepResult::Failed(_))
    }
}

#[derive(Debug)]
pub struct InstallReport {
    pub outcome: InstallOutcome,
    pub existing_version: Option<Version>,
    pub failure: Option<InstallFailure>,
    pub steps: Vec<StepRecord>,
}

/// An install run with its own journal and active-run marker.
#[derive(Debug)]
pub struct InstallRun {
    pub run_id: String,
    /// A previous run that never cleared its marker.
    pub stale_run: Option<String>,
    pub tracker: StageTracker,
}

/// make-default follows the preference, or the per-user preference on
/// updates and repairs where no first-run preferences file gets copied.
pub fn should_make_default(prefs: &InstallPreferences, outcome: InstallOutcome) -> bool {
    prefs.make_default
        || (matches!(
            outcome,
            InstallOutcome::NewVersionUpdated | InstallOutcome::InstallRepaired
        ) && prefs.make_default_for_user)
}

pub struct Installer {
    layout: InstallLayout,
    product: ProductConfig,
    collaborators: Box<dyn Collaborators>,
    in_use: Rc<dyn InUseCheck>,
}

impl Installer {
    pub fn new(layout: InstallLayout, product: ProductConfig) -> Self {
        let collaborators = LocalCollaborators::new(layout.clone(), product.clone());
        Self {
            layout,
            product,
            collaborators: Box::new(collaborators),
            in_use: Rc::new(ProcProbe),
        }
    }

    pub fn with_collaborators(mut self, collaborators: Box<dyn Collaborators>) -> Self {
        self.collaborators = collaborators;
        self
    }

    pub fn with_in_use_check(mut self, in_use: Rc<dyn InUseCheck>) -> Self {
        self.in_use = in_use;
        self
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    pub fn product(&self) -> &ProductConfig {
        &self.product
    }

    /// The version the key store currently names as installed.
    pub fn current_version(&self) -> Result<Option<Version>> {
        let key = &self.product.client_key;
        let raw = self
            .layout
            .registry()
            .read_string(key, VERSION_VALUE)
            .with_context(|| format!("failed to read installed version from {key}"))?;
        raw.map(|raw| {
            Version::parse(&raw)
                .with_context(|| format!("invalid installed version '{raw}' under {key}"))
        })
        .transpose()
    }

    /// Claims the active-run marker and opens a journal for a new run.
    pub fn begin_run(&self, new_version: &Version) -> Result<InstallRun> {
        self.layout.ensure_base_dirs()?;
        let started_at_unix = current_unix_timestamp()?;
        let run_id = new_run_id(started_at_unix);
        let stale_run = claim_active_run(&self.layout, &run_id)?;
        if let Some(stale) = &stale_run {
            warn!(stale_run = %stale, "previous install run did not finish");
        }
        write_run_metadata(
            &self.layout,
            &RunMetadata {
                version: RUN_METADATA_VERSION,
                run_id: run_id.clone(),
                new_version: new_version.to_string(),
                status: RunStatus::Running,
                started_at_unix,
                outcome: None,
            },
        )?;

        let sink = JournalSink::new(self.layout.clone(), run_id.clone());
        Ok(InstallRun {
            run_id,
            stale_run,
            tracker: StageTracker::new(Box::new(sink)),
        })
    }

    pub fn finish_run(&self, run: &mut InstallRun, report: &InstallReport) -> Result<()> {
        run.tracker.record(JournalEvent::Outcome {
            outcome: report.outcome,
        });
        let status = match &report.failure {
            Some(InstallFailure::Mutation { .. }) => RunStatus::RolledBack,
            _ if report.outcome.is_success() => RunStatus::Finished,
            _ => RunStatus::Committed,
        };
        update_run_status(&self.layout, &run.run_id, status, Some(report.outcome))?;
        clear_active_run(&self.layout)
    }

    /// Closes a run that stopped with an error instead of a report.
    pub fn abort_run(&self, run: &mut InstallRun, err: &anyhow::Error) -> Result<()> {
        run.tracker.record(JournalEvent::Aborted {
            message: format!("{err:#}"),
        });
        update_run_status(&self.layout, &run.run_id, RunStatus::Aborted, None)?;
        clear_active_run(&self.layout)
    }

    /// Builds and applies the mutation sequence for `request`, rolling it
    /// back when any mutation fails.
    pub fn install_new_version(
        &self,
        request: &InstallRequest,
        tracker: &mut StageTracker,
    ) -> Result<NewVersionResult> {
        tracker.update_stage(Stage::Building);

        let existing_version = self.current_version()?;
        let new_version = &request.new_version;
        let run_id = match tracker.run_id() {
            Some(run_id) => run_id.to_string(),
            None => new_run_id(current_unix_timestamp()?),
        };
        let backup_dir = self.layout.run_backup_dir(&run_id);
        let env = MutationEnv::new(
            self.layout.registry(),
            self.layout.pending_removals(),
            backup_dir.clone(),
        )
        .with_in_use_check(Box::new(Rc::clone(&self.in_use)));
        let mut sequence = build_install_sequence(
            env,
            &self.layout,
            &self.product,
            request,
            existing_version.as_ref(),
        );
        debug!(mutations = sequence.len(), "built install sequence");

        let new_executable = self.layout.new_executable_path(&self.product);

        tracker.update_stage(Stage::Executing);

        match sequence.apply() {
            Ok(()) => {}
            Err(SequenceError::Failed(failed_at)) => {
                tracker.update_stage(Stage::RollingBack);
                tracker.record(JournalEvent::MutationFailed {
                    index: failed_at.index,
                    kind: failed_at.kind.to_string(),
                    target: failed_at.target.clone(),
                    message: failed_at.source.to_string(),
                });

                // Sampled before rollback removes the staged executable.
                let staged = path_exists(&new_executable);
                let outcome = resolve_outcome(
                    existing_version.as_ref(),
                    new_version,
                    CommitStatus::Failed,
                    staged,
                );
                error!(result = outcome.as_str(), "install failed, rolling back");

                let rollback = sequence.rollback();
                for failure in &rollback.failures {
                    tracker.record(JournalEvent::RollbackFailed {
                        index: failure.index,
                        kind: failure.kind.to_string(),
                        target: failure.target.clone(),
                        message: failure.error.to_string(),
                    });
                }
                if rollback.is_clean() {
                    remove_backup_dir(&backup_dir);
                }
                error!(
                    rolled_back = rollback.rolled_back.len(),
                    failures = rollback.failures.len(),
                    "rollback complete"
                );

                return Ok(NewVersionResult {
                    outcome,
                    existing_version,
                    failure: Some(InstallFailure::Mutation {
                        failed_at,
                        rollback,
                    }),
                });
            }
            Err(err @ SequenceError::Spent) => {
                return Err(err).context("install sequence could not run");
            }
        }

        tracker.update_stage(Stage::RefreshingPolicy);
        if let Err(err) = self.collaborators.refresh_elevation_policy() {
            warn!(error = %format!("{err:#}"), "failed to refresh elevation policy");
        }
        remove_backup_dir(&backup_dir);

        let staged = path_exists(&new_executable);
        let outcome = resolve_outcome(
            existing_version.as_ref(),
            new_version,
            CommitStatus::Committed,
            staged,
        );
        let failure = check_version_order(existing_version.as_ref(), new_version)
            .err()
            .map(InstallFailure::Downgrade);

        Ok(NewVersionResult {
            outcome,
            existing_version,
            failure,
        })
    }

    /// Full install: prepares the payload, installs the new version, then
    /// runs the best-effort post-commit steps when the install succeeded.
    pub fn install_or_update_product(
        &self,
        request: &InstallRequest,
        prefs: &InstallPreferences,
        tracker: &mut StageTracker,
    ) -> Result<InstallReport> {
        tracker.update_stage(Stage::Preparing);
        self.layout.ensure_base_dirs()?;
        if !request.src_path.is_dir() {
            return Err(anyhow!(
                "install source does not exist: {}",
                request.src_path.display()
            ));
        }

        tracker.update_stage(Stage::CreatingVisualManifest);
        if let Err(err) = create_visual_elements_manifest(
            &request.src_path,
            &request.new_version,
            self.product.display_name(false),
        ) {
            warn!(error = %format!("{err:#}"), "failed to create visual elements manifest");
        }

        let result = self.install_new_version(request, tracker)?;

        let mut steps = Vec::new();
        if result.outcome.is_success() {
            self.run_post_commit_steps(
                request,
                prefs,
                result.outcome,
                result.existing_version.as_ref(),
                tracker,
                &mut steps,
            );
        }

        info!(outcome = result.outcome.as_str(), "install finished");
        Ok(InstallReport {
            outcome: result.outcome,
            existing_version: result.existing_version,
            failure: result.failure,
            steps,
        })
    }

    /// Refreshes the shortcuts that already exist and re-registers the
    /// product after the host OS was upgraded. Never claims default status.
    pub fn handle_os_upgrade(&self, tracker: &mut StageTracker) -> Vec<StepRecord> {
        info!("updating shortcuts and registration after OS upgrade");
        tracker.update_stage(Stage::CreatingShortcuts);
        let result = self.create_shortcuts(InstallShortcutOperation::ReplaceExisting, false);
        let mut steps = vec![step_record(tracker, Stage::CreatingShortcuts, result)];

        tracker.update_stage(Stage::RegisteringProduct);
        let result = self.collaborators.register_product(false);
        steps.push(step_record(tracker, Stage::RegisteringProduct, result));
        steps
    }

    fn run_post_commit_steps(
        &self,
        request: &InstallRequest,
        prefs: &InstallPreferences,
        outcome: InstallOutcome,
        existing_version: Option<&Version>,
        tracker: &mut StageTracker,
        steps: &mut Vec<StepRecord>,
    ) {
        let first_install = outcome == InstallOutcome::FirstInstallSuccess;

        tracker.update_stage(Stage::UpdatingChannels);
        let result = self.collaborators.update_channels(prefs.channel.as_deref());
        steps.push(step_record(tracker, Stage::UpdatingChannels, result));

        tracker.update_stage(Stage::CopyingPreferencesFile);
        let record = match (&request.preferences_path, first_install) {
            (Some(prefs_path), true) => {
                let result = self.collaborators.copy_first_run_preferences(prefs_path);
                step_record(tracker, Stage::CopyingPreferencesFile, result)
            }
            _ => skipped(Stage::CopyingPreferencesFile),
        };
        steps.push(record);

        tracker.update_stage(Stage::CreatingShortcuts);
        let result = self.create_shortcuts(
            InstallShortcutOperation::for_install(prefs, outcome),
            prefs.alternate_shortcut_text,
        );
        steps.push(step_record(tracker, Stage::CreatingShortcuts, result));

        tracker.update_stage(Stage::RegisteringProduct);
        let result = self
            .collaborators
            .register_product(should_make_default(prefs, outcome));
        steps.push(step_record(tracker, Stage::RegisteringProduct, result));

        if first_install {
            tracker.update_stage(Stage::ConfigureAutoLaunch);
            let record = if prefs.auto_launch {
                let result = self.collaborators.enable_auto_launch();
                step_record(tracker, Stage::ConfigureAutoLaunch, result)
            } else {
                skipped(Stage::ConfigureAutoLaunch)
            };
            steps.push(record);
        } else {
            steps.push(skipped(Stage::ConfigureAutoLaunch));
        }

        tracker.update_stage(Stage::RemovingOldVersions);
        let result = self
            .collaborators
            .remove_old_versions(&request.new_version, existing_version)
            .map(|removed| {
                for path in removed {
                    debug!(path = %path.display(), "removed old version directory");
                }
            });
        steps.push(step_record(tracker, Stage::RemovingOldVersions, result));
    }

    fn create_shortcuts(
        &self,
        install_operation: InstallShortcutOperation,
        alternate_desktop_name: bool,
    ) -> Result<()> {
        if let Err(err) = self.collaborators.cleanup_legacy_shortcuts() {
            warn!(error = %format!("{err:#}"), "failed to remove legacy shortcuts");
        }

        let plan = plan_shortcuts(
            &self.product,
            &self.layout.executable_path(&self.product),
            install_operation,
            alternate_desktop_name,
        );

        let mut failures = Vec::new();
        for shortcut in &plan {
            debug!("{}", describe_shortcut_operation(shortcut, false));
            match self.collaborators.create_or_update_shortcut(shortcut) {
                Ok(true) => {}
                Ok(false) => warn!("{}", describe_shortcut_operation(shortcut, true)),
                Err(err) => {
                    let message = describe_shortcut_operation(shortcut, true);
                    warn!(error = %format!("{err:#}"), "{message}");
                    failures.push(message);
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(failures.join(" ")))
        }
    }
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("layout", &self.layout)
            .field("product", &self.product)
            .finish_non_exhaustive()
    }
}

fn step_record(tracker: &mut StageTracker, step: Stage, result: Result<()>) -> StepRecord {
    match result {
        Ok(()) => StepRecord {
            step,
            result: StepResult::Completed,
        },
        Err(err) => {
            let message = format!("{err:#}");
            warn!(step = step.as_str(), error = %message, "post-install step failed");
            tracker.record(JournalEvent::StepFailed {
                step: step.as_str().to_string(),
                message: message.clone(),
            });
            StepRecord {
                step,
                result: StepResult::Failed(message),
            }
        }
    }
}

fn skipped(step: Stage) -> StepRecord {
    StepRecord {
        step,
        result: StepResult::Skipped,
    }
}

fn remove_backup_dir(path: &Path) {
    if path_exists(path) {
        if let Err(err) = remove_path(path) {
            warn!(path = %path.display(), error = %err, "failed to remove install backups");
        }
    }
}
