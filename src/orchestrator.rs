use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::navigator::{HOST_BACK, Navigator, RoutineError};
use crate::run_state::{Cancelled, FinishGuard, RunState};
use crate::settings::{RunConfig, TargetPlan};
use crate::templates::Templates;
use crate::window::WindowTarget;

pub const INTER_TARGET_DELAY: Duration = Duration::from_secs(5);
const WAKE_CLICK: (u32, u32) = (1450, 200);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("a run is already in progress")]
    AlreadyRunning,
    #[error("no valid window to run on")]
    NoValidTargets,
}

#[derive(Debug, Clone)]
pub struct PlannedTarget {
    pub window: WindowTarget,
    pub plan: TargetPlan,
}

/// Everything one run works from. Templates are a snapshot taken at start.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub config: RunConfig,
    pub targets: Vec<PlannedTarget>,
    pub templates: Arc<Templates>,
    pub diagnostics: Option<PathBuf>,
}

impl RunRequest {
    fn navigator<'a>(&'a self, window: &'a WindowTarget, run: &'a RunState) -> Navigator<'a> {
        Navigator::new(window, &self.templates, run, self.diagnostics.as_deref())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

/// Claim the run flag and start working through every target in the
/// background. Nothing is clicked when the run is refused.
pub fn start_run(run: Arc<RunState>, request: RunRequest) -> Result<JoinHandle<RunSummary>, StartError> {
    if run.is_active() {
        tracing::warn!("start refused: a run is already in progress");
        return Err(StartError::AlreadyRunning);
    }

    let valid = request.targets.iter().filter(|t| t.window.is_valid()).count();
    if valid == 0 {
        tracing::error!("start refused: no valid window");
        return Err(StartError::NoValidTargets);
    }

    if !run.try_begin() {
        tracing::warn!("start refused: a run is already in progress");
        return Err(StartError::AlreadyRunning);
    }

    tracing::info!(
        "run started on {valid} window(s), features: {}",
        request.config.describe()
    );

    Ok(tokio::spawn(async move {
        let _guard = FinishGuard(&run);
        execute_all(&run, &request).await
    }))
}

async fn execute_all(run: &RunState, request: &RunRequest) -> RunSummary {
    let mut summary = RunSummary::default();
    let outcome = drive(run, request, &mut summary).await;
    summary.cancelled = outcome.is_err() || run.is_cancel_requested();

    let valid = request.targets.iter().filter(|t| t.window.is_valid());
    if summary.cancelled {
        for target in valid {
            target.window.input().click_host(HOST_BACK.0, HOST_BACK.1);
        }
        tracing::warn!(
            "run cancelled ({} completed, {} failed)",
            summary.completed,
            summary.failed
        );
    } else {
        tracing::info!(
            "run finished: {} completed, {} failed, {} skipped",
            summary.completed,
            summary.failed,
            summary.skipped
        );
    }
    summary
}

async fn drive(run: &RunState, request: &RunRequest, summary: &mut RunSummary) -> Result<(), Cancelled> {
    for target in request.targets.iter().filter(|t| t.window.is_valid()) {
        target.window.input().click(WAKE_CLICK.0, WAKE_CLICK.1);
    }

    if request.config.mute {
        for target in request.targets.iter().filter(|t| t.window.is_valid()) {
            request.navigator(&target.window, run).mute_sound().await?;
        }
    }

    for (i, target) in request.targets.iter().enumerate() {
        run.checkpoint()?;

        let title = &target.window.title;
        if !target.window.is_valid() {
            tracing::warn!("[{title}] window is gone, skipping");
            summary.skipped += 1;
            continue;
        }

        tracing::info!("---------- window {title} ----------");
        match request.navigator(&target.window, run)
            .execute_script(&request.config, &target.plan)
            .await
        {
            Ok(()) => summary.completed += 1,
            Err(RoutineError::Cancelled(c)) => return Err(c),
            Err(e) => {
                tracing::error!("[{title}] routine aborted: {e}");
                summary.failed += 1;
            }
        }

        if request.targets[i + 1..].iter().any(|t| t.window.is_valid()) {
            tracing::info!("next window in {}s", INTER_TARGET_DELAY.as_secs());
            run.sleep(INTER_TARGET_DELAY).await?;
        }
    }

    for target in request.targets.iter().filter(|t| t.window.is_valid()) {
        let nav = request.navigator(&target.window, run);
        nav.recover("closing the game", nav.close_by_return().await)?;
    }

    Ok(())
}
