use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::backend;
use crate::config::Config;
use crate::orchestrator::{self, PlannedTarget, RunRequest, RunSummary, StartError};
use crate::run_state::RunState;
use crate::settings::{RunConfig, Settings};
use crate::templates::TemplateLibrary;
use crate::window::WindowTarget;

pub struct AppStateInner {
    pub config: Config,
    pub settings: Settings,
    pub targets: Vec<WindowTarget>,
    pub run: Arc<RunState>,
    pub templates: Arc<TemplateLibrary>,
    pub run_handle: Option<JoinHandle<RunSummary>>,
    pub last_summary: Option<RunSummary>,
}

pub type AppState = Arc<Mutex<AppStateInner>>;

impl AppStateInner {
    pub fn new(config: Config, settings: Settings, templates: Arc<TemplateLibrary>) -> Self {
        let targets = backend::bind_all(&settings.windows);
        Self {
            config,
            settings,
            targets,
            run: Arc::new(RunState::new()),
            templates,
            run_handle: None,
            last_summary: None,
        }
    }

    /// Swap in new settings and rebind windows. A run in progress keeps
    /// the targets and plans it started with.
    pub fn apply_settings(&mut self, settings: Settings) {
        self.targets = backend::bind_all(&settings.windows);
        self.settings = settings;
    }

    pub fn request(&self, config: RunConfig) -> RunRequest {
        RunRequest {
            config,
            targets: self
                .targets
                .iter()
                .map(|window| PlannedTarget {
                    window: window.clone(),
                    plan: self.settings.plan_for(&window.title),
                })
                .collect(),
            templates: self.templates.snapshot(),
            diagnostics: self.config.diagnostics_dir.clone(),
        }
    }

    pub fn start(&mut self, config: RunConfig) -> Result<(), StartError> {
        let handle = orchestrator::start_run(Arc::clone(&self.run), self.request(config))?;
        self.run_handle = Some(handle);
        Ok(())
    }

    /// Collect the summary of a run that has ended.
    pub async fn reap(&mut self) -> Option<RunSummary> {
        if self.run_handle.as_ref().is_some_and(|h| h.is_finished()) {
            let handle = self.run_handle.take()?;
            match handle.await {
                Ok(summary) => self.last_summary = Some(summary),
                Err(e) => tracing::error!("run task failed: {e}"),
            }
        }
        self.last_summary
    }

    pub fn valid_target_count(&self) -> usize {
        self.targets.iter().filter(|t| t.is_valid()).count()
    }
}
