use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_WINDOWS: usize = 3;
pub const MAX_SCHEDULED_TASKS: usize = 8;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Persisted user settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub windows: Vec<WindowBinding>,
    pub timer_enabled: bool,
    pub scheduled_tasks: Vec<ScheduledTask>,
    /// Window title -> students to invite, in priority order.
    pub invite_lists: HashMap<String, Vec<String>>,
    /// Window title -> students invited even when the notice says they would change clothes.
    pub force_invite: HashMap<String, Vec<String>>,
    pub sweep: HashMap<String, SweepPlan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBinding {
    pub title: String,
    /// Directory the window's frames are captured into.
    pub frames: PathBuf,
}

/// Features enabled for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub invite_cafe1: bool,
    pub invite_cafe2: bool,
    pub mute: bool,
    pub sweep: bool,
}

impl RunConfig {
    /// Config for a run started by hand: both cafés invite, nothing else.
    pub const fn manual() -> Self {
        Self {
            invite_cafe1: true,
            invite_cafe2: true,
            mute: false,
            sweep: false,
        }
    }

    pub fn describe(&self) -> String {
        let features: Vec<&str> = [
            (self.invite_cafe1, "cafe 1 invite"),
            (self.invite_cafe2, "cafe 2 invite"),
            (self.mute, "mute"),
            (self.sweep, "sweep"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect();

        if features.is_empty() {
            "patting only".to_string()
        } else {
            features.join(", ")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(flatten)]
    pub run: RunConfig,
}

fn enabled_by_default() -> bool {
    true
}

impl ScheduledTask {
    /// Minute key, `HH:MM`.
    pub fn key(&self) -> String {
        self.time.format(hhmm::FORMAT).to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepPlan {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub stages: Vec<SweepStage>,
}

/// One stage to sweep: `task_index` chapters back from the newest,
/// `sub_task_index` rows down the stage list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepStage {
    pub task_index: u32,
    pub sub_task_index: u32,
}

/// Everything a run needs to know about one window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetPlan {
    pub invite: Vec<String>,
    pub force: HashSet<String>,
    pub sweep: Option<SweepPlan>,
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(raw.trim(), FORMAT).map_err(D::Error::custom)
    }
}

impl Settings {
    /// Read settings from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("{} not found, using default settings", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(SettingsError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let settings: Settings = serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(settings.normalized())
    }

    fn normalized(mut self) -> Self {
        if self.windows.len() > MAX_WINDOWS {
            tracing::warn!("{} windows configured, only the first {MAX_WINDOWS} are used", self.windows.len());
            self.windows.truncate(MAX_WINDOWS);
        }
        if self.scheduled_tasks.len() > MAX_SCHEDULED_TASKS {
            tracing::warn!(
                "{} scheduled tasks configured, only the first {MAX_SCHEDULED_TASKS} are used",
                self.scheduled_tasks.len()
            );
            self.scheduled_tasks.truncate(MAX_SCHEDULED_TASKS);
        }
        self
    }

    pub fn plan_for(&self, title: &str) -> TargetPlan {
        TargetPlan {
            invite: self.invite_lists.get(title).cloned().unwrap_or_default(),
            force: self
                .force_invite
                .get(title)
                .map(|names| names.iter().cloned().collect())
                .unwrap_or_default(),
            sweep: self.sweep.get(title).filter(|plan| plan.enabled).cloned(),
        }
    }

    pub fn log_summary(&self) {
        tracing::info!(
            "settings: {} window(s), timer {}",
            self.windows.len(),
            if self.timer_enabled { "on" } else { "off" }
        );
        for task in &self.scheduled_tasks {
            tracing::info!(
                "  scheduled {} ({}): {}",
                task.key(),
                if task.enabled { "enabled" } else { "disabled" },
                task.run.describe()
            );
        }
        for window in &self.windows {
            let plan = self.plan_for(&window.title);
            tracing::info!(
                "  {}: {} to invite, {} forced, {} sweep stage(s)",
                window.title,
                plan.invite.len(),
                plan.force.len(),
                plan.sweep.map_or(0, |s| s.stages.len())
            );
        }
    }
}
