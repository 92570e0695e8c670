use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingEnv(String),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub auth_token: String,
    pub listen_addr: String,
    pub settings_path: PathBuf,
    /// Bundled template root; searched alongside `./assets` and the install prefix.
    pub assets_dir: Option<PathBuf>,
    /// Templates here shadow bundled ones with the same file stem.
    pub template_override_dir: Option<PathBuf>,
    /// Where unrecognized notice regions are saved. `None` disables saving.
    pub diagnostics_dir: Option<PathBuf>,
    pub scheduler_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let auth_token = lookup("ARONA_AUTH_TOKEN")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ConfigError::MissingEnv("ARONA_AUTH_TOKEN".into()))?;

        let listen_addr = lookup("ARONA_LISTEN_ADDR").unwrap_or_else(|| "127.0.0.1:8091".into());

        let settings_path = lookup("ARONA_SETTINGS")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("arona.json"));

        let assets_dir = lookup("ARONA_ASSETS_DIR").map(PathBuf::from);

        let template_override_dir = Some(
            lookup("ARONA_TEMPLATE_OVERRIDE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("templates")),
        );

        let diagnostics_dir = match lookup("ARONA_DIAGNOSTICS_DIR") {
            Some(v) if v.eq_ignore_ascii_case("off") => None,
            Some(v) => Some(PathBuf::from(v)),
            None => Some(PathBuf::from("screenshots")),
        };

        let scheduler_interval = match lookup("ARONA_SCHEDULER_INTERVAL_SECS") {
            Some(raw) => {
                let secs = raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                    name: "ARONA_SCHEDULER_INTERVAL_SECS".into(),
                    reason: format!("{raw}: {e}"),
                })?;
                if secs == 0 {
                    return Err(ConfigError::Invalid {
                        name: "ARONA_SCHEDULER_INTERVAL_SECS".into(),
                        reason: "must be at least 1".into(),
                    });
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(30),
        };

        Ok(Config {
            auth_token,
            listen_addr,
            settings_path,
            assets_dir,
            template_override_dir,
            diagnostics_dir,
            scheduler_interval,
        })
    }
}
