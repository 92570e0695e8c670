use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use arona::config::Config;
use arona::settings::Settings;
use arona::state::{AppState, AppStateInner};
use arona::templates::{TemplateLibrary, TemplateSources};
use arona::{api, scheduler};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("failed to load configuration")?;

    tracing::info!(
        "arona starting, listen: {}, settings: {}",
        config.listen_addr,
        config.settings_path.display(),
    );

    let sources = TemplateSources::resolve(config.assets_dir.clone(), config.template_override_dir.clone());
    let templates = TemplateLibrary::load(sources).context("failed to load templates")?;

    let settings = Settings::load(&config.settings_path).context("failed to load settings")?;
    settings.log_summary();

    let listen_addr = config.listen_addr.clone();
    let interval = config.scheduler_interval;
    let state: AppState = Arc::new(Mutex::new(AppStateInner::new(config, settings, Arc::new(templates))));

    tokio::spawn(scheduler::run_scheduler(state.clone(), interval));

    let app = api::router(state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&listen_addr)
        .await
        .context(format!("failed to bind to {listen_addr}"))?;

    tracing::info!("listening on {listen_addr}");

    axum::serve(listener, app)
        .await
        .context("server error")?;

    Ok(())
}
