pub mod api;
pub mod backend;
pub mod config;
pub mod detector;
pub mod invite;
pub mod navigator;
pub mod orchestrator;
pub mod roster;
pub mod run_state;
pub mod scheduler;
pub mod settings;
pub mod state;
pub mod sweep;
pub mod templates;
pub mod window;

#[cfg(test)]
mod testing;
