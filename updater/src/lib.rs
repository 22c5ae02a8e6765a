pub mod cli;
pub mod orchestrator;
pub mod platform;
pub mod presenter;
pub mod reaper;
pub mod settings;

pub use orchestrator::{UpdateStatus, Updater};
pub use settings::UpdateRequest;
