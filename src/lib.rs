pub mod config;
pub mod coordinator;
pub mod env;
pub mod error;
pub mod gate;
pub mod platform;
pub mod repo_url;

pub use gate::{BlockReason, Outcome, PublishGate};
