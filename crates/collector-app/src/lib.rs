pub mod config;
pub mod server;

pub use config::{CliArgs, CollectorConfig};
pub use server::{router, wait_for_exit, AppState, Exit};
