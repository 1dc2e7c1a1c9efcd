mod app;
mod domain;
mod gateway;
mod infra;
mod shared;
pub mod test_support;

pub(crate) use shared::blocking;

pub use app::cli::Cli;
pub use app::entry::{main_entry, run};
pub use app::logging::{init as init_logging, LoggingGuard};
pub use infra::config::{AppConfig, MirrorConfig, RecipientPolicy};
pub use shared::error::{AppError, AppResult};
