pub mod app;
pub mod common;

pub use app::{Application, SystemStatus};
pub use common::{init_logging, load_config, StartupConfig};
