pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::EngineConfig;
pub use context::{Context, MergeConflict};
pub use error::{FailureKind, Result, TandemError};
pub use event::EventBus;
pub use types::*;
