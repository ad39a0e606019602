//! Configuration types.
//!
//! - [`EngineSettings`]: startup settings (defaults, TOML file, environment)
//! - [`FetchOptions`]: the per-batch options recognized by the scheduler

mod options;
pub(crate) mod serde_duration;
mod settings;

pub use options::{CachePolicy, FetchOptions};
pub use settings::{EngineSettings, RateLimitConfig, ENV_PREFIX, MAX_CONCURRENCY};
