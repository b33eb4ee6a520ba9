//! Data models for loophost.
//!
//! - [`HostConfig`]: host, singleton, run-loop and retry settings loaded from `loophost.yaml`
//!
//! All config structs derive `Serialize`/`Deserialize` for YAML persistence and
//! default every missing field.

pub mod config;

pub use config::{HostConfig, HostSettings, RetrySettings, RunLoopSettings, SingletonSettings};
