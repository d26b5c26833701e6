//! dockyard-core — shared plumbing for the Dockyard workspace.
//!
//! - [`DockyardConfig`]: the `dockyard.toml` operational configuration
//! - [`Clock`]: injectable time source so sweeps and state machines can be
//!   tested without real delays
//! - [`parse_duration`]: humantime-style duration strings (`"2m"`, `"60days"`)

pub mod clock;
pub mod config;
pub mod error;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, to_delta};
pub use config::{
    ApiConfig, DockyardConfig, HealthSettings, LaneOverride, LifecycleSettings, PlatformConfig,
    PlatformMode, QueueBackendKind, QueueSettings, ReconcilerSettings, StateConfig,
    parse_duration,
};
pub use error::{ConfigError, ConfigResult};
