//! dockyardd — the Dockyard daemon.
//!
//! Assembles every subsystem into one process:
//! - State store (redb)
//! - Platform facade (Kubernetes or simulated)
//! - Job queue with lifecycle lane handlers
//! - Worker health monitor, status reconciler, usage collector loops
//! - Operator REST API
//!
//! # Usage
//!
//! ```text
//! dockyardd run --config /etc/dockyard/dockyard.toml
//! dockyardd check-config --config /etc/dockyard/dockyard.toml
//! ```

pub mod daemon;

pub use daemon::{Daemon, load_config};
