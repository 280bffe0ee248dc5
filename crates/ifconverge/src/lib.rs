//! Host network interface reconciliation.
//!
//! This crate converges a host's persisted interface configuration onto a
//! desired topology of logical networks. A single pass:
//!
//! - builds the desired interface graph from networks and conduits
//!   ([`topology`]),
//! - orders both the current and the desired graph so every interface comes
//!   after the interfaces it depends on ([`graph::order`]),
//! - classifies each interface ([`diff`]),
//! - schedules teardown, reconfiguration and bring-up actions in a safe order
//!   ([`schedule`]),
//! - persists the desired configuration and executes the actions
//!   ([`reconcile`]).
//!
//! Native configuration formats live in [`platform`]; host commands go
//! through the [`exec::ActionSink`] trait.
//!
//! # Example
//!
//! ```ignore
//! use std::path::Path;
//! use ifconverge::{ApplyOptions, Reconciliation, Settings, exec::ShellSink};
//!
//! #[tokio::main]
//! async fn main() -> ifconverge::Result<()> {
//!     let root = Path::new("/");
//!     let settings = Settings::load(Path::new("/etc/ifconverge.yaml")).await?;
//!     let platform = ifconverge::Platform::DebianLike;
//!
//!     let (topology, ctx) = settings.build_topology(platform)?;
//!     let current = platform.snapshot(root).await?;
//!
//!     let opts = ApplyOptions::default();
//!     let run = Reconciliation::prepare(current, topology.graph, &opts)?;
//!     let modules = platform.kernel_modules(&run.new, ctx.machine_bond_mode());
//!
//!     let mut store = platform.config_store(root);
//!     let result = run
//!         .apply(&modules, &mut ShellSink::new(root), store.as_mut(), &opts)
//!         .await?;
//!     println!("{}", result.summary_text());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod diff;
pub mod error;
pub mod exec;
pub mod graph;
pub mod platform;
pub mod reconcile;
pub mod schedule;
pub mod topology;

// Re-export common types at crate root for convenience
pub use config::Settings;
pub use diff::{GraphDiff, Transition};
pub use error::{Error, Result};
pub use graph::{ConfigMode, Interface, InterfaceGraph, InterfaceKind};
pub use platform::Platform;
pub use reconcile::{ApplyOptions, ApplyResult, Reconciliation};
pub use schedule::{Action, Plan};
