//! One reconciliation pass.
//!
//! [`Reconciliation::prepare`] runs every check that can abort the run, then
//! diffs and schedules. Nothing on the host is touched until
//! [`Reconciliation::apply`] is called, so a fatal error never leaves a
//! partially rewritten configuration behind.
//!
//! # Example
//!
//! ```ignore
//! use ifconverge::reconcile::{ApplyOptions, Reconciliation};
//!
//! let opts = ApplyOptions::default();
//! let run = Reconciliation::prepare(old, new, &opts)?;
//! println!("{}", run.plan.summary());
//!
//! let result = run.apply(&modules, &mut sink, store.as_mut(), &opts).await?;
//! for err in &result.errors {
//!     eprintln!("{err}");
//! }
//! ```

use std::time::Duration;

use crate::config::{DEFAULT_MANAGEMENT_INTERFACE, DEFAULT_START_UP_DELAY};
use crate::diff::{GraphDiff, diff};
use crate::error::{Error, Result};
use crate::exec::ActionSink;
use crate::graph::{InterfaceGraph, order};
use crate::platform::{ConfigStore, KernelModule};
use crate::schedule::{Action, Plan, ScheduleOptions, schedule};

/// Options for applying a reconciliation.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Don't touch the host, just report what would be done.
    pub dry_run: bool,
    /// Fixed wait after link state changed.
    pub settle_delay: Duration,
    /// Interface never brought up.
    pub management_interface: String,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            settle_delay: Duration::from_secs(DEFAULT_START_UP_DELAY),
            management_interface: DEFAULT_MANAGEMENT_INTERFACE.to_string(),
        }
    }
}

/// Result of applying a reconciliation.
#[derive(Debug, Default)]
pub struct ApplyResult {
    /// Number of host actions executed (or that would be in dry-run mode).
    pub changes_made: usize,
    /// Bring-up failures. Best-effort failures are only logged.
    pub errors: Vec<ApplyError>,
    /// Summary of what was done.
    pub summary: Vec<String>,
}

impl ApplyResult {
    /// Check if every bring-up succeeded.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Get a human-readable summary.
    pub fn summary_text(&self) -> String {
        if self.summary.is_empty() {
            "No changes made".to_string()
        } else {
            self.summary.join("\n")
        }
    }
}

/// An action that failed during application.
#[derive(Debug)]
pub struct ApplyError {
    /// What operation was being performed.
    pub operation: String,
    /// The underlying error.
    pub error: Error,
}

impl std::fmt::Display for ApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.operation, self.error)
    }
}

/// A validated, scheduled reconciliation between two graphs.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// The host's current configuration, ordered.
    pub old: InterfaceGraph,
    /// The desired configuration, ordered.
    pub new: InterfaceGraph,
    pub diff: GraphDiff,
    pub plan: Plan,
}

impl Reconciliation {
    /// Order both graphs, classify every interface and schedule the actions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyTopology`] if `new` has no interfaces and
    /// [`Error::CycleDetected`] if either graph has a dependency cycle.
    pub fn prepare(
        mut old: InterfaceGraph,
        mut new: InterfaceGraph,
        opts: &ApplyOptions,
    ) -> Result<Self> {
        if new.is_empty() {
            return Err(Error::EmptyTopology);
        }
        order(&mut old)?;
        order(&mut new)?;

        for iface in new.by_order() {
            tracing::debug!(
                interface = %iface.name,
                order = iface.order,
                kind = %iface.kind,
                config = %iface.config,
                children = ?iface.children,
                "desired"
            );
        }

        let diff = diff(&old, &new);
        tracing::debug!(changes = diff.change_count(), "computed diff");

        let sched = ScheduleOptions {
            management_interface: opts.management_interface.clone(),
        };
        let plan = schedule(&old, &new, &diff, &sched);

        Ok(Self {
            old,
            new,
            diff,
            plan,
        })
    }

    /// Persist the new graph and execute the plan.
    ///
    /// Actions run strictly in order. Failures of best-effort actions are
    /// logged and skipped; failed bring-ups are collected in
    /// [`ApplyResult::errors`] and do not stop later actions.
    ///
    /// # Errors
    ///
    /// Fails only if the new configuration cannot be persisted, before any
    /// link is touched.
    pub async fn apply(
        &self,
        modules: &[KernelModule],
        sink: &mut dyn ActionSink,
        store: &mut dyn ConfigStore,
        opts: &ApplyOptions,
    ) -> Result<ApplyResult> {
        let mut result = ApplyResult::default();
        let interfaces = self.new.by_order();

        if opts.dry_run {
            result
                .summary
                .push(format!("Would write config for {} interfaces", interfaces.len()));
            for module in modules {
                result
                    .summary
                    .push(format!("Would load module {}", module.name));
            }
            for action in &self.plan.actions {
                result.summary.push(format!("Would {action}"));
                result.changes_made += 1;
            }
            if self.plan.settle {
                result.summary.push(format!(
                    "Would wait {}s for links to settle",
                    opts.settle_delay.as_secs()
                ));
            }
            return Ok(result);
        }

        store.write(&interfaces).await?;
        result
            .summary
            .push(format!("Wrote config for {} interfaces", interfaces.len()));

        for module in modules {
            match sink.load_module(module).await {
                Ok(()) => tracing::debug!(module = %module.name, "module ready"),
                Err(e) => tracing::warn!(module = %module.name, error = %e, "module load failed"),
            }
        }

        for action in &self.plan.actions {
            tracing::info!(action = %action, "executing");
            // Ok(false) means the action had nothing to act on.
            let outcome = match action {
                Action::StopDhcp { interface } => sink.stop_dhcp(interface).await.map(|()| true),
                Action::BringDown { interface, .. } => {
                    sink.bring_down(interface).await.map(|()| true)
                }
                Action::RemoveConfig { interface } => store.remove(interface).await,
                Action::BringUp { interface, .. } => sink.bring_up(interface).await.map(|()| true),
            };

            match outcome {
                Ok(true) => {
                    result.summary.push(action.to_string());
                    result.changes_made += 1;
                }
                Ok(false) => tracing::debug!(action = %action, "nothing to do"),
                Err(e) if action.is_best_effort() => {
                    tracing::warn!(action = %action, error = %e, "best-effort action failed");
                }
                Err(e) => {
                    tracing::error!(action = %action, error = %e, "action failed");
                    result.errors.push(ApplyError {
                        operation: action.to_string(),
                        error: e,
                    });
                }
            }
        }

        if self.plan.settle && !opts.settle_delay.is_zero() {
            tracing::info!(
                delay_secs = opts.settle_delay.as_secs(),
                "waiting for links to settle"
            );
            tokio::time::sleep(opts.settle_delay).await;
            result.summary.push("Waited for links to settle".to_string());
        }

        Ok(result)
    }
}
