//! Transition scheduling.
//!
//! Turns a [`GraphDiff`] into an ordered action list. Phases run in a fixed
//! sequence, each completing before the next starts:
//!
//! 1. Persist the new graph (see [`Plan::persist`]).
//! 2. Transition interfaces common to both graphs.
//! 3. Tear down removed interfaces, deepest first.
//! 4. Bring up created and rescheduled interfaces in dependency order.
//! 5. Wait for the settle delay if any link state changed.

use std::collections::BTreeMap;
use std::fmt;

use crate::config::DEFAULT_MANAGEMENT_INTERFACE;
use crate::diff::{GraphDiff, Transition};
use crate::graph::InterfaceGraph;

/// Why an interface is brought up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUpReason {
    /// Newly created interface.
    Created,
    /// Existing interface taken down for reconfiguration.
    Reconfigured,
    /// Interface taken over from DHCP; forced up without dropping the link.
    Claimed,
}

/// Why an interface is brought down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringDownReason {
    /// Configuration changed in place.
    Reconfigure,
    /// Taken over from DHCP with a non-static configuration.
    Capture,
    /// No longer present in the desired topology.
    Removal,
}

/// A single step executed against the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Stop any DHCP client bound to the interface.
    StopDhcp { interface: String },
    /// Bring the interface down. Always best-effort.
    BringDown {
        interface: String,
        reason: BringDownReason,
    },
    /// Delete the persisted configuration of a removed interface.
    RemoveConfig { interface: String },
    /// Bring the interface up.
    BringUp {
        interface: String,
        reason: BringUpReason,
    },
}

impl Action {
    /// The interface this action touches.
    pub fn interface(&self) -> &str {
        match self {
            Self::StopDhcp { interface }
            | Self::BringDown { interface, .. }
            | Self::RemoveConfig { interface }
            | Self::BringUp { interface, .. } => interface,
        }
    }

    /// Check if a failure of this action is swallowed with a warning.
    ///
    /// Host state may already disagree with the old snapshot, so failing to
    /// take something down must not block independent interfaces.
    pub fn is_best_effort(&self) -> bool {
        !matches!(self, Self::BringUp { .. })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StopDhcp { interface } => write!(f, "stop dhcp client on {interface}"),
            Self::BringDown { interface, reason } => {
                let why = match reason {
                    BringDownReason::Reconfigure => "for reconfigure",
                    BringDownReason::Capture => "for capture",
                    BringDownReason::Removal => "for removal",
                };
                write!(f, "ifdown {interface} {why}")
            }
            Self::RemoveConfig { interface } => write!(f, "remove config of {interface}"),
            Self::BringUp { interface, reason } => {
                let what = match reason {
                    BringUpReason::Created => "new",
                    BringUpReason::Reconfigured => "reconfigured",
                    BringUpReason::Claimed => "claimed",
                };
                write!(f, "ifup {what} {interface}")
            }
        }
    }
}

/// Scheduling options.
#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    /// Interface never brought up by the scheduler.
    pub management_interface: String,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            management_interface: DEFAULT_MANAGEMENT_INTERFACE.to_string(),
        }
    }
}

/// Ordered reconciliation actions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Interfaces of the new graph to persist, in ascending order.
    pub persist: Vec<String>,
    /// Host actions in execution order.
    pub actions: Vec<Action>,
    /// Whether to wait for links to settle afterwards.
    pub settle: bool,
}

impl Plan {
    /// Check if the plan touches no interface.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Interfaces brought down, in execution order.
    pub fn brought_down(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::BringDown { .. }))
            .map(Action::interface)
            .collect()
    }

    /// Interfaces brought up, in execution order.
    pub fn brought_up(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::BringUp { .. }))
            .map(Action::interface)
            .collect()
    }

    /// Get a human-readable summary of the plan.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("write config for {} interfaces", self.persist.len())];
        lines.extend(self.actions.iter().map(|a| a.to_string()));
        if self.settle {
            lines.push("wait for links to settle".to_string());
        }
        lines.join("\n")
    }
}

/// Schedule the actions converging `old` onto `new`.
///
/// Both graphs must already be ordered.
pub fn schedule(
    old: &InterfaceGraph,
    new: &InterfaceGraph,
    diff: &GraphDiff,
    opts: &ScheduleOptions,
) -> Plan {
    let mut plan = Plan {
        persist: new.by_order().iter().map(|i| i.name.clone()).collect(),
        ..Default::default()
    };
    let mut to_up: BTreeMap<&str, BringUpReason> = BTreeMap::new();

    // Interfaces present on both sides act independently of each other.
    for (name, transition) in diff.iter().filter(|(_, t)| t.is_common()) {
        let auto = new.get(name).is_some_and(|i| i.auto);
        match transition {
            Transition::Unchanged => {}
            Transition::ClaimedFromDhcp => {
                plan.actions.push(Action::StopDhcp {
                    interface: name.to_string(),
                });
                to_up.insert(name, BringUpReason::Claimed);
            }
            Transition::ClaimedFromDhcpManual => {
                plan.actions.push(Action::StopDhcp {
                    interface: name.to_string(),
                });
                plan.actions.push(Action::BringDown {
                    interface: name.to_string(),
                    reason: BringDownReason::Capture,
                });
                if auto {
                    to_up.insert(name, BringUpReason::Reconfigured);
                }
                plan.settle = true;
            }
            Transition::Reconfigured => {
                plan.actions.push(Action::BringDown {
                    interface: name.to_string(),
                    reason: BringDownReason::Reconfigure,
                });
                if auto {
                    to_up.insert(name, BringUpReason::Reconfigured);
                }
                plan.settle = true;
            }
            Transition::Removed | Transition::Created => unreachable!("filtered above"),
        }
    }

    let mut removed: Vec<&str> = diff.with(Transition::Removed).collect();
    removed.sort_by_key(|name| std::cmp::Reverse(old.order_of(name)));
    for name in removed {
        plan.actions.push(Action::BringDown {
            interface: name.to_string(),
            reason: BringDownReason::Removal,
        });
        plan.actions.push(Action::RemoveConfig {
            interface: name.to_string(),
        });
    }

    for iface in new.by_order() {
        if iface.name == opts.management_interface {
            continue;
        }
        match diff.get(&iface.name) {
            Some(Transition::Created) if iface.auto => {
                plan.actions.push(Action::BringUp {
                    interface: iface.name.clone(),
                    reason: BringUpReason::Created,
                });
                plan.settle = true;
            }
            _ => {
                if let Some(reason) = to_up.get(iface.name.as_str()) {
                    plan.actions.push(Action::BringUp {
                        interface: iface.name.clone(),
                        reason: *reason,
                    });
                }
            }
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::graph::{ConfigMode, Interface, InterfaceKind, order};
    use std::net::Ipv4Addr;

    fn plan_for(mut old: InterfaceGraph, mut new: InterfaceGraph) -> Plan {
        order(&mut old).unwrap();
        order(&mut new).unwrap();
        let d = diff(&old, &new);
        schedule(&old, &new, &d, &ScheduleOptions::default())
    }

    fn iface(name: &str, config: ConfigMode, auto: bool) -> Interface {
        let mut i = Interface::new(name);
        i.config = config;
        i.auto = auto;
        i
    }

    fn stack(graph: &mut InterfaceGraph) {
        graph.entry("eth0").config = ConfigMode::Manual;
        let bond = graph.entry("bond0");
        bond.kind = InterfaceKind::Bond;
        bond.children = vec!["eth0".into()];
        let vlan = graph.entry("bond0.100");
        vlan.kind = InterfaceKind::Vlan;
        vlan.children = vec!["bond0".into()];
        vlan.auto = true;
        let br = graph.entry("br100");
        br.kind = InterfaceKind::Bridge;
        br.children = vec!["bond0.100".into()];
        br.auto = true;
    }

    #[test]
    fn test_claimed_from_dhcp() {
        let old: InterfaceGraph = [iface("eth0", ConfigMode::Dhcp, true)].into_iter().collect();
        let mut eth0 = iface("eth0", ConfigMode::Static, true);
        eth0.address = Some(Ipv4Addr::new(10, 0, 0, 5));
        eth0.netmask = Some(Ipv4Addr::new(255, 255, 255, 0));
        let new: InterfaceGraph = [eth0].into_iter().collect();

        let plan = plan_for(old, new);
        assert_eq!(
            plan.actions,
            vec![
                Action::StopDhcp {
                    interface: "eth0".into()
                },
                Action::BringUp {
                    interface: "eth0".into(),
                    reason: BringUpReason::Claimed
                },
            ]
        );
        assert!(!plan.settle);
    }

    #[test]
    fn test_claimed_from_dhcp_manual() {
        let old: InterfaceGraph = [
            iface("eth0", ConfigMode::Dhcp, true),
            iface("eth1", ConfigMode::Dhcp, true),
        ]
        .into_iter()
        .collect();
        let new: InterfaceGraph = [
            iface("eth0", ConfigMode::Manual, true),
            iface("eth1", ConfigMode::Manual, false),
        ]
        .into_iter()
        .collect();

        let plan = plan_for(old, new);
        assert_eq!(plan.brought_down(), vec!["eth0", "eth1"]);
        // eth1 is no longer auto, so it stays down.
        assert_eq!(plan.brought_up(), vec!["eth0"]);
        assert!(plan.settle);
    }

    #[test]
    fn test_unchanged_takes_no_action() {
        let mut g = InterfaceGraph::new();
        stack(&mut g);
        let plan = plan_for(g.clone(), g);
        assert!(plan.is_empty());
        assert!(!plan.settle);
        assert_eq!(plan.persist, vec!["eth0", "bond0", "bond0.100", "br100"]);
    }

    #[test]
    fn test_teardown_in_reverse_order() {
        let mut old = InterfaceGraph::new();
        stack(&mut old);
        old.insert(iface("eth1", ConfigMode::Dhcp, true));
        let new: InterfaceGraph = [iface("eth1", ConfigMode::Dhcp, true)].into_iter().collect();

        let plan = plan_for(old, new);
        assert_eq!(plan.brought_down(), vec!["br100", "bond0.100", "bond0", "eth0"]);
        assert_eq!(
            plan.actions[1],
            Action::RemoveConfig {
                interface: "br100".into()
            }
        );
        assert!(plan.brought_up().is_empty());
        assert!(!plan.settle);
    }

    #[test]
    fn test_removed_after_dependents() {
        // eth0 is removed; br0 depended on it and is reconfigured onto eth1.
        let mut old = InterfaceGraph::new();
        old.insert(iface("eth0", ConfigMode::Manual, true));
        old.insert(iface("eth1", ConfigMode::Manual, true));
        let br = old.entry("br0");
        br.kind = InterfaceKind::Bridge;
        br.children = vec!["eth0".into()];

        let mut new = old.clone();
        new.interfaces_mut().remove("eth0");
        new.entry("br0").children = vec!["eth1".into()];

        let plan = plan_for(old, new);
        assert_eq!(plan.brought_down(), vec!["br0", "eth0"]);
    }

    #[test]
    fn test_bring_up_in_dependency_order() {
        let old = InterfaceGraph::new();
        let mut new = InterfaceGraph::new();
        stack(&mut new);
        new.entry("eth0").auto = true;
        new.entry("bond0").auto = true;
        new.insert(iface("bmc", ConfigMode::Static, true));

        let plan = plan_for(old, new);
        assert_eq!(plan.brought_up(), vec!["eth0", "bond0", "bond0.100", "br100"]);
        assert!(plan.settle);
        assert!(plan.persist.contains(&"bmc".to_string()));
    }

    #[test]
    fn test_created_without_auto_not_brought_up() {
        let new: InterfaceGraph = [iface("eth3", ConfigMode::Manual, false)].into_iter().collect();
        let plan = plan_for(InterfaceGraph::new(), new);
        assert!(plan.is_empty());
        assert!(!plan.settle);
    }

    #[test]
    fn test_management_interface_never_brought_up() {
        let old: InterfaceGraph = [iface("bmc", ConfigMode::Dhcp, true)].into_iter().collect();
        let new: InterfaceGraph = [iface("bmc", ConfigMode::Manual, true)].into_iter().collect();
        let plan = plan_for(old, new);
        assert_eq!(plan.brought_down(), vec!["bmc"]);
        assert!(plan.brought_up().is_empty());
    }

    #[test]
    fn test_summary() {
        let old: InterfaceGraph = [iface("eth0", ConfigMode::Manual, true)].into_iter().collect();
        let new: InterfaceGraph = [iface("eth0", ConfigMode::Manual, false)].into_iter().collect();
        let plan = plan_for(old, new);
        assert_eq!(
            plan.summary(),
            "write config for 1 interfaces\nifdown eth0 for reconfigure\nwait for links to settle"
        );
    }
}
