//! Snapshot diffing.
//!
//! Classifies every interface of an old and a new graph into the transition
//! it needs.

use std::collections::BTreeMap;
use std::fmt;

use crate::graph::{ConfigMode, InterfaceGraph};

/// How an interface moves from the old snapshot to the new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Present in both graphs with identical configuration.
    Unchanged,
    /// Only present in the old graph.
    Removed,
    /// Only present in the new graph.
    Created,
    /// Was DHCP-managed, now statically addressed.
    ClaimedFromDhcp,
    /// Was DHCP-managed, now anything but static.
    ClaimedFromDhcpManual,
    /// Configuration changed and was not DHCP-managed.
    Reconfigured,
}

impl Transition {
    /// Get the transition as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Removed => "removed",
            Self::Created => "created",
            Self::ClaimedFromDhcp => "claimed-from-dhcp",
            Self::ClaimedFromDhcpManual => "claimed-from-dhcp-manual",
            Self::Reconfigured => "reconfigured",
        }
    }

    /// Check if the interface is present in both graphs.
    pub fn is_common(&self) -> bool {
        !matches!(self, Self::Removed | Self::Created)
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of every interface present in either graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphDiff {
    transitions: BTreeMap<String, Transition>,
}

impl GraphDiff {
    /// Get the transition of an interface.
    pub fn get(&self, name: &str) -> Option<Transition> {
        self.transitions.get(name).copied()
    }

    /// Iterate over `(name, transition)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Transition)> {
        self.transitions.iter().map(|(n, t)| (n.as_str(), *t))
    }

    /// Names classified with the given transition, in name order.
    pub fn with(&self, transition: Transition) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(move |(_, t)| *t == transition)
            .map(|(n, _)| n)
    }

    /// Check if every interface is unchanged.
    pub fn is_empty(&self) -> bool {
        self.transitions.values().all(|t| *t == Transition::Unchanged)
    }

    /// Number of interfaces that need some transition.
    pub fn change_count(&self) -> usize {
        self.transitions
            .values()
            .filter(|t| **t != Transition::Unchanged)
            .count()
    }

    /// Get a human-readable summary of the changes.
    pub fn summary(&self) -> String {
        let lines: Vec<String> = self
            .iter()
            .filter(|(_, t)| *t != Transition::Unchanged)
            .map(|(name, t)| {
                let sigil = match t {
                    Transition::Created => '+',
                    Transition::Removed => '-',
                    _ => '~',
                };
                format!("{sigil} {name} ({t})")
            })
            .collect();

        if lines.is_empty() {
            "No changes needed".to_string()
        } else {
            lines.join("\n")
        }
    }
}

/// Classify every interface of `old` and `new`.
pub fn diff(old: &InterfaceGraph, new: &InterfaceGraph) -> GraphDiff {
    let mut transitions = BTreeMap::new();

    for before in old.iter() {
        let transition = match new.get(&before.name) {
            None => Transition::Removed,
            Some(after) => {
                let changed = before.changed_fields(after);
                if changed.is_empty() {
                    tracing::debug!(interface = %before.name, "did not change");
                    Transition::Unchanged
                } else {
                    tracing::debug!(interface = %before.name, ?changed, "changed");
                    match (before.config, after.config) {
                        (ConfigMode::Dhcp, ConfigMode::Static) => Transition::ClaimedFromDhcp,
                        (ConfigMode::Dhcp, _) => Transition::ClaimedFromDhcpManual,
                        _ => Transition::Reconfigured,
                    }
                }
            }
        };
        transitions.insert(before.name.clone(), transition);
    }

    for after in new.iter() {
        if !old.contains(&after.name) {
            transitions.insert(after.name.clone(), Transition::Created);
        }
    }

    GraphDiff { transitions }
}
