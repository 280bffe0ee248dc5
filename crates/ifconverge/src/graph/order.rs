//! Dependency ordering.
//!
//! Interfaces are numbered with a layered topological sort: every pass walks
//! the still-unordered names in sorted order and numbers each interface whose
//! children are all numbered already. Bring-up follows ascending order,
//! teardown the reverse.

use std::collections::{BTreeMap, BTreeSet};

use super::{Interface, InterfaceGraph};
use crate::error::{Error, Result};

/// Assign a bring-up order to every interface in the graph.
///
/// After success, `order` is a bijection onto `0..graph.len()` and for every
/// child reference the child's order is lower than its parent's. Child lists
/// are sorted as a side effect.
///
/// # Errors
///
/// Returns [`Error::CycleDetected`] naming exactly the interfaces that lie on
/// a dependency cycle.
pub fn order(graph: &mut InterfaceGraph) -> Result<()> {
    graph.materialize_references();
    let ifaces = graph.interfaces_mut();

    for iface in ifaces.values_mut() {
        iface.order = None;
        iface.children.sort();
        iface.children.dedup();
    }

    let mut remaining: Vec<String> = ifaces.keys().cloned().collect();
    let mut seq = 0;

    while !remaining.is_empty() {
        tracing::debug!(?remaining, "ordering pass");
        let mut assigned = 0;

        for name in &remaining {
            if !children_ordered(ifaces, name) {
                continue;
            }
            if let Some(iface) = ifaces.get_mut(name) {
                iface.order = Some(seq);
                seq += 1;
                assigned += 1;
            }
        }

        if assigned == 0 {
            return Err(Error::CycleDetected {
                interfaces: cyclic_members(ifaces, &remaining),
            });
        }

        remaining.retain(|name| ifaces.get(name).is_some_and(|i| i.order.is_none()));
    }

    Ok(())
}

fn children_ordered(ifaces: &BTreeMap<String, Interface>, name: &str) -> bool {
    ifaces.get(name).is_some_and(|iface| {
        iface
            .children
            .iter()
            .all(|c| ifaces.get(c).is_none_or(|child| child.order.is_some()))
    })
}

/// Names in `stuck` that can reach themselves through child references.
///
/// Interfaces that merely depend on a cycle are excluded.
fn cyclic_members(ifaces: &BTreeMap<String, Interface>, stuck: &[String]) -> Vec<String> {
    let within: BTreeSet<&str> = stuck.iter().map(String::as_str).collect();

    stuck
        .iter()
        .filter(|start| reaches(ifaces, &within, start))
        .cloned()
        .collect()
}

fn reaches(ifaces: &BTreeMap<String, Interface>, within: &BTreeSet<&str>, start: &str) -> bool {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<&str> = children_within(ifaces, within, start).collect();

    while let Some(name) = stack.pop() {
        if name == start {
            return true;
        }
        if seen.insert(name) {
            stack.extend(children_within(ifaces, within, name));
        }
    }
    false
}

fn children_within<'a>(
    ifaces: &'a BTreeMap<String, Interface>,
    within: &'a BTreeSet<&str>,
    name: &str,
) -> impl Iterator<Item = &'a str> {
    ifaces
        .get(name)
        .into_iter()
        .flat_map(|i| i.children.iter())
        .map(String::as_str)
        .filter(move |c| within.contains(c))
}
