//! Desired-state graph construction.
//!
//! Logical networks are mapped onto interfaces through their conduit, then
//! overlaid with bonding, VLAN tagging and bridging. Networks write into one
//! shared graph, so a later network may extend an interface an earlier one
//! created (two VLANs on one bond, for instance).

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_MANAGEMENT_INTERFACE;
use crate::error::{Error, Result};
use crate::graph::{Addressing, ConfigMode, InterfaceGraph, InterfaceKind};
use crate::platform::Platform;

/// Router preference of a network that declares none.
pub const DEFAULT_ROUTER_PREF: u32 = 10000;

/// Network whose router is used when no network declares a preference.
pub const DEFAULT_ROUTER_NETWORK: &str = "admin";

/// A logical network to be realized on this host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDefinition {
    pub name: String,
    pub conduit: String,
    #[serde(default)]
    pub use_vlan: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan: Option<u16>,
    #[serde(default)]
    pub add_bridge: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netmask: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router_pref: Option<u32>,
}

impl NetworkDefinition {
    /// VLAN tag to overlay, if the network is tagged.
    pub fn vlan_tag(&self) -> Option<u16> {
        if self.use_vlan && self.vlan.is_none() {
            tracing::warn!(network = %self.name, "use_vlan set without a vlan id, ignoring");
        }
        self.vlan.filter(|_| self.use_vlan)
    }

    fn router_pref(&self) -> u32 {
        self.router_pref.unwrap_or(DEFAULT_ROUTER_PREF)
    }
}

/// Interface a conduit maps to on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConduit {
    /// Interface carrying the network's traffic.
    pub interface: String,
    /// Physical ports to enslave when `interface` is a bond, empty otherwise.
    pub ports: Vec<String>,
    /// Bonding mode requested for this conduit.
    pub bond_mode: Option<String>,
}

impl ResolvedConduit {
    /// Check if the conduit needs a bond.
    pub fn is_bond(&self) -> bool {
        !self.ports.is_empty()
    }
}

/// Maps conduit names to interfaces.
pub trait ConduitResolver {
    /// Resolve a conduit, or `None` if this host has no mapping for it.
    fn resolve(&self, conduit: &str, ctx: &mut BuildContext) -> Option<ResolvedConduit>;
}

/// State threaded through one topology build.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub platform: Platform,
    /// Bonding mode used when a conduit requests none.
    pub default_bond_mode: String,
    /// Network never built into the graph.
    pub management_network: String,
    machine_bond_mode: Option<String>,
    bonds: BTreeMap<String, String>,
}

impl BuildContext {
    /// Create a context for the given platform and default bonding mode.
    pub fn new(platform: Platform, default_bond_mode: impl Into<String>) -> Self {
        Self {
            platform,
            default_bond_mode: default_bond_mode.into(),
            management_network: DEFAULT_MANAGEMENT_INTERFACE.to_string(),
            machine_bond_mode: None,
            bonds: BTreeMap::new(),
        }
    }

    /// Set the management network name.
    pub fn management_network(mut self, name: impl Into<String>) -> Self {
        self.management_network = name.into();
        self
    }

    /// Bond name for a conduit, allocating `bond<N>` on first use.
    pub fn bond_for(&mut self, conduit: &str) -> String {
        let next = self.bonds.len();
        self.bonds
            .entry(conduit.to_string())
            .or_insert_with(|| format!("bond{next}"))
            .clone()
    }

    /// The bonding mode in effect for this machine, once a bond was built.
    pub fn machine_bond_mode(&self) -> Option<&str> {
        self.machine_bond_mode.as_deref()
    }

    /// Record a bonding mode request. The first request wins.
    fn request_bond_mode(&mut self, mode: &str, conduit: &str) -> String {
        match &self.machine_bond_mode {
            None => {
                self.machine_bond_mode = Some(mode.to_string());
                mode.to_string()
            }
            Some(current) => {
                if current != mode {
                    tracing::warn!(
                        conduit,
                        requested = mode,
                        active = %current,
                        "conflicting bonding modes, keeping the first"
                    );
                }
                current.clone()
            }
        }
    }
}

/// Result of building the desired topology.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub graph: InterfaceGraph,
    /// Interface carrying each network's addressing, by network name.
    pub targets: BTreeMap<String, String>,
}

impl Topology {
    /// Addressing that ended up on a network's interface.
    pub fn addressing_of(&self, network: &str) -> Option<Addressing> {
        let target = self.targets.get(network)?;
        self.graph.get(target).map(|i| i.addressing())
    }
}

/// Name of the network whose router becomes the default gateway.
///
/// The lowest `router_pref` wins; ties go to the earlier declaration.
pub fn preferred_router_network(networks: &[NetworkDefinition]) -> &str {
    let mut best = DEFAULT_ROUTER_PREF;
    let mut name = DEFAULT_ROUTER_NETWORK;
    for net in networks {
        let pref = net.router_pref();
        tracing::debug!(network = %net.name, pref, "evaluating router");
        if pref < best {
            best = pref;
            name = &net.name;
        }
    }
    name
}

/// Build the desired interface graph from logical networks.
///
/// # Errors
///
/// Returns [`Error::UnresolvedConduit`] as soon as a network's conduit has no
/// mapping.
pub fn build(
    networks: &[NetworkDefinition],
    resolver: &impl ConduitResolver,
    ctx: &mut BuildContext,
) -> Result<Topology> {
    let mut topo = Topology::default();
    let gateway_network = preferred_router_network(networks);
    tracing::info!(network = gateway_network, "allowing routers from");

    for net in networks {
        if net.name == ctx.management_network {
            continue;
        }
        let allow_gateway = net.name == gateway_network;
        let target = build_network(net, allow_gateway, resolver, ctx, &mut topo.graph)?;
        topo.targets.insert(net.name.clone(), target);
    }

    Ok(topo)
}

fn build_network(
    net: &NetworkDefinition,
    allow_gateway: bool,
    resolver: &impl ConduitResolver,
    ctx: &mut BuildContext,
    graph: &mut InterfaceGraph,
) -> Result<String> {
    let resolved = resolver
        .resolve(&net.conduit, ctx)
        .ok_or_else(|| Error::UnresolvedConduit {
            network: net.name.clone(),
            conduit: net.conduit.clone(),
        })?;
    let mut target = resolved.interface.clone();

    if resolved.is_bond() {
        let requested = resolved
            .bond_mode
            .clone()
            .unwrap_or_else(|| ctx.default_bond_mode.clone());
        let mode = ctx.request_bond_mode(&requested, &net.conduit);

        let bond = graph.entry(&target);
        bond.kind = InterfaceKind::Bond;
        bond.children = resolved.ports.clone();
        bond.bond_opts = ctx.platform.bond_opts(&mode);
        if bond.config == ConfigMode::None {
            bond.config = ConfigMode::Manual;
        }

        // Enslaved ports carry no configuration of their own.
        for port in &resolved.ports {
            let slave = graph.reset(port);
            slave.auto = true;
            slave.config = ConfigMode::Manual;
            slave.slave = true;
            slave.master = Some(target.clone());
        }
    }

    if let Some(tag) = net.vlan_tag() {
        let base = target;
        if !graph.contains(&base) {
            let raw = graph.entry(&base);
            raw.auto = true;
            raw.config = ConfigMode::Manual;
        }
        target = format!("{base}.{tag}");
        let vlan = graph.entry(&target);
        vlan.kind = InterfaceKind::Vlan;
        vlan.vlan = Some(tag);
        vlan.auto = true;
        vlan.children = vec![base];
    } else {
        graph.entry(&target).auto = true;
    }

    if net.add_bridge {
        let base = target;
        let port = graph.entry(&base);
        let bridge_name = match port.vlan {
            Some(tag) => format!("br{tag}"),
            None => format!("br{base}"),
        };
        port.bridge = Some(bridge_name.clone());
        port.config = ConfigMode::Manual;

        let bridge = graph.entry(&bridge_name);
        bridge.kind = InterfaceKind::Bridge;
        bridge.children = vec![base];
        bridge.auto = true;
        target = bridge_name;
    }

    let iface = graph.entry(&target);
    match net.address {
        Some(address) if !address.is_unspecified() => {
            iface.config = ConfigMode::Static;
            iface.address = Some(address);
            iface.netmask = net.netmask;
            iface.broadcast = net.broadcast;
            if allow_gateway && net.router.is_some() {
                iface.gateway = net.router;
            }
        }
        _ => iface.config = ConfigMode::Manual,
    }

    tracing::debug!(network = %net.name, interface = %target, "network built");
    Ok(target)
}
