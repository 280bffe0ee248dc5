//! Interface graph data model.
//!
//! An [`InterfaceGraph`] maps interface names to [`Interface`] records. Edges
//! run from a composed interface (bond, bridge, VLAN) to the interfaces it is
//! built from, listed in [`Interface::children`]. Back-references such as
//! [`Interface::master`] and [`Interface::bridge`] are purely relational and
//! never establish ownership.
//!
//! Graphs are built in one pass, ordered once with [`order`], and then treated
//! as immutable inputs to [`diff`](crate::diff).

mod order;

pub use order::order;

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use serde::Serialize;

use crate::error::Result;

/// Name of the loopback interface, which is never represented in a graph.
pub const LOOPBACK: &str = "lo";

/// Structural kind of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    /// A physical port.
    #[default]
    Physical,
    /// A bond (team) aggregating physical ports.
    Bond,
    /// A bridge joining one or more interfaces.
    Bridge,
    /// A VLAN sub-interface on a base device.
    Vlan,
}

impl InterfaceKind {
    /// Get the kind as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Physical => "physical",
            Self::Bond => "bond",
            Self::Bridge => "bridge",
            Self::Vlan => "vlan",
        }
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an interface obtains its addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigMode {
    /// Address leased from a DHCP server.
    Dhcp,
    /// Statically assigned address.
    Static,
    /// Link brought up without an address.
    Manual,
    /// No configuration recorded.
    #[default]
    None,
}

impl ConfigMode {
    /// Get the mode as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dhcp => "dhcp",
            Self::Static => "static",
            Self::Manual => "manual",
            Self::None => "none",
        }
    }

    /// Parse a mode keyword, as found in native configuration files.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dhcp" => Some(Self::Dhcp),
            "static" => Some(Self::Static),
            "manual" => Some(Self::Manual),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Layer-3 parameters of a statically addressed interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Addressing {
    pub address: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
    pub broadcast: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
}

/// One network-visible interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interface {
    pub name: String,
    pub kind: InterfaceKind,
    pub config: ConfigMode,
    pub auto: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub netmask: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<Ipv4Addr>,
    /// Interfaces this one is composed from.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    /// Bond controlling this interface.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master: Option<String>,
    /// Bridge this interface is a port of.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub slave: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vlan: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bond_opts: Option<String>,
    /// Position in bring-up order, assigned by [`order`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<usize>,
}

impl Interface {
    /// Create an interface with default (unconfigured physical) values.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: InterfaceKind::Physical,
            config: ConfigMode::None,
            auto: false,
            address: None,
            netmask: None,
            broadcast: None,
            gateway: None,
            children: Vec::new(),
            master: None,
            bridge: None,
            slave: false,
            vlan: None,
            bond_opts: None,
            order: None,
        }
    }

    /// Get the layer-3 parameters of this interface.
    pub fn addressing(&self) -> Addressing {
        Addressing {
            address: self.address,
            netmask: self.netmask,
            broadcast: self.broadcast,
            gateway: self.gateway,
        }
    }

    /// List the fields that differ semantically from `other`.
    ///
    /// `order` is ignored, children are compared as sets, and an empty
    /// string compares equal to an absent one.
    pub fn changed_fields(&self, other: &Interface) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.kind != other.kind {
            changed.push("kind");
        }
        if self.config != other.config {
            changed.push("config");
        }
        if self.auto != other.auto {
            changed.push("auto");
        }
        if self.address != other.address {
            changed.push("address");
        }
        if self.netmask != other.netmask {
            changed.push("netmask");
        }
        if self.broadcast != other.broadcast {
            changed.push("broadcast");
        }
        if self.gateway != other.gateway {
            changed.push("gateway");
        }
        if sorted(&self.children) != sorted(&other.children) {
            changed.push("children");
        }
        if blank(&self.master) != blank(&other.master) {
            changed.push("master");
        }
        if blank(&self.bridge) != blank(&other.bridge) {
            changed.push("bridge");
        }
        if self.slave != other.slave {
            changed.push("slave");
        }
        if self.vlan != other.vlan {
            changed.push("vlan");
        }
        if blank(&self.bond_opts) != blank(&other.bond_opts) {
            changed.push("bond_opts");
        }
        changed
    }

    /// Check semantic equality, ignoring position in the bring-up order.
    pub fn same_config(&self, other: &Interface) -> bool {
        self.changed_fields(other).is_empty()
    }
}

fn sorted(names: &[String]) -> Vec<&str> {
    let mut v: Vec<&str> = names.iter().map(String::as_str).collect();
    v.sort_unstable();
    v.dedup();
    v
}

fn blank(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|s| !s.is_empty())
}

/// A set of interfaces keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceGraph {
    interfaces: BTreeMap<String, Interface>,
}

impl InterfaceGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get an interface, creating a default entry on first reference.
    ///
    /// Callers must not pass [`LOOPBACK`]; it is dropped again at ordering.
    pub fn entry(&mut self, name: &str) -> &mut Interface {
        self.interfaces
            .entry(name.to_string())
            .or_insert_with(|| Interface::new(name))
    }

    /// Replace an interface with a fresh default record and return it.
    pub fn reset(&mut self, name: &str) -> &mut Interface {
        self.interfaces.insert(name.to_string(), Interface::new(name));
        self.entry(name)
    }

    /// Insert an interface, replacing any existing entry of the same name.
    ///
    /// The loopback interface is ignored.
    pub fn insert(&mut self, iface: Interface) {
        if iface.name == LOOPBACK {
            return;
        }
        self.interfaces.insert(iface.name.clone(), iface);
    }

    /// Get an interface by name.
    pub fn get(&self, name: &str) -> Option<&Interface> {
        self.interfaces.get(name)
    }

    /// Check if an interface exists.
    pub fn contains(&self, name: &str) -> bool {
        self.interfaces.contains_key(name)
    }

    /// Number of interfaces.
    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    /// Check if the graph has no interfaces.
    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    /// Interface names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.interfaces.keys().map(String::as_str)
    }

    /// Interfaces in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.values()
    }

    /// Interfaces in ascending bring-up order.
    ///
    /// Unordered interfaces sort last, by name.
    pub fn by_order(&self) -> Vec<&Interface> {
        let mut v: Vec<&Interface> = self.interfaces.values().collect();
        v.sort_by_key(|i| i.order.unwrap_or(usize::MAX));
        v
    }

    /// Get the bring-up order assigned to an interface.
    pub fn order_of(&self, name: &str) -> Option<usize> {
        self.interfaces.get(name).and_then(|i| i.order)
    }

    /// Check if any interface has the given kind.
    pub fn has_kind(&self, kind: InterfaceKind) -> bool {
        self.interfaces.values().any(|i| i.kind == kind)
    }

    /// Render the interfaces, in bring-up order, as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.by_order())?)
    }

    /// Render the interfaces, in bring-up order, as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.by_order())?)
    }

    /// Create default entries for dangling child references and drop loopback.
    pub(crate) fn materialize_references(&mut self) {
        self.interfaces.remove(LOOPBACK);
        let referenced: Vec<String> = self
            .interfaces
            .values()
            .flat_map(|i| i.children.iter())
            .filter(|c| c.as_str() != LOOPBACK && !self.interfaces.contains_key(c.as_str()))
            .cloned()
            .collect();
        for name in referenced {
            tracing::debug!(interface = %name, "creating referenced interface");
            self.entry(&name);
        }
    }

    pub(crate) fn interfaces_mut(&mut self) -> &mut BTreeMap<String, Interface> {
        &mut self.interfaces
    }
}

impl FromIterator<Interface> for InterfaceGraph {
    fn from_iter<T: IntoIterator<Item = Interface>>(iter: T) -> Self {
        let mut graph = Self::new();
        for iface in iter {
            graph.insert(iface);
        }
        graph
    }
}
