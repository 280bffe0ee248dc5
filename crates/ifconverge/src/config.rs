//! Reconciliation settings.
//!
//! Settings are read from a YAML document describing the machine's conduits
//! and the logical networks to realize on them.
//!
//! # Example
//!
//! ```
//! use ifconverge::config::Settings;
//!
//! let settings = Settings::from_yaml(r#"
//! conduits:
//!   intf0:
//!     interfaces: [eth0]
//! networks:
//!   - name: admin
//!     conduit: intf0
//!     address: 192.168.124.10
//!     netmask: 255.255.255.0
//! "#).unwrap();
//!
//! assert_eq!(settings.networks.len(), 1);
//! assert_eq!(settings.management_interface, "bmc");
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;
use crate::platform::Platform;
use crate::topology::{
    self, BuildContext, ConduitResolver, NetworkDefinition, ResolvedConduit, Topology,
};

/// Settle delay used when the settings name none, in seconds.
pub const DEFAULT_START_UP_DELAY: u64 = 30;

/// Interface, and network, never brought up unless the settings name another.
pub const DEFAULT_MANAGEMENT_INTERFACE: &str = "bmc";

/// Machine bonding mode used when the settings name none.
pub const DEFAULT_BOND_MODE: &str = "5";

/// Top-level settings document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Platform family, detected from the host when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub teaming: Teaming,
    /// Seconds to wait for links to settle after a change.
    #[serde(default = "default_start_up_delay")]
    pub start_up_delay: u64,
    /// Interface never brought up; the network of this name is not built.
    #[serde(default = "default_management_interface")]
    pub management_interface: String,
    #[serde(default)]
    pub conduits: BTreeMap<String, ConduitSpec>,
    #[serde(default)]
    pub networks: Vec<NetworkDefinition>,
}

/// Machine-wide bonding settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Teaming {
    #[serde(default = "default_bond_mode", deserialize_with = "bond_mode")]
    pub mode: String,
}

impl Default for Teaming {
    fn default() -> Self {
        Self {
            mode: default_bond_mode(),
        }
    }
}

/// Physical ports backing a conduit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConduitSpec {
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(
        default,
        deserialize_with = "optional_bond_mode",
        skip_serializing_if = "Option::is_none"
    )]
    pub team_mode: Option<String>,
}

fn default_start_up_delay() -> u64 {
    DEFAULT_START_UP_DELAY
}

fn default_management_interface() -> String {
    DEFAULT_MANAGEMENT_INTERFACE.to_string()
}

fn default_bond_mode() -> String {
    DEFAULT_BOND_MODE.to_string()
}

/// Bonding modes are written both as `6` and `"6"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ModeRepr {
    Number(u64),
    Text(String),
}

impl From<ModeRepr> for String {
    fn from(mode: ModeRepr) -> Self {
        match mode {
            ModeRepr::Number(n) => n.to_string(),
            ModeRepr::Text(s) => s,
        }
    }
}

fn bond_mode<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    ModeRepr::deserialize(d).map(String::from)
}

fn optional_bond_mode<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<String>, D::Error> {
    Ok(Option::<ModeRepr>::deserialize(d)?.map(String::from))
}

impl Settings {
    /// Parse settings from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Load settings from a YAML file.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        let settings = Self::from_yaml(&text)?;
        tracing::debug!(
            path = %path.display(),
            conduits = settings.conduits.len(),
            networks = settings.networks.len(),
            "loaded settings"
        );
        Ok(settings)
    }

    /// Settle delay after link changes.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.start_up_delay)
    }

    /// Fresh build context for one topology build.
    pub fn build_context(&self, platform: Platform) -> BuildContext {
        BuildContext::new(platform, self.teaming.mode.clone())
            .management_network(self.management_interface.clone())
    }

    /// Build the desired topology for `platform`.
    ///
    /// The context is returned alongside so callers can read the bonding mode
    /// the build settled on.
    pub fn build_topology(&self, platform: Platform) -> Result<(Topology, BuildContext)> {
        let mut ctx = self.build_context(platform);
        let resolver = StaticConduitMap::new(&self.conduits);
        let topo = topology::build(&self.networks, &resolver, &mut ctx)?;
        Ok((topo, ctx))
    }
}

/// Resolves conduits from a static conduit-to-ports table.
///
/// A single port maps to itself. Several ports map to a bond whose name is
/// allocated from the build context, so the same conduit always yields the
/// same bond within one build.
#[derive(Debug, Clone, Copy)]
pub struct StaticConduitMap<'a> {
    conduits: &'a BTreeMap<String, ConduitSpec>,
}

impl<'a> StaticConduitMap<'a> {
    pub fn new(conduits: &'a BTreeMap<String, ConduitSpec>) -> Self {
        Self { conduits }
    }
}

impl ConduitResolver for StaticConduitMap<'_> {
    fn resolve(&self, conduit: &str, ctx: &mut BuildContext) -> Option<ResolvedConduit> {
        let spec = self.conduits.get(conduit)?;
        match spec.interfaces.as_slice() {
            [] => None,
            [port] => Some(ResolvedConduit {
                interface: port.clone(),
                ports: Vec::new(),
                bond_mode: None,
            }),
            ports => Some(ResolvedConduit {
                interface: ctx.bond_for(conduit),
                ports: ports.to_vec(),
                bond_mode: spec.team_mode.clone(),
            }),
        }
    }
}
