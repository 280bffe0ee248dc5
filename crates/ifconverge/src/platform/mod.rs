//! Operating-system families.
//!
//! Everything that depends on where a host keeps its interface configuration
//! lives here: snapshot parsers, config renderers and stores, bonding option
//! syntax and kernel module requirements. The platform is resolved once at
//! the boundary; the graph, diff and schedule code never branches on it.

pub mod debian;
pub mod redhat;

use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::{Interface, InterfaceGraph, InterfaceKind};

/// Family of the host operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    /// Debian, Ubuntu: `/etc/network/interfaces`.
    #[serde(rename = "debian", alias = "ubuntu")]
    DebianLike,
    /// RHEL, CentOS, Fedora: `/etc/sysconfig/network-scripts/ifcfg-*`.
    #[serde(rename = "redhat", alias = "centos", alias = "rhel")]
    RedHatLike,
}

impl Platform {
    /// Identify the platform from `/etc/os-release` contents.
    ///
    /// `ID` is checked before `ID_LIKE`.
    pub fn from_os_release(contents: &str) -> Option<Self> {
        let mut id = None;
        let mut id_like = None;
        for line in contents.lines() {
            match line.trim().split_once('=') {
                Some(("ID", v)) => id = Some(unquote(v).to_ascii_lowercase()),
                Some(("ID_LIKE", v)) => id_like = Some(unquote(v).to_ascii_lowercase()),
                _ => {}
            }
        }

        id.iter()
            .chain(id_like.iter())
            .flat_map(|ids| ids.split_whitespace())
            .find_map(Self::from_id)
    }

    fn from_id(id: &str) -> Option<Self> {
        match id {
            "debian" | "ubuntu" => Some(Self::DebianLike),
            "rhel" | "centos" | "fedora" | "redhat" | "rocky" | "almalinux" => {
                Some(Self::RedHatLike)
            }
            _ => None,
        }
    }

    /// Detect the platform of the host rooted at `root`.
    pub async fn detect(root: &Path) -> Result<Option<Self>> {
        let contents = tokio::fs::read_to_string(root.join("etc/os-release")).await?;
        Ok(Self::from_os_release(&contents))
    }

    /// Bonding options stored alongside a bond's configuration.
    ///
    /// Debian-like hosts pass the mode to the bonding module instead.
    pub fn bond_opts(&self, mode: &str) -> Option<String> {
        match self {
            Self::DebianLike => None,
            Self::RedHatLike => Some(format!("mode={mode} miimon=100")),
        }
    }

    /// Where the persisted interface configuration lives under `root`.
    pub fn config_path(&self, root: &Path) -> PathBuf {
        match self {
            Self::DebianLike => root.join(debian::INTERFACES_PATH),
            Self::RedHatLike => root.join(redhat::SCRIPTS_DIR),
        }
    }

    /// Read the currently persisted configuration as an unordered graph.
    ///
    /// A host without any persisted configuration yields an empty graph.
    pub async fn snapshot(&self, root: &Path) -> Result<InterfaceGraph> {
        let path = self.config_path(root);
        match self {
            Self::DebianLike => debian::load(&path).await,
            Self::RedHatLike => redhat::load(&path).await,
        }
    }

    /// Config store persisting graphs in this platform's native format.
    pub fn config_store(&self, root: &Path) -> Box<dyn ConfigStore> {
        let path = self.config_path(root);
        match self {
            Self::DebianLike => Box::new(debian::InterfacesFile::new(path)),
            Self::RedHatLike => Box::new(redhat::NetworkScripts::new(path)),
        }
    }

    /// Kernel modules the new graph needs loaded.
    pub fn kernel_modules(
        &self,
        graph: &InterfaceGraph,
        bond_mode: Option<&str>,
    ) -> Vec<KernelModule> {
        let mut modules = Vec::new();
        if graph.has_kind(InterfaceKind::Vlan) {
            modules.push(KernelModule::new("8021q"));
        }
        if let (Self::DebianLike, Some(mode)) = (self, bond_mode)
            && graph.has_kind(InterfaceKind::Bond)
        {
            let mut bonding = KernelModule::new("bonding");
            bonding.params = vec![format!("mode={mode}"), "miimon=100".to_string()];
            modules.push(bonding);
        }
        modules
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DebianLike => f.write_str("debian"),
            Self::RedHatLike => f.write_str("redhat"),
        }
    }
}

/// A kernel module to load before interfaces are touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelModule {
    pub name: String,
    pub params: Vec<String>,
}

impl KernelModule {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: Vec::new(),
        }
    }
}

/// Persists interface configuration in a native format.
#[async_trait]
pub trait ConfigStore: Send {
    /// Write the full set of interfaces, in bring-up order.
    async fn write(&mut self, interfaces: &[&Interface]) -> Result<()>;

    /// Delete the persisted configuration of a single interface, if any.
    ///
    /// Returns false when nothing was deleted, either because no per-interface
    /// configuration exists or because [`write`](Self::write) already dropped it.
    async fn remove(&mut self, name: &str) -> Result<bool>;
}

pub(crate) fn unquote(v: &str) -> &str {
    let v = v.trim();
    v.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| v.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(v)
}

/// Strip a trailing `#` comment and surrounding whitespace.
pub(crate) fn strip_comment(line: &str) -> &str {
    line.split('#').next().unwrap_or("").trim()
}

/// Netmask of an IPv4 prefix length, `None` above 32.
pub(crate) fn netmask_from_prefix(len: u8) -> Option<Ipv4Addr> {
    match len {
        0 => Some(Ipv4Addr::UNSPECIFIED),
        1..=32 => Some(Ipv4Addr::from(u32::MAX << (32 - len))),
        _ => None,
    }
}

/// VLAN id encoded in a `<base>.<id>` interface name.
pub(crate) fn vlan_from_name(name: &str) -> Option<(&str, u16)> {
    let (base, id) = name.split_once('.')?;
    Some((base, id.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ConfigMode;

    #[test]
    fn test_from_os_release() {
        let ubuntu = "NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\n";
        assert_eq!(Platform::from_os_release(ubuntu), Some(Platform::DebianLike));

        let rocky = "NAME=\"Rocky Linux\"\nID=\"rocky\"\nID_LIKE=\"rhel centos fedora\"\n";
        assert_eq!(Platform::from_os_release(rocky), Some(Platform::RedHatLike));

        let derived = "ID=linuxmint\nID_LIKE=\"ubuntu debian\"\n";
        assert_eq!(Platform::from_os_release(derived), Some(Platform::DebianLike));

        assert_eq!(Platform::from_os_release("ID=arch\n"), None);
    }

    #[test]
    fn test_bond_opts() {
        assert_eq!(Platform::DebianLike.bond_opts("5"), None);
        assert_eq!(
            Platform::RedHatLike.bond_opts("5").as_deref(),
            Some("mode=5 miimon=100")
        );
    }

    #[test]
    fn test_kernel_modules() {
        let mut graph = InterfaceGraph::new();
        graph.entry("eth0").config = ConfigMode::Manual;
        assert!(Platform::DebianLike.kernel_modules(&graph, Some("6")).is_empty());

        graph.entry("bond0").kind = InterfaceKind::Bond;
        graph.entry("bond0.10").kind = InterfaceKind::Vlan;

        let modules = Platform::DebianLike.kernel_modules(&graph, Some("6"));
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].name, "8021q");
        assert_eq!(modules[1].name, "bonding");
        assert_eq!(modules[1].params, vec!["mode=6", "miimon=100"]);

        let modules = Platform::RedHatLike.kernel_modules(&graph, Some("6"));
        assert_eq!(modules, vec![KernelModule::new("8021q")]);
    }

    #[test]
    fn test_helpers() {
        assert_eq!(unquote("\"mode=1 miimon=100\""), "mode=1 miimon=100");
        assert_eq!(unquote("'yes'"), "yes");
        assert_eq!(unquote("yes"), "yes");
        assert_eq!(strip_comment("  address 10.0.0.1 # primary"), "address 10.0.0.1");
        assert_eq!(vlan_from_name("bond0.100"), Some(("bond0", 100)));
        assert_eq!(vlan_from_name("eth0"), None);
        assert_eq!(netmask_from_prefix(24), Some(Ipv4Addr::new(255, 255, 255, 0)));
        assert_eq!(netmask_from_prefix(32), Some(Ipv4Addr::BROADCAST));
        assert_eq!(netmask_from_prefix(0), Some(Ipv4Addr::UNSPECIFIED));
        assert_eq!(netmask_from_prefix(33), None);
    }

    #[test]
    fn test_platform_serde_names() {
        let p: Platform = serde_yaml::from_str("ubuntu").unwrap();
        assert_eq!(p, Platform::DebianLike);
        let p: Platform = serde_yaml::from_str("redhat").unwrap();
        assert_eq!(p, Platform::RedHatLike);
        assert_eq!(Platform::RedHatLike.to_string(), "redhat");
    }
}
