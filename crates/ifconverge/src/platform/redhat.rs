//! RedHat-style `/etc/sysconfig/network-scripts/ifcfg-<name>` files.

use std::fmt::Write as _;
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{ConfigStore, netmask_from_prefix, strip_comment, unquote, vlan_from_name};
use crate::error::{Error, Result};
use crate::graph::{ConfigMode, Interface, InterfaceGraph, InterfaceKind, LOOPBACK};

/// Location of the network scripts directory, relative to the host root.
pub const SCRIPTS_DIR: &str = "etc/sysconfig/network-scripts";

const PREFIX: &str = "ifcfg-";

/// Load every `ifcfg-*` file in `dir`, or an empty graph if it does not exist.
pub async fn load(dir: &Path) -> Result<InterfaceGraph> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %dir.display(), "no network scripts directory");
            return Ok(InterfaceGraph::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if file_name.starts_with(PREFIX) {
            files.push(file_name);
        }
    }
    files.sort();

    let mut graph = InterfaceGraph::new();
    for file_name in files {
        let path = dir.join(&file_name);
        let contents = tokio::fs::read_to_string(&path).await?;
        parse_file(&mut graph, &file_name, &contents, &path)?;
    }
    Ok(graph)
}

/// Parse one `ifcfg-<name>` file into `graph`.
///
/// Files must be fed in name order for results to be deterministic.
pub fn parse_file(
    graph: &mut InterfaceGraph,
    file_name: &str,
    contents: &str,
    path: &Path,
) -> Result<()> {
    let Some(name) = file_name.strip_prefix(PREFIX) else {
        return Ok(());
    };
    if name == LOOPBACK || name.is_empty() {
        return Ok(());
    }
    graph.entry(name);

    for (idx, line) in contents.lines().enumerate() {
        let lineno = idx + 1;
        let line = strip_comment(line);
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(Error::parse(path, lineno, "expected KEY=VALUE"));
        };
        let value = unquote(value);
        apply_key(graph, name, key.trim(), value)
            .map_err(|message| Error::parse(path, lineno, message))?;
    }

    let iface = graph.entry(name);
    if iface.config == ConfigMode::None {
        iface.config = if iface.address.is_some() {
            ConfigMode::Static
        } else {
            ConfigMode::Manual
        };
    }
    Ok(())
}

fn apply_key(
    graph: &mut InterfaceGraph,
    name: &str,
    key: &str,
    value: &str,
) -> std::result::Result<(), String> {
    match key {
        "ONBOOT" => graph.entry(name).auto = value.eq_ignore_ascii_case("yes"),
        "BOOTPROTO" => {
            graph.entry(name).config = match value.to_ascii_lowercase().as_str() {
                "bootp" => ConfigMode::Dhcp,
                other => ConfigMode::parse(other).unwrap_or_else(|| {
                    // Resolved from the address once the whole file is read.
                    tracing::warn!(interface = name, bootproto = value, "unsupported BOOTPROTO");
                    ConfigMode::None
                }),
            }
        }
        "IPADDR" => graph.entry(name).address = Some(ipv4(key, value)?),
        "NETMASK" => graph.entry(name).netmask = Some(ipv4(key, value)?),
        "PREFIX" => {
            let netmask = value
                .parse()
                .ok()
                .and_then(netmask_from_prefix)
                .ok_or(format!("invalid {key} {value}"))?;
            graph.entry(name).netmask = Some(netmask);
        }
        "BROADCAST" => graph.entry(name).broadcast = Some(ipv4(key, value)?),
        "GATEWAY" => graph.entry(name).gateway = Some(ipv4(key, value)?),
        "BONDING_OPTS" => graph.entry(name).bond_opts = Some(value.to_string()),
        "MASTER" => {
            graph.entry(name).master = Some(value.to_string());
            let bond = graph.entry(value);
            bond.kind = InterfaceKind::Bond;
            push_child(bond, name);
        }
        "SLAVE" => graph.entry(name).slave = value.eq_ignore_ascii_case("yes"),
        "BRIDGE" => {
            graph.entry(name).bridge = Some(value.to_string());
            let bridge = graph.entry(value);
            bridge.kind = InterfaceKind::Bridge;
            push_child(bridge, name);
        }
        "VLAN" if value.eq_ignore_ascii_case("yes") => {
            let (base, id) =
                vlan_from_name(name).ok_or(format!("{name} is not a <device>.<id> name"))?;
            let vlan = graph.entry(name);
            vlan.kind = InterfaceKind::Vlan;
            vlan.vlan = Some(id);
            vlan.children = vec![base.to_string()];
        }
        "TYPE" => match value {
            "Bond" => graph.entry(name).kind = InterfaceKind::Bond,
            "Bridge" => graph.entry(name).kind = InterfaceKind::Bridge,
            _ => {}
        },
        _ => tracing::trace!(interface = name, key, "ignoring key"),
    }
    Ok(())
}

fn push_child(parent: &mut Interface, child: &str) {
    if !parent.children.iter().any(|c| c == child) {
        parent.children.push(child.to_string());
    }
}

fn ipv4(key: &str, value: &str) -> std::result::Result<Ipv4Addr, String> {
    value.parse().map_err(|_| format!("invalid {key} {value}"))
}

/// Render one interface as the contents of its `ifcfg-<name>` file.
pub fn render(iface: &Interface) -> String {
    let mut out =
        String::from("# This file is managed by ifconverge. Local changes will be overwritten.\n");
    let _ = writeln!(out, "DEVICE={}", iface.name);
    let _ = writeln!(out, "ONBOOT={}", if iface.auto { "yes" } else { "no" });
    let bootproto = match iface.config {
        ConfigMode::Dhcp => "dhcp",
        ConfigMode::Static => "static",
        ConfigMode::Manual | ConfigMode::None => "none",
    };
    let _ = writeln!(out, "BOOTPROTO={bootproto}");

    let params = [
        ("IPADDR", iface.address),
        ("NETMASK", iface.netmask),
        ("BROADCAST", iface.broadcast),
        ("GATEWAY", iface.gateway),
    ];
    for (key, value) in params {
        if let Some(value) = value {
            let _ = writeln!(out, "{key}={value}");
        }
    }

    match iface.kind {
        InterfaceKind::Bond => out.push_str("TYPE=Bond\n"),
        InterfaceKind::Bridge => out.push_str("TYPE=Bridge\n"),
        InterfaceKind::Vlan => out.push_str("VLAN=yes\n"),
        InterfaceKind::Physical => {}
    }
    if let Some(opts) = iface.bond_opts.as_deref().filter(|o| !o.is_empty()) {
        let _ = writeln!(out, "BONDING_OPTS=\"{opts}\"");
    }
    if let Some(master) = &iface.master {
        let _ = writeln!(out, "MASTER={master}");
    }
    if iface.slave {
        out.push_str("SLAVE=yes\n");
    }
    if let Some(bridge) = &iface.bridge {
        let _ = writeln!(out, "BRIDGE={bridge}");
    }
    out
}

/// The network scripts directory as a [`ConfigStore`].
#[derive(Debug, Clone)]
pub struct NetworkScripts {
    dir: PathBuf,
}

impl NetworkScripts {
    /// Create a store writing into `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{PREFIX}{name}"))
    }
}

#[async_trait]
impl ConfigStore for NetworkScripts {
    async fn write(&mut self, interfaces: &[&Interface]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        for iface in interfaces {
            tokio::fs::write(self.path_of(&iface.name), render(iface)).await?;
        }
        tracing::info!(
            path = %self.dir.display(),
            count = interfaces.len(),
            "wrote network scripts"
        );
        Ok(())
    }

    async fn remove(&mut self, name: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.path_of(name)).await {
            Ok(()) => {
                tracing::info!(interface = name, "removed network script");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::order;

    fn parse_all(files: &[(&str, &str)]) -> InterfaceGraph {
        let mut graph = InterfaceGraph::new();
        let mut files = files.to_vec();
        files.sort();
        for (name, contents) in files {
            parse_file(&mut graph, name, contents, Path::new(name)).unwrap();
        }
        graph
    }

    #[test]
    fn test_parse_bond_and_bridge() {
        let graph = parse_all(&[
            ("ifcfg-lo", "DEVICE=lo\nIPADDR=127.0.0.1\n"),
            ("ifcfg-eth0", "DEVICE=eth0\nONBOOT=yes\nBOOTPROTO=dhcp\n"),
            ("ifcfg-eth1", "DEVICE=eth1\nONBOOT=yes\nMASTER=bond0\nSLAVE=yes\n"),
            ("ifcfg-eth2", "DEVICE=eth2\nONBOOT=yes\nMASTER=bond0\nSLAVE=yes\n"),
            (
                "ifcfg-bond0",
                "DEVICE=bond0\nONBOOT=yes\nBOOTPROTO=none\nBONDING_OPTS=\"mode=5 miimon=100\"\n",
            ),
            ("ifcfg-bond0.300", "DEVICE=bond0.300\nVLAN=yes\nBRIDGE=br300\n"),
            (
                "ifcfg-br300",
                "# public\nDEVICE=br300\nTYPE=Bridge\nONBOOT=yes\nBOOTPROTO=none\nIPADDR=192.168.122.10\nNETMASK=255.255.255.0\n",
            ),
        ]);

        assert!(!graph.contains("lo"));
        assert_eq!(graph.len(), 6);
        assert_eq!(graph.get("eth0").unwrap().config, ConfigMode::Dhcp);

        let bond = graph.get("bond0").unwrap();
        assert_eq!(bond.kind, InterfaceKind::Bond);
        assert_eq!(bond.children, vec!["eth1", "eth2"]);
        assert_eq!(bond.config, ConfigMode::Manual);
        assert_eq!(bond.bond_opts.as_deref(), Some("mode=5 miimon=100"));

        let vlan = graph.get("bond0.300").unwrap();
        assert_eq!(vlan.kind, InterfaceKind::Vlan);
        assert_eq!(vlan.children, vec!["bond0"]);
        assert!(!vlan.auto);

        let br = graph.get("br300").unwrap();
        assert_eq!(br.kind, InterfaceKind::Bridge);
        assert_eq!(br.children, vec!["bond0.300"]);
        // BOOTPROTO=none with an address means static.
        assert_eq!(br.config, ConfigMode::Static);
    }

    #[test]
    fn test_parse_errors() {
        let mut graph = InterfaceGraph::new();
        let contents = "ONBOOT=yes\nIPADDR=10.0.0\n";
        let err = parse_file(&mut graph, "ifcfg-eth0", contents, Path::new("f")).unwrap_err();
        assert_eq!(err.to_string(), "f:2: invalid IPADDR 10.0.0");

        let err = parse_file(&mut graph, "ifcfg-eth0", "garbage\n", Path::new("f")).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 1, .. }));

        let err = parse_file(&mut graph, "ifcfg-eth0", "PREFIX=40\n", Path::new("f")).unwrap_err();
        assert_eq!(err.to_string(), "f:1: invalid PREFIX 40");
    }

    #[test]
    fn test_unknown_bootproto() {
        let graph = parse_all(&[
            ("ifcfg-ib0", "DEVICE=ib0\nONBOOT=yes\nBOOTPROTO=ibft\n"),
            (
                "ifcfg-eth0",
                "DEVICE=eth0\nONBOOT=yes\nBOOTPROTO=ibft\nIPADDR=10.0.0.5\nPREFIX=24\n",
            ),
        ]);
        assert_eq!(graph.get("ib0").unwrap().config, ConfigMode::Manual);

        let eth0 = graph.get("eth0").unwrap();
        assert_eq!(eth0.config, ConfigMode::Static);
        assert_eq!(eth0.netmask, Some(Ipv4Addr::new(255, 255, 255, 0)));
    }

    #[test]
    fn test_render() {
        let mut bond = Interface::new("bond0");
        bond.kind = InterfaceKind::Bond;
        bond.auto = true;
        bond.config = ConfigMode::Manual;
        bond.bond_opts = Some("mode=6 miimon=100".into());
        let text = render(&bond);
        assert!(text.contains("DEVICE=bond0\nONBOOT=yes\nBOOTPROTO=none\n"));
        assert!(text.contains("TYPE=Bond\n"));
        assert!(text.contains("BONDING_OPTS=\"mode=6 miimon=100\"\n"));
    }

    #[tokio::test]
    async fn test_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let scripts = dir.path().join(SCRIPTS_DIR);
        assert!(load(&scripts).await.unwrap().is_empty());

        let mut graph = parse_all(&[
            ("ifcfg-eth1", "ONBOOT=yes\nBOOTPROTO=none\nMASTER=bond0\nSLAVE=yes\n"),
            ("ifcfg-eth2", "ONBOOT=yes\nBOOTPROTO=none\nMASTER=bond0\nSLAVE=yes\n"),
            ("ifcfg-bond0", "ONBOOT=yes\nBOOTPROTO=none\nBONDING_OPTS=\"mode=5 miimon=100\"\n"),
            ("ifcfg-bond0.300", "VLAN=yes\nONBOOT=yes\nBOOTPROTO=static\nIPADDR=10.3.0.2\n"),
        ]);
        order(&mut graph).unwrap();

        let mut store = NetworkScripts::new(&scripts);
        store.write(&graph.by_order()).await.unwrap();
        let mut loaded = load(&scripts).await.unwrap();
        order(&mut loaded).unwrap();
        assert_eq!(loaded, graph);

        assert!(store.remove("bond0.300").await.unwrap());
        assert!(!store.remove("bond0.300").await.unwrap());
        assert!(!scripts.join("ifcfg-bond0.300").exists());
        assert!(scripts.join("ifcfg-bond0").exists());
    }
}
