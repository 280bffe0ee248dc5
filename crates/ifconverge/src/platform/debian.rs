//! Debian-style `/etc/network/interfaces`.

use std::fmt::Write as _;
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{ConfigStore, netmask_from_prefix, strip_comment, vlan_from_name};
use crate::error::{Error, Result};
use crate::graph::{ConfigMode, Interface, InterfaceGraph, InterfaceKind, LOOPBACK};

/// Location of the interfaces file, relative to the host root.
pub const INTERFACES_PATH: &str = "etc/network/interfaces";

/// Load the interfaces file, or an empty graph if it does not exist.
pub async fn load(path: &Path) -> Result<InterfaceGraph> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => parse(&contents, path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no interfaces file");
            Ok(InterfaceGraph::new())
        }
        Err(e) => Err(e.into()),
    }
}

/// Parse interfaces-file contents into an unordered graph.
///
/// `path` is only used for error locations.
pub fn parse(contents: &str, path: &Path) -> Result<InterfaceGraph> {
    let mut graph = InterfaceGraph::new();
    // Stanza the option lines belong to; `None` inside the loopback stanza.
    let mut current: Option<String> = None;

    for (idx, line) in contents.lines().enumerate() {
        let lineno = idx + 1;
        let line = strip_comment(line);
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();

        match parts[0] {
            "auto" | "allow-hotplug" => {
                for name in parts[1..].iter().filter(|n| **n != LOOPBACK) {
                    graph.entry(name).auto = true;
                }
            }
            "iface" => {
                let [_, name, family, method, ..] = parts[..] else {
                    return Err(Error::parse(
                        path,
                        lineno,
                        "iface needs a name, family and method",
                    ));
                };
                // Only IPv4 stanzas are modelled; options of others are skipped.
                if name == LOOPBACK || family != "inet" {
                    tracing::debug!(interface = name, family, "skipping stanza");
                    current = None;
                    continue;
                }
                let config = ConfigMode::parse(method).unwrap_or_else(|| {
                    tracing::warn!(
                        path = %path.display(),
                        line = lineno,
                        interface = name,
                        method,
                        "unsupported method, treating as manual"
                    );
                    ConfigMode::Manual
                });
                let iface = graph.entry(name);
                iface.children.clear();
                iface.config = config;
                current = Some(name.to_string());
            }
            key => {
                let Some(name) = current.as_deref() else {
                    continue;
                };
                apply_option(&mut graph, name, key, &parts[1..])
                    .map_err(|message| Error::parse(path, lineno, message))?;
            }
        }
    }

    Ok(graph)
}

fn apply_option(
    graph: &mut InterfaceGraph,
    name: &str,
    key: &str,
    args: &[&str],
) -> std::result::Result<(), String> {
    match key {
        "address" => {
            let value = args.first().ok_or(format!("{key} needs a value"))?;
            let (address, netmask) = cidr(value)?;
            let iface = graph.entry(name);
            iface.address = Some(address);
            if netmask.is_some() {
                iface.netmask = netmask;
            }
        }
        "netmask" => graph.entry(name).netmask = Some(ipv4(key, args)?),
        "broadcast" => graph.entry(name).broadcast = Some(ipv4(key, args)?),
        "gateway" => graph.entry(name).gateway = Some(ipv4(key, args)?),
        "bridge_ports" => {
            let ports: Vec<String> = args
                .iter()
                .filter(|p| **p != "none")
                .map(|p| p.to_string())
                .collect();
            for port in &ports {
                graph.entry(port).bridge = Some(name.to_string());
            }
            let bridge = graph.entry(name);
            bridge.kind = InterfaceKind::Bridge;
            bridge.children = ports;
        }
        "vlan_raw_device" => {
            let raw = args.first().ok_or("vlan_raw_device needs a device")?;
            let (_, id) =
                vlan_from_name(name).ok_or(format!("{name} is not a <device>.<id> name"))?;
            let vlan = graph.entry(name);
            vlan.kind = InterfaceKind::Vlan;
            vlan.vlan = Some(id);
            vlan.children = vec![raw.to_string()];
        }
        // down ifenslave -d <bond> <slaves...>
        "down" if args.first() == Some(&"ifenslave") => {
            let slaves: Vec<String> = args.iter().skip(3).map(|s| s.to_string()).collect();
            for slave in &slaves {
                let port = graph.entry(slave);
                port.master = Some(name.to_string());
                port.slave = true;
            }
            let bond = graph.entry(name);
            bond.kind = InterfaceKind::Bond;
            bond.children = slaves;
        }
        _ => tracing::trace!(interface = name, key, "ignoring option"),
    }
    Ok(())
}

fn ipv4(key: &str, args: &[&str]) -> std::result::Result<Ipv4Addr, String> {
    let value = args.first().ok_or(format!("{key} needs a value"))?;
    value
        .parse()
        .map_err(|_| format!("invalid {key} {value}"))
}

/// Parse `a.b.c.d` or `a.b.c.d/len`, deriving the netmask from the prefix.
fn cidr(value: &str) -> std::result::Result<(Ipv4Addr, Option<Ipv4Addr>), String> {
    let invalid = || format!("invalid address {value}");
    match value.split_once('/') {
        None => Ok((value.parse().map_err(|_| invalid())?, None)),
        Some((address, len)) => {
            let address = address.parse().map_err(|_| invalid())?;
            let netmask = len
                .parse()
                .ok()
                .and_then(netmask_from_prefix)
                .ok_or_else(invalid)?;
            Ok((address, Some(netmask)))
        }
    }
}

/// Render interfaces, in bring-up order, as an interfaces file.
pub fn render(interfaces: &[&Interface]) -> String {
    let mut out = String::from(
        "# This file is managed by ifconverge. Local changes will be overwritten.\n\n\
         auto lo\niface lo inet loopback\n",
    );

    for iface in interfaces {
        out.push('\n');
        if iface.auto {
            let _ = writeln!(out, "auto {}", iface.name);
        }
        let method = match iface.config {
            ConfigMode::None => ConfigMode::Manual,
            other => other,
        };
        let _ = writeln!(out, "iface {} inet {}", iface.name, method);

        let params = [
            ("address", iface.address),
            ("netmask", iface.netmask),
            ("broadcast", iface.broadcast),
            ("gateway", iface.gateway),
        ];
        for (key, value) in params {
            if let Some(value) = value {
                let _ = writeln!(out, "    {key} {value}");
            }
        }

        let children = iface.children.join(" ");
        match iface.kind {
            InterfaceKind::Physical => {}
            InterfaceKind::Bridge => {
                let ports = if children.is_empty() { "none" } else { children.as_str() };
                let _ = writeln!(out, "    bridge_ports {ports}");
            }
            InterfaceKind::Vlan => {
                if let Some(raw) = iface.children.first() {
                    let _ = writeln!(out, "    vlan_raw_device {raw}");
                }
            }
            InterfaceKind::Bond => {
                let _ = writeln!(out, "    up ifenslave {} {children}", iface.name);
                let _ = writeln!(out, "    down ifenslave -d {} {children}", iface.name);
            }
        }
    }

    out
}

/// The interfaces file as a [`ConfigStore`].
///
/// The whole file is rewritten on every write, so removal never has anything
/// left to delete.
#[derive(Debug, Clone)]
pub struct InterfacesFile {
    path: PathBuf,
}

impl InterfacesFile {
    /// Create a store writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigStore for InterfacesFile {
    async fn write(&mut self, interfaces: &[&Interface]) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&self.path, render(interfaces)).await?;
        tracing::info!(
            path = %self.path.display(),
            count = interfaces.len(),
            "wrote interfaces file"
        );
        Ok(())
    }

    async fn remove(&mut self, _name: &str) -> Result<bool> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{Transition, diff};
    use crate::graph::order;

    const SAMPLE: &str = r#"
# The loopback network interface
auto lo
iface lo inet loopback
    address 127.0.0.1

auto eth0
iface eth0 inet dhcp

auto eth1 eth2
iface eth1 inet manual
iface eth2 inet manual

auto bond0
iface bond0 inet manual
    up ifenslave bond0 eth1 eth2
    down ifenslave -d bond0 eth1 eth2

auto bond0.300
iface bond0.300 inet manual
    vlan_raw_device bond0

auto br300
iface br300 inet static
    address 192.168.122.10   # public
    netmask 255.255.255.0
    broadcast 192.168.122.255
    gateway 192.168.122.1
    bridge_ports bond0.300
"#;

    fn parse_sample() -> InterfaceGraph {
        parse(SAMPLE, Path::new("interfaces")).unwrap()
    }

    #[test]
    fn test_parse_sample() {
        let graph = parse_sample();
        assert!(!graph.contains("lo"));
        assert_eq!(graph.len(), 6);

        let eth0 = graph.get("eth0").unwrap();
        assert_eq!(eth0.config, ConfigMode::Dhcp);
        assert!(eth0.auto);

        let bond = graph.get("bond0").unwrap();
        assert_eq!(bond.kind, InterfaceKind::Bond);
        assert_eq!(bond.children, vec!["eth1", "eth2"]);
        let eth1 = graph.get("eth1").unwrap();
        assert!(eth1.slave);
        assert_eq!(eth1.master.as_deref(), Some("bond0"));

        let vlan = graph.get("bond0.300").unwrap();
        assert_eq!(vlan.kind, InterfaceKind::Vlan);
        assert_eq!(vlan.vlan, Some(300));
        assert_eq!(vlan.children, vec!["bond0"]);
        assert_eq!(vlan.bridge.as_deref(), Some("br300"));

        let br = graph.get("br300").unwrap();
        assert_eq!(br.kind, InterfaceKind::Bridge);
        assert_eq!(br.config, ConfigMode::Static);
        assert_eq!(br.address, Some(Ipv4Addr::new(192, 168, 122, 10)));
        assert_eq!(br.gateway, Some(Ipv4Addr::new(192, 168, 122, 1)));
    }

    #[test]
    fn test_bridge_ports_before_stanza() {
        let contents = "iface br0 inet manual\n    bridge_ports eth3\n";
        let graph = parse(contents, Path::new("interfaces")).unwrap();
        let eth3 = graph.get("eth3").unwrap();
        assert_eq!(eth3.bridge.as_deref(), Some("br0"));
        assert_eq!(eth3.config, ConfigMode::None);
    }

    #[test]
    fn test_parse_errors_carry_line() {
        let contents = "iface eth0 inet static\n    address 10.0.0.300\n";
        let err = parse(contents, Path::new("x")).unwrap_err();
        assert_eq!(err.to_string(), "x:2: invalid address 10.0.0.300");

        let err = parse("iface eth0 inet\n", Path::new("x")).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 1, .. }));

        let err = parse("iface eth0 inet static\n    address 10.0.0.5/33\n", Path::new("x"))
            .unwrap_err();
        assert_eq!(err.to_string(), "x:2: invalid address 10.0.0.5/33");
    }

    #[test]
    fn test_ipv6_stanzas_skipped() {
        let contents = "\
auto eth0
iface eth0 inet dhcp
iface eth0 inet6 auto

auto eth1
iface eth1 inet static
    address 10.0.1.5
    netmask 255.255.255.0
iface eth1 inet6 static
    address 2001:db8::5
    netmask 64
";
        let graph = parse(contents, Path::new("interfaces")).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.get("eth0").unwrap().config, ConfigMode::Dhcp);

        let eth1 = graph.get("eth1").unwrap();
        assert_eq!(eth1.config, ConfigMode::Static);
        assert_eq!(eth1.address, Some(Ipv4Addr::new(10, 0, 1, 5)));
        assert_eq!(eth1.netmask, Some(Ipv4Addr::new(255, 255, 255, 0)));
    }

    #[test]
    fn test_cidr_address() {
        let contents = "auto eth0\niface eth0 inet static\n    address 10.0.0.5/24\n";
        let graph = parse(contents, Path::new("interfaces")).unwrap();
        let eth0 = graph.get("eth0").unwrap();
        assert_eq!(eth0.address, Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(eth0.netmask, Some(Ipv4Addr::new(255, 255, 255, 0)));

        // An explicit netmask after the address wins.
        let contents =
            "iface eth0 inet static\n    address 10.0.0.5/16\n    netmask 255.255.255.0\n";
        let graph = parse(contents, Path::new("interfaces")).unwrap();
        assert_eq!(
            graph.get("eth0").unwrap().netmask,
            Some(Ipv4Addr::new(255, 255, 255, 0))
        );
    }

    #[test]
    fn test_unknown_method_is_manual() {
        let graph = parse("auto ppp0\niface ppp0 inet ppp\n", Path::new("x")).unwrap();
        let ppp0 = graph.get("ppp0").unwrap();
        assert_eq!(ppp0.config, ConfigMode::Manual);
        assert!(ppp0.auto);
    }

    #[test]
    fn test_render_reparses_unchanged() {
        let mut graph = parse_sample();
        order(&mut graph).unwrap();

        let text = render(&graph.by_order());
        assert!(text.starts_with("# This file is managed by ifconverge"));
        assert!(text.contains("auto lo\niface lo inet loopback\n"));

        let mut reparsed = parse(&text, Path::new("interfaces")).unwrap();
        order(&mut reparsed).unwrap();
        let d = diff(&graph, &reparsed);
        assert!(d.iter().all(|(_, t)| t == Transition::Unchanged), "{}", d.summary());
        assert_eq!(graph, reparsed);
    }

    #[tokio::test]
    async fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INTERFACES_PATH);

        assert!(load(&path).await.unwrap().is_empty());

        let mut graph = parse_sample();
        order(&mut graph).unwrap();
        let mut store = InterfacesFile::new(&path);
        store.write(&graph.by_order()).await.unwrap();
        assert!(!store.remove("eth0").await.unwrap());

        let loaded = load(&path).await.unwrap();
        assert_eq!(loaded.len(), graph.len());
        assert_eq!(loaded.get("br300").unwrap().config, ConfigMode::Static);
    }
}
