//! Example command - print an example settings file.

use clap::{Args, ValueEnum};

#[derive(Args)]
pub struct ExampleArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "yaml")]
    pub format: OutputFormat,
}

#[derive(Clone, ValueEnum)]
pub enum OutputFormat {
    Yaml,
    Json,
}

pub fn run(args: ExampleArgs) -> anyhow::Result<()> {
    match args.format {
        OutputFormat::Yaml => println!("{EXAMPLE}"),
        OutputFormat::Json => {
            let value: serde_yaml::Value = serde_yaml::from_str(EXAMPLE)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }
    Ok(())
}

pub const EXAMPLE: &str = r#"# ifconverge settings
#
# Each network is realized on the interface its conduit resolves to.
# A conduit with more than one interface becomes a bond.

# debian or redhat; detected from /etc/os-release when omitted
platform: debian

teaming:
  # machine bonding mode, used when a conduit names none
  mode: 5

# seconds to wait for links to settle after a change
start_up_delay: 30

# never brought up; the network of this name is skipped
management_interface: bmc

conduits:
  intf0:
    interfaces: [eth0, eth1]
    team_mode: 6
  intf1:
    interfaces: [eth2]

networks:
  - name: admin
    conduit: intf0
    address: 192.168.124.10
    netmask: 255.255.255.0
    broadcast: 192.168.124.255
    router: 192.168.124.1
    router_pref: 10

  - name: storage
    conduit: intf0
    use_vlan: true
    vlan: 200
    address: 192.168.125.10
    netmask: 255.255.255.0

  - name: public
    conduit: intf1
    use_vlan: true
    vlan: 300
    add_bridge: true
    address: 192.168.122.10
    netmask: 255.255.255.0
    broadcast: 192.168.122.255
    router: 192.168.122.1
    router_pref: 5
"#;
