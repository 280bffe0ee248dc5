//! Arguments shared by commands that look at a host.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, ValueEnum};
use ifconverge::{Platform, Settings};

#[derive(Args)]
pub struct HostArgs {
    /// Settings file describing conduits and networks
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,

    /// Host root directory; every path is resolved below it
    #[arg(long, value_name = "DIR", default_value = "/")]
    pub root: PathBuf,

    /// Platform family, overriding settings and detection
    #[arg(long, value_enum)]
    pub platform: Option<PlatformArg>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum PlatformArg {
    Debian,
    Redhat,
}

impl From<PlatformArg> for Platform {
    fn from(p: PlatformArg) -> Self {
        match p {
            PlatformArg::Debian => Platform::DebianLike,
            PlatformArg::Redhat => Platform::RedHatLike,
        }
    }
}

/// Settings plus the platform they apply to.
pub struct Host {
    pub settings: Settings,
    pub platform: Platform,
}

impl HostArgs {
    /// Load settings and resolve the platform.
    ///
    /// The command line wins over the settings file, which wins over
    /// `/etc/os-release`.
    pub async fn load(&self) -> anyhow::Result<Host> {
        let settings = Settings::load(&self.config)
            .await
            .with_context(|| format!("loading {}", self.config.display()))?;

        let platform = match self.platform.map(Platform::from).or(settings.platform) {
            Some(p) => p,
            None => match Platform::detect(&self.root).await? {
                Some(p) => p,
                None => bail!("cannot determine the platform, pass --platform"),
            },
        };
        tracing::debug!(%platform, root = %self.root.display(), "host");

        Ok(Host { settings, platform })
    }
}
