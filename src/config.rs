use std::path::Path;
use std::time::Duration;

use facet::Facet;

use crate::address::WaitPolicy;
use crate::domain_xml::TemplateId;
use crate::error::VmError;
use crate::hypervisor::AddressSource;
use crate::paths;
use crate::remote::{Credentials, HostKeyPolicy, SessionConfig};

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct Config {
    #[facet(default)]
    pub libvirt: LibvirtConfig,
    #[facet(default)]
    pub template: TemplateConfig,
    #[facet(default)]
    pub address: AddressConfig,
    #[facet(default)]
    pub ssh: SshConfig,
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct LibvirtConfig {
    #[facet(default = "qemu:///system")]
    pub uri: String,
    /// `lease`, `agent` or `arp`.
    #[facet(default = "lease")]
    pub address_source: String,
}

impl Default for LibvirtConfig {
    fn default() -> Self {
        Self {
            uri: "qemu:///system".into(),
            address_source: "lease".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct TemplateConfig {
    /// Domain XML template. The built-in template is used when empty.
    #[facet(default)]
    pub path: String,
}

/// Upper bound for `address.timeout_s` and `ip --timeout`, one day.
pub const MAX_ADDRESS_TIMEOUT_S: u64 = 86_400;

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct AddressConfig {
    #[facet(default = 120)]
    pub timeout_s: u64,
    #[facet(default = 500)]
    pub initial_backoff_ms: u64,
    #[facet(default = 8000)]
    pub max_backoff_ms: u64,
    #[facet(default = true)]
    pub retry_no_address: bool,
}

impl Default for AddressConfig {
    fn default() -> Self {
        Self {
            timeout_s: 120,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
            retry_no_address: true,
        }
    }
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct SshConfig {
    #[facet(default = "ubuntu")]
    pub user: String,
    /// Defaults to `~/.ssh/id_ed25519` when empty.
    #[facet(default)]
    pub private_key: String,
    #[facet(default = 22)]
    pub port: u16,
    #[facet(default = 10)]
    pub connect_timeout_s: u64,
    /// Pinned host key: `SHA256:...` fingerprint or OpenSSH public key.
    #[facet(default)]
    pub host_key: String,
    #[facet(default)]
    pub known_hosts: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "ubuntu".into(),
            private_key: String::new(),
            port: 22,
            connect_timeout_s: 10,
            host_key: String::new(),
            known_hosts: String::new(),
        }
    }
}

impl Config {
    pub fn address_source(&self) -> AddressSource {
        AddressSource::parse(&self.libvirt.address_source).unwrap_or_default()
    }

    pub fn template(&self) -> TemplateId {
        if self.template.path.is_empty() {
            TemplateId::Builtin
        } else {
            TemplateId::File(paths::expand_tilde(&self.template.path))
        }
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            timeout: Duration::from_secs(self.address.timeout_s),
            initial_backoff: Duration::from_millis(self.address.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.address.max_backoff_ms),
            retry_no_address: self.address.retry_no_address,
        }
    }

    /// A pinned `host_key` wins over `known_hosts`. Having neither is an
    /// error; host keys are never accepted blindly.
    pub fn host_key_policy(&self) -> Result<HostKeyPolicy, VmError> {
        if !self.ssh.host_key.is_empty() {
            return HostKeyPolicy::parse(&self.ssh.host_key);
        }
        if !self.ssh.known_hosts.is_empty() {
            return Ok(HostKeyPolicy::KnownHosts(paths::expand_tilde(
                &self.ssh.known_hosts,
            )));
        }
        Err(VmError::Validation {
            message: "no host key policy configured: set ssh.host_key or ssh.known_hosts, or pass --host-key".into(),
        })
    }

    pub fn session_config(&self) -> Result<SessionConfig, VmError> {
        let key_path = if self.ssh.private_key.is_empty() {
            paths::default_private_key()
        } else {
            paths::expand_tilde(&self.ssh.private_key)
        };
        let mut session = SessionConfig::new(
            self.ssh.user.clone(),
            Credentials::key_file(key_path),
            self.host_key_policy()?,
        );
        session.port = self.ssh.port;
        session.connect_timeout = Duration::from_secs(self.ssh.connect_timeout_s);
        Ok(session)
    }
}

fn validate_config(config: &Config) -> Result<(), VmError> {
    if config.libvirt.uri.trim().is_empty() {
        return Err(VmError::Validation {
            message: "libvirt.uri must not be empty".into(),
        });
    }
    if AddressSource::parse(&config.libvirt.address_source).is_none() {
        return Err(VmError::Validation {
            message: format!(
                "libvirt.address_source must be lease, agent or arp (got '{}')",
                config.libvirt.address_source
            ),
        });
    }

    let address = &config.address;
    if !(1..=MAX_ADDRESS_TIMEOUT_S).contains(&address.timeout_s) {
        return Err(VmError::Validation {
            message: format!(
                "address.timeout_s must be between 1 and {MAX_ADDRESS_TIMEOUT_S} (got {})",
                address.timeout_s
            ),
        });
    }
    if address.initial_backoff_ms < 1 {
        return Err(VmError::Validation {
            message: "address.initial_backoff_ms must be at least 1".into(),
        });
    }
    if address.max_backoff_ms < address.initial_backoff_ms {
        return Err(VmError::Validation {
            message: "address.max_backoff_ms must not be below address.initial_backoff_ms".into(),
        });
    }

    if config.ssh.user.is_empty() {
        return Err(VmError::Validation {
            message: "ssh.user must not be empty".into(),
        });
    }
    if config.ssh.port == 0 {
        return Err(VmError::Validation {
            message: "ssh.port must not be 0".into(),
        });
    }
    if config.ssh.connect_timeout_s < 1 {
        return Err(VmError::Validation {
            message: "ssh.connect_timeout_s must be at least 1".into(),
        });
    }
    if !config.ssh.host_key.is_empty() {
        HostKeyPolicy::parse(&config.ssh.host_key)?;
    }

    Ok(())
}

pub fn parse_config(contents: &str, path: &Path) -> Result<Config, VmError> {
    let config: Config = facet_toml::from_str(contents).map_err(|e| VmError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    validate_config(&config)?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config, VmError> {
    let contents = std::fs::read_to_string(path).map_err(|source| VmError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&contents, path)
}

/// Load the config named on the command line, else the user config file if
/// it exists, else built-in defaults.
pub fn load(explicit: Option<&Path>) -> Result<Config, VmError> {
    if let Some(path) = explicit {
        return load_config(path);
    }
    match paths::default_config_path() {
        Some(path) if path.exists() => {
            tracing::debug!(path = %path.display(), "using user config");
            load_config(&path)
        }
        _ => Ok(Config::default()),
    }
}
