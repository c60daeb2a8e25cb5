//! Configuration management for both link roles

use crate::{Error, Result, DEFAULT_BASE_PORT, IO_POLL_INTERVAL};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for every option
pub const ENV_PREFIX: &str = "RIGLINK_";

/// Ports derived from the configured base port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortTriple {
    /// TCP control channel
    pub control: u16,
    /// UDP graph/waterfall stream
    pub graph: u16,
    /// UDP radio sound (host to head) and microphone (head to host)
    pub sound: u16,
}

impl PortTriple {
    pub fn from_base(base: u16) -> Result<Self> {
        let graph = base
            .checked_add(1)
            .ok_or_else(|| Error::Config(format!("base port {} leaves no room for media ports", base)))?;
        let sound = base
            .checked_add(2)
            .ok_or_else(|| Error::Config(format!("base port {} leaves no room for media ports", base)))?;
        Ok(Self {
            control: base,
            graph,
            sound,
        })
    }
}

/// Remote control link configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    /// Host name or IPv4 address of the radio host (head only)
    #[serde(default)]
    pub remote_radio_ip: String,

    /// Shared secret; empty disables authentication and therefore the link
    #[serde(default)]
    pub remote_radio_password: String,

    /// Base port of the port triple
    #[serde(default = "default_base_port")]
    pub remote_ctl_base_port: u16,

    /// Address the host listens on
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Delay between the first CW event of a phrase and its release at the host
    #[serde(default = "default_cw_delay_secs")]
    pub cw_delay_secs: f64,

    /// Idle time after which a key-down starts a new CW phrase
    #[serde(default = "default_cw_phrase_break_secs")]
    pub cw_phrase_break_duration_secs: f64,

    /// Host closes the session after this much heartbeat silence
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: f64,

    /// Band-switch settle time before a held PTT is engaged
    #[serde(default = "default_repeater_settle_ms")]
    pub repeater_settle_ms: u64,

    /// Display width the head reports in its challenge response
    #[serde(default = "default_data_width")]
    pub data_width: u32,

    /// Period of the CW release poll on the host sound thread
    #[serde(default = "default_cw_poll_interval_ms")]
    pub cw_poll_interval_ms: u64,

    /// Period of the socket read/flush pass, independent of the 10 Hz control tick
    #[serde(default = "default_io_poll_interval_ms")]
    pub io_poll_interval_ms: u64,

    /// Band names known to both ends
    #[serde(default = "default_bands")]
    pub bands: Vec<String>,

    /// Hardware readout record heads known to both ends
    #[serde(default = "default_hw_readout_keys")]
    pub hw_readout_keys: Vec<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            remote_radio_ip: String::new(),
            remote_radio_password: String::new(),
            remote_ctl_base_port: default_base_port(),
            listen_address: default_listen_address(),
            cw_delay_secs: default_cw_delay_secs(),
            cw_phrase_break_duration_secs: default_cw_phrase_break_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            repeater_settle_ms: default_repeater_settle_ms(),
            data_width: default_data_width(),
            cw_poll_interval_ms: default_cw_poll_interval_ms(),
            io_poll_interval_ms: default_io_poll_interval_ms(),
            bands: default_bands(),
            hw_readout_keys: default_hw_readout_keys(),
        }
    }
}

impl RemoteConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config: Self = envy::prefixed(ENV_PREFIX)
            .from_env()
            .map_err(|e| Error::Config(format!("Failed to parse environment variables: {}", e)))?;

        config.normalize_lists();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, overridden by `RIGLINK_*` variables
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix("RIGLINK")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("bands")
                    .with_list_parse_key("hw_readout_keys"),
            )
            .build()
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        let mut config: Self = settings
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Invalid configuration in {}: {}", path.display(), e)))?;

        config.normalize_lists();
        config.validate()?;
        Ok(config)
    }

    fn normalize_lists(&mut self) {
        for list in [&mut self.bands, &mut self.hw_readout_keys] {
            *list = list
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        PortTriple::from_base(self.remote_ctl_base_port)?;

        for (name, value) in [
            ("cw_delay_secs", self.cw_delay_secs),
            ("cw_phrase_break_duration_secs", self.cw_phrase_break_duration_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Config(format!("{} must be a non-negative number", name)));
            }
        }

        if !self.heartbeat_timeout_secs.is_finite() || self.heartbeat_timeout_secs <= 0.0 {
            return Err(Error::Config("heartbeat_timeout_secs must be > 0".to_string()));
        }

        for (name, value) in [
            ("cw_poll_interval_ms", self.cw_poll_interval_ms),
            ("io_poll_interval_ms", self.io_poll_interval_ms),
        ] {
            if !(1..=20).contains(&value) {
                return Err(Error::Config(format!("{} must be between 1 and 20", name)));
            }
        }

        self.listen_ip()?;

        for name in self.bands.iter().chain(&self.hw_readout_keys) {
            if name.contains([';', '\n', '\r']) {
                return Err(Error::Config(format!("'{}' contains a reserved character", name)));
            }
        }

        Ok(())
    }

    pub fn ports(&self) -> Result<PortTriple> {
        PortTriple::from_base(self.remote_ctl_base_port)
    }

    pub fn cw_delay(&self) -> Duration {
        Duration::from_secs_f64(self.cw_delay_secs)
    }

    pub fn cw_phrase_break(&self) -> Duration {
        Duration::from_secs_f64(self.cw_phrase_break_duration_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.heartbeat_timeout_secs)
    }

    pub fn repeater_settle(&self) -> Duration {
        Duration::from_millis(self.repeater_settle_ms)
    }

    pub fn cw_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cw_poll_interval_ms)
    }

    pub fn io_poll_interval(&self) -> Duration {
        Duration::from_millis(self.io_poll_interval_ms)
    }

    pub fn listen_ip(&self) -> Result<IpAddr> {
        self.listen_address
            .parse()
            .map_err(|e| Error::Config(format!("Invalid listen_address '{}': {}", self.listen_address, e)))
    }

    /// Resolve the radio host's control address once, preferring IPv4
    pub fn resolve_peer(&self) -> Result<SocketAddr> {
        if self.remote_radio_ip.trim().is_empty() {
            return Err(Error::Config("remote_radio_ip is not set".to_string()));
        }
        let addrs: Vec<SocketAddr> = (self.remote_radio_ip.trim(), self.remote_ctl_base_port)
            .to_socket_addrs()
            .map_err(|e| Error::Config(format!("Cannot resolve '{}': {}", self.remote_radio_ip, e)))?
            .collect();

        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| Error::Config(format!("'{}' resolved to no address", self.remote_radio_ip)))
    }
}

// Default value functions
fn default_base_port() -> u16 {
    DEFAULT_BASE_PORT
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_cw_delay_secs() -> f64 {
    0.020
}

fn default_cw_phrase_break_secs() -> f64 {
    1.0
}

fn default_heartbeat_timeout_secs() -> f64 {
    10.0
}

fn default_repeater_settle_ms() -> u64 {
    250
}

fn default_data_width() -> u32 {
    1200
}

fn default_cw_poll_interval_ms() -> u64 {
    5 // 200 Hz
}

fn default_io_poll_interval_ms() -> u64 {
    IO_POLL_INTERVAL.as_millis() as u64
}

fn default_bands() -> Vec<String> {
    [
        "2200", "630", "160", "80", "60", "40", "30", "20", "17", "15", "12", "10", "6", "4",
        "2", "1.25", "70cm", "33cm", "23cm", "Time", "Audio",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_hw_readout_keys() -> Vec<String> {
    vec!["HL2_TEMP".to_string()]
}
