//! Process configuration.
//!
//! [`AppConfig`] is assembled once at startup and only read afterwards. Each
//! component receives the slice it needs through
//! [`generator_config`](AppConfig::generator_config) and
//! [`responder_config`](AppConfig::responder_config).

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use taler_echo::{GeneratorConfig, PayloadBounds, ResponderConfig, StreamConfig, TransportMode};
use taler_metrics::DEFAULT_TRAFFIC_MULTIPLIER;
use taler_types::{ConfigError, PeerIdentity, UnknownZonePolicy, ZoneOutcomeTable};

/// A unit of work the process can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Module {
    EchoClient,
    EchoServer,
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Module::EchoClient => write!(f, "echo-client"),
            Module::EchoServer => write!(f, "echo-server"),
        }
    }
}

impl FromStr for Module {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "echo-client" => Ok(Module::EchoClient),
            "echo-server" => Ok(Module::EchoServer),
            other => Err(format!(
                "Unknown module: {} (expected echo-client or echo-server)",
                other
            )),
        }
    }
}

/// Everything the process needs to run.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub modules: Vec<Module>,
    /// This pod's identity, used by both modules.
    pub identity: PeerIdentity,
    /// Zone outcome table. Without one, every zone is unknown.
    pub zone_config: Option<PathBuf>,
    pub unknown_zone_policy: UnknownZonePolicy,
    pub mode: TransportMode,

    /// `host:port` the generator targets.
    pub server_addr: String,
    /// Address the responder listens on.
    pub listen_addr: SocketAddr,

    pub payload: PayloadBounds,
    /// Generator workers; falls back to the zone hint, then 1.
    pub parallelism: Option<usize>,
    /// Per-worker rate; falls back to the zone hint, then 1.
    pub requests_per_second: Option<u32>,
    pub allow_reconnect: bool,
    pub operation_timeout: Duration,
    pub stream: StreamConfig,

    pub traffic_multiplier: u64,
    pub probe_addr: SocketAddr,
    /// Exit with a failure code when stopped by a signal.
    pub fail_on_signal: bool,
    pub shutdown_grace: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
            identity: PeerIdentity::default(),
            zone_config: None,
            unknown_zone_policy: UnknownZonePolicy::default(),
            mode: TransportMode::Http,
            server_addr: "localhost:8080".to_string(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            payload: PayloadBounds::default(),
            parallelism: None,
            requests_per_second: None,
            allow_reconnect: false,
            operation_timeout: Duration::from_secs(20),
            stream: StreamConfig::default(),
            traffic_multiplier: DEFAULT_TRAFFIC_MULTIPLIER,
            probe_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            fail_on_signal: true,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl AppConfig {
    /// Whether `module` was requested.
    pub fn runs(&self, module: Module) -> bool {
        self.modules.contains(&module)
    }

    /// Load and validate the zone table, applying the unknown-zone policy.
    pub fn load_zone_table(&self) -> Result<ZoneOutcomeTable, ConfigError> {
        let table = match &self.zone_config {
            Some(path) => ZoneOutcomeTable::load(path)?,
            None => ZoneOutcomeTable::default(),
        };
        Ok(table.with_policy(self.unknown_zone_policy))
    }

    /// Generator settings. Explicit values win over zone hints.
    pub fn generator_config(&self, table: &ZoneOutcomeTable) -> GeneratorConfig {
        let zone = self.identity.zone.as_str();
        let parallelism = self
            .parallelism
            .unwrap_or_else(|| hint_or(table.parallelism(zone), 1) as usize);
        let requests_per_second = self
            .requests_per_second
            .unwrap_or_else(|| hint_or(table.requests_per_second(zone), 1));

        GeneratorConfig::new(self.server_addr.clone())
            .with_mode(self.mode)
            .with_identity(self.identity.clone())
            .with_payload(self.payload)
            .with_parallelism(parallelism)
            .with_requests_per_second(requests_per_second)
            .with_operation_timeout(self.operation_timeout)
            .with_reconnect(self.allow_reconnect)
            .with_stream(self.stream.clone())
    }

    /// Responder settings.
    pub fn responder_config(&self) -> ResponderConfig {
        ResponderConfig::new(self.listen_addr)
            .with_mode(self.mode)
            .with_identity(self.identity.clone())
            .with_traffic_multiplier(self.traffic_multiplier)
            .with_operation_timeout(self.operation_timeout)
            .with_shutdown_grace(self.shutdown_grace)
    }
}

fn hint_or(hint: u32, default: u32) -> u32 {
    if hint > 0 {
        hint
    } else {
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use taler_types::{OutcomeCode, Zone};

    #[test]
    fn test_module_parse() {
        assert_eq!("echo-client".parse::<Module>(), Ok(Module::EchoClient));
        assert_eq!("ECHO-SERVER".parse::<Module>(), Ok(Module::EchoServer));
        assert!("optimizer".parse::<Module>().is_err());
        assert_eq!(Module::EchoServer.to_string(), "echo-server");
    }

    #[test]
    fn test_zone_hints_fill_unset_values() {
        let mut zone = Zone::default().with_weight(OutcomeCode::Ok, 100);
        zone.requests_per_second = Some(7);
        zone.parallelism = Some(3);
        let table = ZoneOutcomeTable::from_zones([("us-east-1b", zone)]);

        let config = AppConfig {
            identity: PeerIdentity::new("us-east-1b", "client-0"),
            ..AppConfig::default()
        };
        let generator = config.generator_config(&table);
        assert_eq!(generator.requests_per_second, 7);
        assert_eq!(generator.parallelism, 3);

        let explicit = AppConfig {
            parallelism: Some(2),
            requests_per_second: Some(20),
            ..config
        };
        let generator = explicit.generator_config(&table);
        assert_eq!(generator.requests_per_second, 20);
        assert_eq!(generator.parallelism, 2);
    }

    #[test]
    fn test_defaults_without_hints() {
        let config = AppConfig::default();
        let generator = config.generator_config(&ZoneOutcomeTable::default());
        assert_eq!(generator.requests_per_second, 1);
        assert_eq!(generator.parallelism, 1);

        let responder = config.responder_config();
        assert_eq!(responder.traffic_multiplier, 1000);
        assert_eq!(responder.shutdown_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_load_zone_table_applies_policy() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"z1": {{"200": 50, "503": 50}}}}"#).unwrap();

        let config = AppConfig {
            zone_config: Some(file.path().to_path_buf()),
            unknown_zone_policy: UnknownZonePolicy::DefaultSuccess,
            ..AppConfig::default()
        };
        let table = config.load_zone_table().unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.policy(), UnknownZonePolicy::DefaultSuccess);
    }

    #[test]
    fn test_missing_zone_config_is_error() {
        let config = AppConfig {
            zone_config: Some(PathBuf::from("/nonexistent/zones.toml")),
            ..AppConfig::default()
        };
        assert!(matches!(
            config.load_zone_table(),
            Err(ConfigError::Read { .. })
        ));
    }
}
