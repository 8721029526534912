//! Service configuration
//!
//! Loaded from YAML, TOML or JSON with `MONSRV_` environment overrides
//! (`MONSRV_DEVICE__NAME=inv2`, `MONSRV_CYCLE_SECONDS=30`), then validated
//! once at startup. Validation failures are the only fatal errors of the
//! service.

use std::path::Path;
use std::time::Duration;

use common::LogConfig;
use serde::{Deserialize, Serialize};
use solar_codec::ProtocolDefinition;

use crate::error::{MonsrvError, Result};
use crate::output::OutputKind;
use crate::port::SerialPortConfig;
use crate::schedule::TriggerSpec;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "MONSRV";

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LogConfig,

    /// Scheduler cycle; 0 runs a single pass
    #[serde(default = "default_cycle_seconds")]
    pub cycle_seconds: u64,

    /// Pause between two cycles
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    pub device: DeviceConfig,

    /// Broker settings, required by `mqtt` ports
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,

    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
}

fn default_cycle_seconds() -> u64 {
    60
}

fn default_pacing_ms() -> u64 {
    500
}

/// The monitored device
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    /// Protocol variant name (`PI30`, `PI18`, `JK02`, `DALY`, `TEXT`)
    pub protocol: String,
    #[serde(default = "default_exchange_timeout_ms")]
    pub exchange_timeout_ms: u64,
    pub port: PortConfig,
}

fn default_exchange_timeout_ms() -> u64 {
    5000
}

impl DeviceConfig {
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }
}

/// Port kind, tagged by `type`
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PortConfig {
    /// Request/response serial line
    Serial(SerialPortConfig),
    /// Notification stream over a serial bridge
    Stream(SerialPortConfig),
    /// Requests and responses relayed through the MQTT broker
    Mqtt,
    /// Canned responses, for dry runs
    Test,
}

/// MQTT broker settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Topics are `<prefix>/<device>/command` and `<prefix>/<device>/response/<command>`
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "monsrv".to_string()
}

fn default_topic_prefix() -> String {
    "monsrv".to_string()
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            topic_prefix: default_topic_prefix(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// One command group
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    pub name: String,
    #[serde(default)]
    pub trigger: TriggerSpec,
    pub commands: Vec<CommandConfig>,
}

/// One command within a group
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    /// Command name, parameter inline (`POP01`) or in `params`
    pub command: String,
    #[serde(default)]
    pub params: Option<String>,
    #[serde(default = "default_outputs")]
    pub outputs: Vec<OutputKind>,
}

fn default_outputs() -> Vec<OutputKind> {
    vec![OutputKind::Log]
}

impl Config {
    /// Load and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Config = common::config_loader::load_config(path, ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    pub fn cycle(&self) -> Duration {
        Duration::from_secs(self.cycle_seconds)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    /// Broker settings, defaulted when the section is absent
    pub fn mqtt_or_default(&self) -> MqttConfig {
        self.mqtt.clone().unwrap_or_default()
    }

    /// Reject configurations that could never run
    pub fn validate(&self) -> Result<()> {
        if self.device.name.is_empty() {
            return Err(MonsrvError::config("device.name cannot be empty"));
        }
        if self.pacing_ms == 0 {
            return Err(MonsrvError::config("pacing_ms must be greater than zero"));
        }
        if self.device.exchange_timeout_ms == 0 {
            return Err(MonsrvError::config(
                "device.exchange_timeout_ms must be greater than zero",
            ));
        }

        let protocol = ProtocolDefinition::by_name(&self.device.protocol)
            .map_err(|e| MonsrvError::config(format!("device.protocol: {}", e)))?;

        match &self.device.port {
            PortConfig::Serial(serial) | PortConfig::Stream(serial) => serial
                .validate()
                .map_err(|e| MonsrvError::config(format!("device.port: {}", e)))?,
            PortConfig::Mqtt if self.mqtt.is_none() => {
                return Err(MonsrvError::config(
                    "mqtt section is required for an mqtt port",
                ))
            },
            PortConfig::Mqtt | PortConfig::Test => {},
        }

        if self.schedules.is_empty() {
            return Err(MonsrvError::config("at least one schedule is required"));
        }
        for schedule in &self.schedules {
            if schedule.commands.is_empty() {
                return Err(MonsrvError::config(format!(
                    "schedule {} has no commands",
                    schedule.name
                )));
            }
            schedule.trigger.build().map_err(|e| {
                MonsrvError::config(format!("schedule {}: {}", schedule.name, e))
            })?;

            for command in &schedule.commands {
                let built = match &command.params {
                    Some(params) => protocol.build_command(&command.command, Some(params)),
                    None => protocol.resolve_command(&command.command),
                };
                built.map_err(|e| {
                    MonsrvError::config(format!(
                        "schedule {}: {} ({})",
                        schedule.name, e, protocol.id()
                    ))
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    const INVERTER_YAML: &str = r#"
cycle_seconds: 30
device:
  name: inv1
  protocol: pi30
  port:
    type: serial
    path: /dev/ttyUSB0
schedules:
  - name: status
    trigger:
      loops: 2
    commands:
      - command: QPIGS
        outputs: [log, json]
      - command: QMOD
  - name: settings
    trigger: once
    commands:
      - command: POP
        params: "01"
"#;

    fn write_yaml(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_inverter_config() {
        let file = write_yaml(INVERTER_YAML);
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.cycle(), Duration::from_secs(30));
        assert_eq!(config.pacing(), Duration::from_millis(500));
        assert_eq!(config.device.exchange_timeout(), Duration::from_secs(5));
        assert_eq!(
            config.device.port,
            PortConfig::Serial(SerialPortConfig::new("/dev/ttyUSB0", 2400))
        );
        assert_eq!(config.schedules.len(), 2);
        assert_eq!(config.schedules[0].trigger, TriggerSpec::Loops(2));
        assert_eq!(
            config.schedules[0].commands[0].outputs,
            vec![OutputKind::Log, OutputKind::Json]
        );
        assert_eq!(config.schedules[0].commands[1].outputs, vec![OutputKind::Log]);
        assert_eq!(config.schedules[1].trigger, TriggerSpec::Once);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_unknown_command_rejected() {
        let file = write_yaml(&INVERTER_YAML.replace("QMOD", "QBOGUS"));
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("QBOGUS"), "{}", err);
    }

    #[test]
    fn test_unknown_protocol_rejected() {
        let file = write_yaml(&INVERTER_YAML.replace("pi30", "pi99"));
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, MonsrvError::ConfigError(_)));
        assert!(err.to_string().contains("pi99"));
    }

    #[test]
    fn test_invalid_parameter_rejected() {
        let file = write_yaml(&INVERTER_YAML.replace("\"01\"", "\"07\""));
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_zero_pacing_rejected() {
        let file = write_yaml(&format!("pacing_ms: 0\n{}", INVERTER_YAML));
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("pacing_ms"));
    }

    #[test]
    fn test_empty_schedules_rejected() {
        let body = r#"
device:
  name: bms
  protocol: DALY
  port:
    type: test
"#;
        let file = write_yaml(body);
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("schedule"));
    }

    #[test]
    fn test_mqtt_port_requires_broker() {
        let body = r#"
device:
  name: inv1
  protocol: PI18
  port:
    type: mqtt
schedules:
  - name: status
    commands:
      - command: GS
"#;
        let file = write_yaml(body);
        assert!(Config::load(file.path()).is_err());

        let file = write_yaml(&format!("{}mqtt:\n  host: broker.local\n", body));
        let config = Config::load(file.path()).unwrap();
        let mqtt = config.mqtt_or_default();
        assert_eq!(mqtt.host, "broker.local");
        assert_eq!(mqtt.port, 1883);
        assert_eq!(config.schedules[0].trigger, TriggerSpec::Every(60));
    }

    #[test]
    fn test_invalid_at_time_rejected() {
        let yaml = INVERTER_YAML.replace("trigger: once", "trigger:\n      at: \"7pm\"");
        let file = write_yaml(&yaml);
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("monsrv.yaml", INVERTER_YAML)?;
            jail.set_env("MONSRV_CYCLE_SECONDS", "5");
            jail.set_env("MONSRV_DEVICE__NAME", "inv2");
            let config = Config::load("monsrv.yaml").unwrap();
            assert_eq!(config.cycle_seconds, 5);
            assert_eq!(config.device.name, "inv2");
            Ok(())
        });
    }
}
