use std::collections::BTreeSet;
use std::time::Duration;

use mac_address::MacAddress;
use serde_derive::Deserialize;
use uuid::Uuid;

use crate::adapter::uuid_from_u16;
use crate::filter::FilterPolicy;

/// Custom vendor service and Device Information.
const DEFAULT_TARGET_SERVICES: [u16; 2] = [0xFF00, 0x180A];

const BMS_SERVICE: u16 = 0xFF00;
const BMS_NOTIFY_CHARACTERISTIC: u16 = 0xFF01;
const BMS_WRITE_CHARACTERISTIC: u16 = 0xFF02;

#[derive(Deserialize, Debug, Default, Clone)]
pub struct AppConfig {
    pub target: Option<TargetConfig>,
    pub scan: Option<ScanConfig>,
    pub session: Option<SessionConfig>,
    pub indicator: Option<IndicatorConfig>,
    pub mqtt: Option<MqttConfig>,
}

impl AppConfig {
    pub fn filter_policy(&self) -> FilterPolicy {
        let target = self.target.clone().unwrap_or_default();
        match target.mac {
            Some(mac) => FilterPolicy::ExactMac(mac),
            None => FilterPolicy::ServiceOrNameMatch {
                services: target
                    .services
                    .unwrap_or_else(|| DEFAULT_TARGET_SERVICES.to_vec())
                    .into_iter()
                    .collect::<BTreeSet<_>>(),
                name: target.name.filter(|name| !name.is_empty()),
            },
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct TargetConfig {
    /// Selects exact-target mode: scan for this device and connect to it.
    pub mac: Option<MacAddress>,
    pub services: Option<Vec<u16>>,
    pub name: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ScanConfig {
    pub dwell_millis: Option<u64>,
    pub interscan_delay_millis: Option<u64>,
    pub drain_millis: Option<u64>,
}

impl ScanConfig {
    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_millis.unwrap_or(1000))
    }

    pub fn interscan_delay(&self) -> Duration {
        Duration::from_millis(self.interscan_delay_millis.unwrap_or(1000))
    }

    pub fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_millis.unwrap_or(250))
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct SessionConfig {
    pub connect_timeout_seconds: Option<u64>,
    pub poll_interval_millis: Option<u64>,
    pub service_uuid: Option<Uuid>,
    pub notify_characteristic: Option<Uuid>,
    pub write_characteristic: Option<Uuid>,
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds.unwrap_or(10))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis.unwrap_or(2000))
    }

    pub fn service_uuid(&self) -> Uuid {
        self.service_uuid.unwrap_or_else(|| uuid_from_u16(BMS_SERVICE))
    }

    pub fn notify_characteristic(&self) -> Uuid {
        self.notify_characteristic
            .unwrap_or_else(|| uuid_from_u16(BMS_NOTIFY_CHARACTERISTIC))
    }

    pub fn write_characteristic(&self) -> Uuid {
        self.write_characteristic
            .unwrap_or_else(|| uuid_from_u16(BMS_WRITE_CHARACTERISTIC))
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct IndicatorConfig {
    /// Name of the LED under `/sys/class/leds`.
    pub led: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub topic_path: Option<String>,
    pub keep_alive_seconds: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config() {
        let config_str = r#"
            [target]
            services = [0xFF00, 0x180A]
            name = "ENJOYBOT"

            [scan]
            dwell_millis = 1500
            interscan_delay_millis = 2000

            [session]
            poll_interval_millis = 5000
            service_uuid = "0000ff00-0000-1000-8000-00805f9b34fb"

            [mqtt]
            host = "localhost"
            port = 1883
            username = "user"
            password = "pass"
        "#;
        let config: AppConfig = toml::de::from_str(&config_str).unwrap();
        assert!(config.mqtt.as_ref().map(|m| m.host.as_str()) == Some("localhost"));

        let scan = config.scan.clone().unwrap();
        assert_eq!(scan.dwell(), Duration::from_millis(1500));
        assert_eq!(scan.interscan_delay(), Duration::from_secs(2));
        assert_eq!(scan.drain(), Duration::from_millis(250));

        let session = config.session.clone().unwrap();
        assert_eq!(session.poll_interval(), Duration::from_secs(5));
        assert_eq!(session.connect_timeout(), Duration::from_secs(10));
        assert_eq!(session.service_uuid(), uuid_from_u16(0xFF00));

        assert_eq!(
            config.filter_policy(),
            FilterPolicy::ServiceOrNameMatch {
                services: BTreeSet::from([0xFF00, 0x180A]),
                name: Some("ENJOYBOT".to_string()),
            }
        );
    }

    #[test]
    fn test_target_mac_selects_exact_mode() {
        let config_str = r#"
            [target]
            mac = "aa:bb:cc:dd:ee:ff"
        "#;
        let config: AppConfig = toml::de::from_str(config_str).unwrap();
        assert_eq!(
            config.filter_policy(),
            FilterPolicy::ExactMac(MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]))
        );
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = toml::de::from_str("").unwrap();
        assert_eq!(
            config.filter_policy(),
            FilterPolicy::ServiceOrNameMatch {
                services: BTreeSet::from(DEFAULT_TARGET_SERVICES),
                name: None,
            }
        );

        let session = config.session.unwrap_or_default();
        assert_eq!(session.notify_characteristic(), uuid_from_u16(0xFF01));
        assert_eq!(session.write_characteristic(), uuid_from_u16(0xFF02));
        assert_eq!(session.poll_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_mac_is_rejected() {
        let config_str = r#"
            [target]
            mac = "not-a-mac"
        "#;
        assert!(toml::de::from_str::<AppConfig>(config_str).is_err());
    }
}
