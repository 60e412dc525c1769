use std::time::Duration;

use log::{debug, error, info, warn};
use mac_address::MacAddress;
use rumqttc::{MqttOptions, QoS};
use serde_derive::Serialize;

use crate::bms::BatteryStatus;
use crate::config;
use crate::messages::Sighting;
use crate::report::Reporter;

/// Publishes sightings and battery readings as JSON.
#[derive(Debug, Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    publisher_id: String,
    topic_path: String,
}

#[derive(Debug, Serialize)]
struct DeviceMqttMessage {
    #[serde(rename = "id")]
    mac_address: String,
    rssi: i16,
    services: Vec<String>,
    names: Vec<String>,
}

#[derive(Debug, Serialize)]
struct BatteryMqttMessage {
    #[serde(rename = "id")]
    mac_address: String,
    voltage: f32,
    current: f32,
    power: f32,
    soc: u8,
}

impl MqttClient {
    pub fn new(config: &config::MqttConfig) -> (Self, rumqttc::EventLoop) {
        let publisher_id = config
            .publisher_id
            .clone()
            .unwrap_or_else(|| "bms-monitor".to_string());

        let mut mqttoptions = MqttOptions::new(
            publisher_id.clone(),
            config.host.clone(),
            config.port.unwrap_or(1883),
        );

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, 10);

        (
            MqttClient {
                client,
                publisher_id,
                topic_path: config.topic_path.clone().unwrap_or("bms".to_string()),
            },
            eventloop,
        )
    }

    /// Drives the connection. Nothing is subscribed, so this only logs.
    pub async fn event_loop(mut eventloop: rumqttc::EventLoop) {
        loop {
            match eventloop.poll().await {
                Ok(rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker");
                }
                Ok(notification) => debug!("MQTT: {notification:?}"),
                Err(e) => {
                    error!("Error polling MQTT event loop: {:?}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    fn topic(&self, kind: &str, address: MacAddress) -> String {
        format!(
            "{}/{}/{}/{}",
            self.topic_path,
            self.publisher_id,
            kind,
            sanitize_name(&address.to_string())
        )
    }

    fn publish<T: serde::Serialize>(&self, topic: String, message: &T) {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(err) => {
                error!("Could not serialize MQTT message for {topic}: {err}");
                return;
            }
        };
        debug!("Publishing to {topic}: {payload}");
        if let Err(err) = self.client.try_publish(topic, QoS::AtMostOnce, false, payload) {
            warn!("Dropping MQTT message: {err}");
        }
    }
}

impl Reporter for MqttClient {
    fn device_found(&mut self, sighting: &Sighting) {
        let message = DeviceMqttMessage {
            mac_address: sighting.address.to_string(),
            rssi: sighting.rssi,
            services: sighting
                .services
                .iter()
                .map(|uuid| format!("{uuid:04x}"))
                .collect(),
            names: sighting.names.clone(),
        };
        self.publish(self.topic("device", sighting.address), &message);
    }

    fn battery_status(&mut self, address: MacAddress, status: &BatteryStatus) {
        let message = BatteryMqttMessage {
            mac_address: address.to_string(),
            voltage: status.voltage,
            current: status.current,
            power: status.power,
            soc: status.soc,
        };
        self.publish(self.topic("battery", address), &message);
    }
}

fn sanitize_name(name: &str) -> String {
    // Anything but a letter or digit becomes an underscore
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
}
