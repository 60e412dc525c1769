use log::info;
use mac_address::MacAddress;

use crate::bms::BatteryStatus;
use crate::messages::Sighting;

/// Where matched devices and decoded battery readings end up.
pub trait Reporter {
    fn device_found(&mut self, sighting: &Sighting);

    fn battery_status(&mut self, address: MacAddress, status: &BatteryStatus);
}

/// Human readable log lines.
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn device_found(&mut self, sighting: &Sighting) {
        info!("{}", "-".repeat(40));
        info!("Found interesting device!");
        info!("Address: {}", sighting.address);
        info!("RSSI: {} dBm", sighting.rssi);
        info!("Services: {}", format_services(&sighting.services));
        for name in &sighting.names {
            info!("Name: {name}");
        }
        for service in &sighting.services {
            if let Some(description) = describe_service(*service) {
                info!("Has {service:04X} ({description}) Service");
            }
        }
    }

    fn battery_status(&mut self, address: MacAddress, status: &BatteryStatus) {
        info!(
            "{address}: {:.1} V, {:.1} A, {:.1} W, {}% SoC",
            status.voltage, status.current, status.power, status.soc
        );
    }
}

fn describe_service(uuid: u16) -> Option<&'static str> {
    match uuid {
        0xFF00 => Some("Custom"),
        0x180A => Some("Device Information"),
        _ => None,
    }
}

pub fn format_services(services: &[u16]) -> String {
    let hex: Vec<String> = services.iter().map(|uuid| format!("0x{uuid:04x}")).collect();
    format!("[{}]", hex.join(", "))
}

impl<R: Reporter> Reporter for Option<R> {
    fn device_found(&mut self, sighting: &Sighting) {
        if let Some(reporter) = self {
            reporter.device_found(sighting);
        }
    }

    fn battery_status(&mut self, address: MacAddress, status: &BatteryStatus) {
        if let Some(reporter) = self {
            reporter.battery_status(address, status);
        }
    }
}

impl<A: Reporter, B: Reporter> Reporter for (A, B) {
    fn device_found(&mut self, sighting: &Sighting) {
        self.0.device_found(sighting);
        self.1.device_found(sighting);
    }

    fn battery_status(&mut self, address: MacAddress, status: &BatteryStatus) {
        self.0.battery_status(address, status);
        self.1.battery_status(address, status);
    }
}

/// Keeps everything it is told, for assertions.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingReporter {
    pub sightings: Vec<Sighting>,
    pub readings: Vec<(MacAddress, BatteryStatus)>,
}

#[cfg(test)]
impl Reporter for RecordingReporter {
    fn device_found(&mut self, sighting: &Sighting) {
        self.sightings.push(sighting.clone());
    }

    fn battery_status(&mut self, address: MacAddress, status: &BatteryStatus) {
        self.readings.push((address, *status));
    }
}
