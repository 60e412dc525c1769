//! The radio seam.
//!
//! Controllers only ever talk to these traits. The platform backend lives in
//! [`btle`]; tests drive the controllers through [`sim`].

pub mod btle;
#[cfg(test)]
pub mod sim;

use std::time::Duration;

use async_trait::async_trait;
use mac_address::MacAddress;
use thiserror::Error;
use uuid::Uuid;

use crate::messages::ScanResult;

#[derive(Error, Debug)]
pub enum BleError {
    #[error("No usable Bluetooth adapter: {0}")]
    NotAvailable(String),

    #[error("Scan error: {0}")]
    Scan(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Service discovery failed: {0}")]
    Discovery(String),

    #[error("GATT error: {0}")]
    Gatt(String),

    #[error("Peer disconnected")]
    Disconnected,

    #[error("Characteristic used after its connection was closed")]
    EndpointInvalidated,
}

impl From<btleplug::Error> for BleError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::NotConnected => BleError::Disconnected,
            btleplug::Error::TimedOut(_) => BleError::Timeout,
            btleplug::Error::DeviceNotFound => BleError::Connection(err.to_string()),
            other => BleError::Gatt(other.to_string()),
        }
    }
}

#[async_trait]
pub trait Adapter: Send {
    type Scan: ScanSubscription;
    type Connection: Connection;

    /// Bring the radio up. Failing here is fatal to the mission.
    async fn enable(&mut self) -> Result<(), BleError>;

    async fn start_scan(&mut self) -> Result<Self::Scan, BleError>;

    /// Idempotent. Results already in flight are still delivered by the
    /// subscription, which ends once the adapter has settled.
    async fn stop_scan(&mut self) -> Result<(), BleError>;

    async fn connect(
        &mut self,
        address: MacAddress,
        timeout: Duration,
    ) -> Result<Self::Connection, BleError>;
}

/// A live, unbounded sequence of scan results for one window.
#[async_trait]
pub trait ScanSubscription: Send {
    /// `None` once the scan was stopped and nothing is left to deliver.
    async fn next(&mut self) -> Option<Result<ScanResult, BleError>>;
}

#[async_trait]
pub trait Connection: Send {
    type Characteristic: Characteristic;

    /// Discover primary services, keeping only those in `whitelist`.
    async fn discover_services(
        &mut self,
        whitelist: &[Uuid],
    ) -> Result<Vec<Service<Self::Characteristic>>, BleError>;

    async fn is_connected(&self) -> bool;

    async fn disconnect(&mut self) -> Result<(), BleError>;
}

#[async_trait]
pub trait Characteristic: Send + Sync {
    fn uuid(&self) -> Uuid;

    async fn set_notify(&self, enabled: bool) -> Result<(), BleError>;

    /// For notify characteristics this is the most recently notified value.
    async fn read(&self) -> Result<Vec<u8>, BleError>;

    async fn write(&self, data: &[u8]) -> Result<(), BleError>;
}

#[derive(Debug)]
pub struct Service<C> {
    pub uuid: Uuid,
    pub characteristics: Vec<C>,
}

const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;
const SHORT_UUID_MASK: u128 = 0xffff_ffff_ffff_ffff_ffff_ffff;

/// Expand a 16-bit assigned number onto the Bluetooth base UUID.
pub fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | (u128::from(short) << 96))
}

/// The 16-bit assigned number behind `uuid`, if it is one.
pub fn short_uuid(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    if value & SHORT_UUID_MASK != BLUETOOTH_BASE_UUID || value >> 112 != 0 {
        return None;
    }
    Some((value >> 96) as u16)
}
