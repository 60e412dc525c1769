//! Platform adapter backed by `btleplug`.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central as _, CentralEvent, CharPropFlags, Manager as _, Peripheral as _,
    ScanFilter, ValueNotification, WriteType,
};
use btleplug::platform::{Adapter as PlatformAdapter, Manager, Peripheral, PeripheralId};
use futures::{FutureExt as _, Stream, StreamExt as _};
use log::{debug, info, trace};
use mac_address::MacAddress;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{Adapter, BleError, Characteristic, Connection, ScanSubscription, Service, short_uuid};
use crate::advertisement;
use crate::messages::ScanResult;

type LatestValues = Arc<Mutex<HashMap<Uuid, Vec<u8>>>>;

pub struct BtleAdapter {
    central: Result<PlatformAdapter, String>,
    stopped: Arc<AtomicBool>,
}

impl BtleAdapter {
    /// Pick the first adapter the platform reports. A missing adapter is not
    /// an error here; it surfaces from [`Adapter::enable`].
    pub async fn probe() -> Self {
        let central = match Manager::new().await {
            Ok(manager) => match manager.adapters().await {
                Ok(adapters) => adapters
                    .into_iter()
                    .next()
                    .ok_or_else(|| "no Bluetooth adapters found".to_string()),
                Err(err) => Err(format!("listing adapters: {err}")),
            },
            Err(err) => Err(format!("opening Bluetooth manager: {err}")),
        };

        BtleAdapter {
            central,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    fn central(&self) -> Result<&PlatformAdapter, BleError> {
        self.central
            .as_ref()
            .map_err(|err| BleError::NotAvailable(err.clone()))
    }
}

#[async_trait]
impl Adapter for BtleAdapter {
    type Scan = BtleScan;
    type Connection = BtleConnection;

    async fn enable(&mut self) -> Result<(), BleError> {
        let info = self
            .central()?
            .adapter_info()
            .await
            .map_err(|err| BleError::NotAvailable(err.to_string()))?;
        info!("Using Bluetooth adapter {info}");
        Ok(())
    }

    async fn start_scan(&mut self) -> Result<BtleScan, BleError> {
        let central = self.central()?.clone();
        let events = central
            .events()
            .await
            .map_err(|err| BleError::Scan(err.to_string()))?;
        central
            .start_scan(ScanFilter::default())
            .await
            .map_err(|err| BleError::Scan(err.to_string()))?;

        self.stopped = Arc::new(AtomicBool::new(false));
        Ok(BtleScan {
            central,
            events: Resumable::new(events),
            stopped: Arc::clone(&self.stopped),
        })
    }

    async fn stop_scan(&mut self) -> Result<(), BleError> {
        self.stopped.store(true, Ordering::SeqCst);
        self.central()?
            .stop_scan()
            .await
            .map_err(|err| BleError::Scan(err.to_string()))
    }

    async fn connect(
        &mut self,
        address: MacAddress,
        timeout: Duration,
    ) -> Result<BtleConnection, BleError> {
        let target = BDAddr::from(address.bytes());
        let mut found = None;
        for peripheral in self.central()?.peripherals().await? {
            if peripheral.address() == target {
                found = Some(peripheral);
                break;
            }
        }
        let peripheral =
            found.ok_or_else(|| BleError::Connection(format!("{address} is not known to the adapter")))?;

        match tokio::time::timeout(timeout, peripheral.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(BleError::Connection(err.to_string())),
            Err(_) => {
                // The link may have come up just as the deadline passed.
                release(&peripheral).await;
                return Err(BleError::Timeout);
            }
        }

        // From here on the link is up; every failure has to take it down.
        let notifications = match peripheral.notifications().await {
            Ok(notifications) => notifications,
            Err(err) => {
                release(&peripheral).await;
                return Err(err.into());
            }
        };
        let latest = LatestValues::default();
        let pump = tokio::spawn(pump_notifications(notifications, Arc::clone(&latest)));

        Ok(BtleConnection {
            peripheral,
            latest,
            pump,
            closed: false,
        })
    }
}

/// Best-effort disconnect of a link nobody else will close.
async fn release(peripheral: &Peripheral) {
    if let Err(err) = peripheral.disconnect().await {
        debug!("Could not release {}: {err}", peripheral.address());
    }
}

async fn pump_notifications(
    mut notifications: Pin<Box<dyn Stream<Item = ValueNotification> + Send>>,
    latest: LatestValues,
) {
    while let Some(notification) = notifications.next().await {
        trace!(
            "Notification from {}: {:02x?}",
            notification.uuid, notification.value
        );
        latest
            .lock()
            .await
            .insert(notification.uuid, notification.value);
    }
    debug!("Notification stream closed");
}

pub struct BtleScan {
    central: PlatformAdapter,
    events: Resumable<Pin<Box<dyn Stream<Item = CentralEvent> + Send>>, PeripheralId>,
    stopped: Arc<AtomicBool>,
}

/// A stream of keys where the key being worked on stays pending until
/// [`Resumable::finish`]. If the caller is cancelled mid-way, the next call
/// hands out the same key again instead of losing it.
struct Resumable<St, K> {
    stream: St,
    pending: Option<K>,
}

impl<St, K> Resumable<St, K>
where
    St: Stream + Unpin,
    K: Clone,
{
    fn new(stream: St) -> Self {
        Resumable {
            stream,
            pending: None,
        }
    }

    /// Next key picked out of the stream by `select`. With `buffered_only`
    /// set, ends instead of waiting for new items.
    async fn next(&mut self, select: fn(St::Item) -> Option<K>, buffered_only: bool) -> Option<K> {
        if let Some(key) = &self.pending {
            return Some(key.clone());
        }
        loop {
            let item = if buffered_only {
                self.stream.next().now_or_never().flatten()?
            } else {
                self.stream.next().await?
            };
            if let Some(key) = select(item) {
                self.pending = Some(key.clone());
                return Some(key);
            }
        }
    }

    fn finish(&mut self) {
        self.pending = None;
    }
}

fn discovered(event: CentralEvent) -> Option<PeripheralId> {
    match event {
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => Some(id),
        _ => None,
    }
}

/// btleplug hands out parsed properties only; put the parts the decoder
/// understands back into AD structures. `None` when there is nothing to put.
fn advertisement_bytes(services: &[Uuid], local_name: Option<&str>) -> Option<Vec<u8>> {
    let services: Vec<u16> = services.iter().filter_map(short_uuid).collect();
    let local_name = local_name.filter(|name| !name.is_empty());
    if services.is_empty() && local_name.is_none() {
        return None;
    }
    Some(advertisement::encode(&services, local_name))
}

async fn scan_result(
    central: &PlatformAdapter,
    id: &PeripheralId,
) -> Result<Option<ScanResult>, BleError> {
    let peripheral = central.peripheral(id).await?;
    let Some(properties) = peripheral.properties().await? else {
        return Ok(None);
    };
    // Cached devices show up without a signal reading; they are not on air.
    let Some(rssi) = properties.rssi else {
        return Ok(None);
    };

    let advertisement =
        advertisement_bytes(&properties.services, properties.local_name.as_deref());

    Ok(Some(ScanResult::new(
        MacAddress::new(properties.address.into_inner()),
        rssi,
        advertisement,
    )))
}

#[async_trait]
impl ScanSubscription for BtleScan {
    async fn next(&mut self) -> Option<Result<ScanResult, BleError>> {
        loop {
            let buffered_only = self.stopped.load(Ordering::SeqCst);
            let id = self.events.next(discovered, buffered_only).await?;

            let result = scan_result(&self.central, &id).await;
            self.events.finish();
            match result {
                Ok(Some(result)) => return Some(Ok(result)),
                Ok(None) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

pub struct BtleConnection {
    peripheral: Peripheral,
    latest: LatestValues,
    pump: JoinHandle<()>,
    closed: bool,
}

#[async_trait]
impl Connection for BtleConnection {
    type Characteristic = BtleCharacteristic;

    async fn discover_services(
        &mut self,
        whitelist: &[Uuid],
    ) -> Result<Vec<Service<BtleCharacteristic>>, BleError> {
        self.peripheral
            .discover_services()
            .await
            .map_err(|err| BleError::Discovery(err.to_string()))?;

        Ok(self
            .peripheral
            .services()
            .into_iter()
            .filter(|service| whitelist.contains(&service.uuid))
            .map(|service| Service {
                uuid: service.uuid,
                characteristics: service
                    .characteristics
                    .into_iter()
                    .map(|characteristic| BtleCharacteristic {
                        peripheral: self.peripheral.clone(),
                        characteristic,
                        latest: Arc::clone(&self.latest),
                    })
                    .collect(),
            })
            .collect())
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn disconnect(&mut self) -> Result<(), BleError> {
        self.pump.abort();
        self.closed = true;
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

impl Drop for BtleConnection {
    fn drop(&mut self) {
        self.pump.abort();
        if self.closed {
            return;
        }
        // Dropped without `disconnect`, e.g. a cancelled session.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let peripheral = self.peripheral.clone();
            runtime.spawn(async move { release(&peripheral).await });
        }
    }
}

pub struct BtleCharacteristic {
    peripheral: Peripheral,
    characteristic: btleplug::api::Characteristic,
    latest: LatestValues,
}

#[async_trait]
impl Characteristic for BtleCharacteristic {
    fn uuid(&self) -> Uuid {
        self.characteristic.uuid
    }

    async fn set_notify(&self, enabled: bool) -> Result<(), BleError> {
        if enabled {
            self.peripheral.subscribe(&self.characteristic).await?;
        } else {
            self.peripheral.unsubscribe(&self.characteristic).await?;
        }
        Ok(())
    }

    async fn read(&self) -> Result<Vec<u8>, BleError> {
        if self.characteristic.properties.contains(CharPropFlags::NOTIFY) {
            return Ok(self
                .latest
                .lock()
                .await
                .get(&self.characteristic.uuid)
                .cloned()
                .unwrap_or_default());
        }
        Ok(self.peripheral.read(&self.characteristic).await?)
    }

    async fn write(&self, data: &[u8]) -> Result<(), BleError> {
        let properties = self.characteristic.properties;
        let write_type = if properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
            && !properties.contains(CharPropFlags::WRITE)
        {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };
        self.peripheral
            .write(&self.characteristic, data, write_type)
            .await?;
        Ok(())
    }
}
