//! In-process adapter for exercising the controllers without a radio.
//!
//! Scan windows are scripted up front, every call is recorded in a shared
//! event log, and failures can be injected at each step. Time is tokio
//! virtual time, so paused-clock tests run instantly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mac_address::MacAddress;
use uuid::Uuid;

use super::{Adapter, BleError, Characteristic, Connection, ScanSubscription, Service};
use crate::bms::REQUEST_BASIC_INFO;
use crate::messages::ScanResult;

#[derive(Clone, Debug, PartialEq)]
pub enum SimEvent {
    Enable,
    StartScan,
    StopScan,
    Connect(MacAddress),
    DiscoverServices(Vec<Uuid>),
    SetNotify(Uuid, bool),
    Write(Uuid, Vec<u8>),
    Read(Uuid),
    Disconnect,
}

pub type EventLog = Arc<Mutex<Vec<SimEvent>>>;

/// Results delivered during one scan window.
#[derive(Clone, Debug, Default)]
pub struct SimWindow {
    /// Delivered while scanning, in order.
    pub live: Vec<Result<ScanResult, String>>,
    /// Delivered after `stop_scan`, before the subscription ends.
    pub after_stop: Vec<ScanResult>,
    /// The subscription never ends, even after `stop_scan`.
    pub never_settles: bool,
}

impl SimWindow {
    pub fn with(results: Vec<ScanResult>) -> Self {
        SimWindow {
            live: results.into_iter().map(Ok).collect(),
            ..Default::default()
        }
    }
}

/// A BMS peripheral answering the basic info request.
#[derive(Clone, Debug)]
pub struct SimPeripheral {
    pub address: MacAddress,
    /// Services and their characteristic UUIDs.
    pub services: Vec<(Uuid, Vec<Uuid>)>,
    pub response: Vec<u8>,
    /// The link drops after this many reads.
    pub reads_before_drop: usize,
    /// Connect fails at or beyond the caller's timeout.
    pub connect_delay: Option<Duration>,
    /// The link comes up, then connection setup fails.
    pub fail_after_connect: bool,
    pub fail_discovery: bool,
    pub fail_write: bool,
    pub fail_disconnect: bool,
}

#[derive(Default)]
pub struct SimAdapter {
    pub windows: VecDeque<SimWindow>,
    pub peripheral: Option<SimPeripheral>,
    pub fail_enable: bool,
    pub fail_start_scan: bool,
    pub fail_stop_scan: bool,
    pub log: EventLog,
    stopped: Arc<AtomicBool>,
    last_link: Option<Arc<Mutex<Link>>>,
}

impl SimAdapter {
    pub fn new(windows: Vec<SimWindow>) -> Self {
        SimAdapter {
            windows: windows.into(),
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, wanted: impl Fn(&SimEvent) -> bool) -> usize {
        self.log.lock().unwrap().iter().filter(|event| wanted(event)).count()
    }

    /// Whether the most recent connection is still up.
    pub fn link_up(&self) -> bool {
        self.last_link
            .as_ref()
            .is_some_and(|link| link.lock().unwrap().connected)
    }

    fn record(&self, event: SimEvent) {
        self.log.lock().unwrap().push(event);
    }
}

#[async_trait]
impl Adapter for SimAdapter {
    type Scan = SimScan;
    type Connection = SimConnection;

    async fn enable(&mut self) -> Result<(), BleError> {
        self.record(SimEvent::Enable);
        if self.fail_enable {
            return Err(BleError::NotAvailable("simulated radio is off".to_string()));
        }
        Ok(())
    }

    async fn start_scan(&mut self) -> Result<SimScan, BleError> {
        self.record(SimEvent::StartScan);
        if self.fail_start_scan {
            return Err(BleError::Scan("simulated start failure".to_string()));
        }
        self.stopped = Arc::new(AtomicBool::new(false));
        let window = self.windows.pop_front().unwrap_or_default();
        Ok(SimScan {
            live: window.live.into(),
            after_stop: window.after_stop.into(),
            never_settles: window.never_settles,
            stopped: Arc::clone(&self.stopped),
        })
    }

    async fn stop_scan(&mut self) -> Result<(), BleError> {
        self.record(SimEvent::StopScan);
        self.stopped.store(true, Ordering::SeqCst);
        if self.fail_stop_scan {
            return Err(BleError::Scan("simulated stop failure".to_string()));
        }
        Ok(())
    }

    async fn connect(
        &mut self,
        address: MacAddress,
        timeout: Duration,
    ) -> Result<SimConnection, BleError> {
        self.record(SimEvent::Connect(address));
        let peripheral = match &self.peripheral {
            Some(peripheral) if peripheral.address == address => peripheral.clone(),
            _ => return Err(BleError::Connection(format!("{address} not in range"))),
        };
        if let Some(delay) = peripheral.connect_delay {
            if delay >= timeout {
                tokio::time::sleep(timeout).await;
                return Err(BleError::Timeout);
            }
            tokio::time::sleep(delay).await;
        }

        let link = Arc::new(Mutex::new(Link {
            connected: true,
            notifying: false,
            reads: 0,
            latest: Vec::new(),
        }));
        self.last_link = Some(Arc::clone(&link));

        if peripheral.fail_after_connect {
            // Same contract as the platform adapter: a failed connect never
            // leaves the link up.
            self.record(SimEvent::Disconnect);
            link.lock().unwrap().connected = false;
            return Err(BleError::Gatt("simulated notification setup failure".to_string()));
        }

        Ok(SimConnection {
            link,
            peripheral,
            log: Arc::clone(&self.log),
        })
    }
}

pub struct SimScan {
    live: VecDeque<Result<ScanResult, String>>,
    after_stop: VecDeque<ScanResult>,
    never_settles: bool,
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl ScanSubscription for SimScan {
    async fn next(&mut self) -> Option<Result<ScanResult, BleError>> {
        if self.stopped.load(Ordering::SeqCst) {
            if let Some(result) = self.after_stop.pop_front() {
                return Some(Ok(result));
            }
            if !self.never_settles {
                return None;
            }
        } else if let Some(result) = self.live.pop_front() {
            return Some(result.map_err(BleError::Scan));
        }
        // Nothing more on air.
        std::future::pending().await
    }
}

struct Link {
    connected: bool,
    notifying: bool,
    reads: usize,
    latest: Vec<u8>,
}

pub struct SimConnection {
    link: Arc<Mutex<Link>>,
    peripheral: SimPeripheral,
    log: EventLog,
}

#[async_trait]
impl Connection for SimConnection {
    type Characteristic = SimCharacteristic;

    async fn discover_services(
        &mut self,
        whitelist: &[Uuid],
    ) -> Result<Vec<Service<SimCharacteristic>>, BleError> {
        self.log
            .lock()
            .unwrap()
            .push(SimEvent::DiscoverServices(whitelist.to_vec()));
        if self.peripheral.fail_discovery {
            return Err(BleError::Discovery("simulated discovery failure".to_string()));
        }
        Ok(self
            .peripheral
            .services
            .iter()
            .filter(|(uuid, _)| whitelist.contains(uuid))
            .map(|(uuid, characteristics)| Service {
                uuid: *uuid,
                characteristics: characteristics
                    .iter()
                    .map(|uuid| SimCharacteristic {
                        uuid: *uuid,
                        link: Arc::clone(&self.link),
                        peripheral: self.peripheral.clone(),
                        log: Arc::clone(&self.log),
                    })
                    .collect(),
            })
            .collect())
    }

    async fn is_connected(&self) -> bool {
        let link = self.link.lock().unwrap();
        link.connected && link.reads < self.peripheral.reads_before_drop
    }

    async fn disconnect(&mut self) -> Result<(), BleError> {
        self.log.lock().unwrap().push(SimEvent::Disconnect);
        self.link.lock().unwrap().connected = false;
        if self.peripheral.fail_disconnect {
            return Err(BleError::Connection("simulated disconnect failure".to_string()));
        }
        Ok(())
    }
}

pub struct SimCharacteristic {
    uuid: Uuid,
    link: Arc<Mutex<Link>>,
    peripheral: SimPeripheral,
    log: EventLog,
}

#[async_trait]
impl Characteristic for SimCharacteristic {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn set_notify(&self, enabled: bool) -> Result<(), BleError> {
        self.log.lock().unwrap().push(SimEvent::SetNotify(self.uuid, enabled));
        self.link.lock().unwrap().notifying = enabled;
        Ok(())
    }

    async fn read(&self) -> Result<Vec<u8>, BleError> {
        self.log.lock().unwrap().push(SimEvent::Read(self.uuid));
        let mut link = self.link.lock().unwrap();
        link.reads += 1;
        Ok(link.latest.clone())
    }

    async fn write(&self, data: &[u8]) -> Result<(), BleError> {
        self.log
            .lock()
            .unwrap()
            .push(SimEvent::Write(self.uuid, data.to_vec()));
        if self.peripheral.fail_write {
            return Err(BleError::Gatt("simulated write failure".to_string()));
        }
        let mut link = self.link.lock().unwrap();
        if link.notifying && data == REQUEST_BASIC_INFO {
            link.latest = self.peripheral.response.clone();
        }
        Ok(())
    }
}
