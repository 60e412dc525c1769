//! One connection to the BMS: connect, discover, subscribe, poll, disconnect.

use std::time::Duration;

use log::{debug, info, warn};
use mac_address::MacAddress;
use thiserror::Error;
use tokio::time::sleep;
use uuid::Uuid;

use crate::adapter::{Adapter, BleError, Characteristic, Connection, Service};
use crate::bms::{self, REQUEST_BASIC_INFO};
use crate::config::SessionConfig;
use crate::messages::SessionOutcome;
use crate::report::Reporter;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Service {0} not found")]
    ServiceNotFound(Uuid),

    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error(transparent)]
    Ble(#[from] BleError),
}

/// Notify and write characteristics bound to one live connection.
///
/// Every use re-checks the link, so a stale endpoint fails loudly with
/// [`BleError::EndpointInvalidated`] instead of talking to nothing.
pub struct GattEndpoint<C> {
    notify: C,
    write: C,
}

impl<C: Characteristic> GattEndpoint<C> {
    pub fn bind(
        services: Vec<Service<C>>,
        service: Uuid,
        notify: Uuid,
        write: Uuid,
    ) -> Result<Self, SessionError> {
        let service = services
            .into_iter()
            .find(|candidate| candidate.uuid == service)
            .ok_or(SessionError::ServiceNotFound(service))?;

        let mut notify_characteristic = None;
        let mut write_characteristic = None;
        for characteristic in service.characteristics {
            let uuid = characteristic.uuid();
            if uuid == notify && notify_characteristic.is_none() {
                notify_characteristic = Some(characteristic);
            } else if uuid == write && write_characteristic.is_none() {
                write_characteristic = Some(characteristic);
            }
        }

        Ok(GattEndpoint {
            notify: notify_characteristic.ok_or(SessionError::CharacteristicNotFound(notify))?,
            write: write_characteristic.ok_or(SessionError::CharacteristicNotFound(write))?,
        })
    }

    async fn ensure_connected<N: Connection>(connection: &N) -> Result<(), BleError> {
        if connection.is_connected().await {
            Ok(())
        } else {
            Err(BleError::EndpointInvalidated)
        }
    }

    pub async fn set_notify<N>(&self, connection: &N, enabled: bool) -> Result<(), BleError>
    where
        N: Connection<Characteristic = C>,
    {
        Self::ensure_connected(connection).await?;
        self.notify.set_notify(enabled).await
    }

    pub async fn send<N>(&self, connection: &N, data: &[u8]) -> Result<(), BleError>
    where
        N: Connection<Characteristic = C>,
    {
        Self::ensure_connected(connection).await?;
        self.write.write(data).await
    }

    pub async fn latest<N>(&self, connection: &N) -> Result<Vec<u8>, BleError>
    where
        N: Connection<Characteristic = C>,
    {
        Self::ensure_connected(connection).await?;
        self.notify.read().await
    }
}

enum SessionState<N: Connection> {
    Connecting,
    Discovering(N),
    Polling(N, GattEndpoint<N::Characteristic>),
    /// The endpoint is gone by now; only the handle is left to close.
    Disconnecting(N, SessionOutcome),
}

#[derive(Debug, Clone)]
pub struct Session {
    connect_timeout: Duration,
    poll_interval: Duration,
    service: Uuid,
    notify: Uuid,
    write: Uuid,
}

impl Session {
    pub fn new(config: &SessionConfig) -> Self {
        Session {
            connect_timeout: config.connect_timeout(),
            poll_interval: config.poll_interval(),
            service: config.service_uuid(),
            notify: config.notify_characteristic(),
            write: config.write_characteristic(),
        }
    }

    /// Talk to the device at `address` until the link drops or something
    /// fails. Never errors; the outcome says how it went.
    pub async fn run<A, R>(&self, adapter: &mut A, address: MacAddress, reporter: &mut R) -> SessionOutcome
    where
        A: Adapter,
        R: Reporter,
    {
        let mut state = SessionState::Connecting;

        loop {
            state = match state {
                SessionState::Connecting => {
                    info!("Connecting to {address}");
                    // The adapter owns the deadline and tears down a half-open
                    // link before returning an error.
                    match adapter.connect(address, self.connect_timeout).await {
                        Ok(connection) => SessionState::Discovering(connection),
                        Err(BleError::Timeout) => {
                            warn!(
                                "Timed out connecting to {address} after {:?}",
                                self.connect_timeout
                            );
                            return SessionOutcome::ConnectFailed;
                        }
                        Err(err) => {
                            warn!("Failed to connect to {address}: {err}");
                            return SessionOutcome::ConnectFailed;
                        }
                    }
                }
                SessionState::Discovering(mut connection) => {
                    match self.discover(&mut connection).await {
                        Ok(endpoint) => SessionState::Polling(connection, endpoint),
                        Err(err) => {
                            warn!("Discovery on {address} failed: {err}");
                            SessionState::Disconnecting(connection, SessionOutcome::DiscoveryFailed)
                        }
                    }
                }
                SessionState::Polling(connection, endpoint) => {
                    let mut polls = 0;
                    let outcome = match self
                        .poll(&connection, &endpoint, address, reporter, &mut polls)
                        .await
                    {
                        Ok(()) => SessionOutcome::Completed { polls },
                        Err(err) => {
                            warn!("Session with {address} aborted: {err}");
                            SessionOutcome::Aborted { polls }
                        }
                    };
                    if connection.is_connected().await {
                        if let Err(err) = endpoint.set_notify(&connection, false).await {
                            debug!("Could not unsubscribe from {address}: {err}");
                        }
                    }
                    SessionState::Disconnecting(connection, outcome)
                }
                SessionState::Disconnecting(mut connection, outcome) => {
                    if let Err(err) = connection.disconnect().await {
                        debug!("Ignoring disconnect failure for {address}: {err}");
                    }
                    info!("Disconnected from {address} ({outcome:?})");
                    return outcome;
                }
            };
        }
    }

    async fn discover<N: Connection>(
        &self,
        connection: &mut N,
    ) -> Result<GattEndpoint<N::Characteristic>, SessionError> {
        let services = connection.discover_services(&[self.service]).await?;
        let endpoint = GattEndpoint::bind(services, self.service, self.notify, self.write)?;
        debug!("Bound notify {} and write {}", self.notify, self.write);
        Ok(endpoint)
    }

    async fn poll<N, R>(
        &self,
        connection: &N,
        endpoint: &GattEndpoint<N::Characteristic>,
        address: MacAddress,
        reporter: &mut R,
        polls: &mut usize,
    ) -> Result<(), BleError>
    where
        N: Connection,
        R: Reporter,
    {
        endpoint.set_notify(connection, true).await?;
        info!("Subscribed to {address}, polling every {:?}", self.poll_interval);

        while connection.is_connected().await {
            endpoint.send(connection, &REQUEST_BASIC_INFO).await?;
            let frame = endpoint.latest(connection).await?;
            *polls += 1;

            if !frame.is_empty() {
                match bms::decode(&frame) {
                    Some(status) => reporter.battery_status(address, &status),
                    None => debug!("Ignoring frame from {address}: {frame:02x?}"),
                }
            }

            sleep(self.poll_interval).await;
        }

        Ok(())
    }
}
