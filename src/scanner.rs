use std::collections::HashSet;
use std::time::Duration;

use log::{debug, trace, warn};
use mac_address::MacAddress;
use tokio::time::{Instant, timeout_at};

use crate::adapter::{Adapter, ScanSubscription};
use crate::config::ScanConfig;
use crate::filter::FilterPolicy;
use crate::messages::{ScanResult, Sighting};
use crate::report::Reporter;

enum ScanState<S> {
    Idle,
    Scanning(S),
    /// Stop requested; the subscription, if one was opened, still gets
    /// emptied.
    Draining(Option<S>),
}

/// Drives scan windows and reports each matching device once per window.
pub struct Scanner {
    policy: FilterPolicy,
    dwell: Duration,
    drain: Duration,
    seen: HashSet<MacAddress>,
}

impl Scanner {
    pub fn new(policy: FilterPolicy, config: &ScanConfig) -> Self {
        Scanner {
            policy,
            dwell: config.dwell(),
            drain: config.drain(),
            seen: HashSet::new(),
        }
    }

    pub fn policy(&self) -> &FilterPolicy {
        &self.policy
    }

    /// Run a single window: start, dwell, stop, drain. Never fails; adapter
    /// errors end the window early.
    pub async fn run_window<A, R>(&mut self, adapter: &mut A, reporter: &mut R) -> Vec<Sighting>
    where
        A: Adapter,
        R: Reporter,
    {
        let mut matched = Vec::new();
        let mut state = ScanState::Idle;

        loop {
            state = match state {
                ScanState::Idle => {
                    self.seen.clear();
                    match adapter.start_scan().await {
                        Ok(scan) => {
                            debug!("Scanning for {:?}", self.dwell);
                            ScanState::Scanning(scan)
                        }
                        Err(err) => {
                            warn!("Scan error: {err}");
                            ScanState::Draining(None)
                        }
                    }
                }
                ScanState::Scanning(mut scan) => {
                    self.scan(&mut scan, reporter, &mut matched).await;
                    ScanState::Draining(Some(scan))
                }
                ScanState::Draining(scan) => {
                    if let Err(err) = adapter.stop_scan().await {
                        warn!("Failed to stop scan: {err}");
                    }
                    if let Some(mut scan) = scan {
                        self.drain(&mut scan, reporter, &mut matched).await;
                    }
                    self.seen.clear();
                    debug!("Scan window closed, {} device(s) matched", matched.len());
                    return matched;
                }
            };
        }
    }

    async fn scan<S, R>(&mut self, scan: &mut S, reporter: &mut R, matched: &mut Vec<Sighting>)
    where
        S: ScanSubscription,
        R: Reporter,
    {
        let deadline = Instant::now() + self.dwell;
        loop {
            match timeout_at(deadline, scan.next()).await {
                Err(_) => return,
                Ok(None) => {
                    debug!("Adapter ended the scan");
                    return;
                }
                Ok(Some(Err(err))) => {
                    warn!("Scan error: {err}");
                    return;
                }
                Ok(Some(Ok(result))) => {
                    if let Some(sighting) = self.observe(result, reporter) {
                        matched.push(sighting);
                        // The radio has to be free before connecting.
                        if self.policy.is_exact() {
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn drain<S, R>(&mut self, scan: &mut S, reporter: &mut R, matched: &mut Vec<Sighting>)
    where
        S: ScanSubscription,
        R: Reporter,
    {
        let deadline = Instant::now() + self.drain;
        loop {
            match timeout_at(deadline, scan.next()).await {
                Err(_) => {
                    debug!("Adapter still delivering after {:?}, giving up", self.drain);
                    return;
                }
                Ok(None) => return,
                Ok(Some(Err(err))) => {
                    debug!("Error while draining scan: {err}");
                    return;
                }
                Ok(Some(Ok(result))) => matched.extend(self.observe(result, reporter)),
            }
        }
    }

    fn observe<R: Reporter>(&mut self, result: ScanResult, reporter: &mut R) -> Option<Sighting> {
        if !self.seen.insert(result.address) {
            return None;
        }
        if !self.policy.matches(&result) {
            trace!("Ignoring {} ({} dBm)", result.address, result.rssi);
            return None;
        }
        let sighting = Sighting::from(&result);
        reporter.device_found(&sighting);
        Some(sighting)
    }
}
