use std::time::Duration;

use log::{error, info};
use tokio::time::sleep;

use crate::adapter::Adapter;
use crate::config::AppConfig;
use crate::filter::FilterPolicy;
use crate::indicator::StatusIndicator;
use crate::messages::SessionOutcome;
use crate::report::{Reporter, format_services};
use crate::scanner::Scanner;
use crate::session::Session;

/// Half period of the "adapter is dead" blink.
const FAILURE_BLINK: Duration = Duration::from_millis(500);

/// Owns the adapter and alternates scanning with (in exact-target mode)
/// talking to the target.
pub struct Manager<A, I, R> {
    adapter: A,
    indicator: I,
    reporter: R,
    scanner: Scanner,
    session: Session,
    interscan_delay: Duration,
}

impl<A, I, R> Manager<A, I, R>
where
    A: Adapter,
    I: StatusIndicator,
    R: Reporter,
{
    pub fn new(adapter: A, indicator: I, reporter: R, config: &AppConfig) -> Self {
        let scan = config.scan.clone().unwrap_or_default();
        Manager {
            adapter,
            indicator,
            reporter,
            scanner: Scanner::new(config.filter_policy(), &scan),
            session: Session::new(&config.session.clone().unwrap_or_default()),
            interscan_delay: scan.interscan_delay(),
        }
    }

    /// Runs forever. If the adapter cannot be enabled, the indicator blinks
    /// instead; there is nobody to read an exit code.
    pub async fn run_loop(&mut self) {
        info!("Enabling adapter...");
        if let Err(err) = self.adapter.enable().await {
            error!("Error initializing BLE: {err}");
            self.signal_failure().await;
            return;
        }
        info!("Adapter enabled successfully");

        match self.scanner.policy() {
            FilterPolicy::ExactMac(target) => info!("Looking for {target}..."),
            FilterPolicy::ServiceOrNameMatch { services, name } => {
                let services: Vec<u16> = services.iter().copied().collect();
                info!(
                    "Looking for devices with {} services{}...",
                    format_services(&services),
                    name.as_ref()
                        .map(|name| format!(" or names containing {name:?}"))
                        .unwrap_or_default()
                );
            }
        }

        loop {
            self.run_cycle().await;
        }
    }

    /// One scan window, the session it may lead to, and the pause after.
    pub async fn run_cycle(&mut self) -> Vec<SessionOutcome> {
        self.indicator.set(true);

        let matched = self
            .scanner
            .run_window(&mut self.adapter, &mut self.reporter)
            .await;

        let target = match self.scanner.policy() {
            FilterPolicy::ExactMac(target) => Some(*target),
            FilterPolicy::ServiceOrNameMatch { .. } => None,
        };

        let mut outcomes = Vec::new();
        if let Some(target) = target {
            for sighting in matched.iter().filter(|sighting| sighting.address == target) {
                let outcome = self
                    .session
                    .run(&mut self.adapter, sighting.address, &mut self.reporter)
                    .await;
                outcomes.push(outcome);
            }
        }

        self.indicator.set(false);
        sleep(self.interscan_delay).await;

        outcomes
    }

    async fn signal_failure(&mut self) {
        loop {
            self.indicator.set(true);
            sleep(FAILURE_BLINK).await;
            self.indicator.set(false);
            sleep(FAILURE_BLINK).await;
        }
    }
}
