//! Connection lifecycle with bounded retry.

use crate::constants::{
    COMMAND_UUID, DPG_UUID, DPG_WAKE_STAGE_ONE, DPG_WAKE_STAGE_TWO, RETRY_BASE_DELAY, RETRY_COUNT,
};
use crate::error::TransportError;
use crate::transport::Transport;
use crate::types::DeskCommand;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How often and how patiently `connect` retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts made after the first failure.
    pub retries: u32,
    /// Delay before retry `n` is `base_delay * n`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            retries: RETRY_COUNT,
            base_delay: RETRY_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

pub struct ConnectionManager {
    address: String,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    exit_on_fail: bool,
}

impl ConnectionManager {
    pub fn new(address: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        ConnectionManager {
            address: address.into(),
            transport,
            policy: RetryPolicy::default(),
            exit_on_fail: false,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Exit the process with status 1 instead of returning the error once
    /// retries are exhausted.
    pub fn exit_on_fail(mut self, exit_on_fail: bool) -> Self {
        self.exit_on_fail = exit_on_fail;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Connects and wakes the desk, retrying failed attempts with a growing delay.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let mut attempt = 0;
        loop {
            debug!(address = %self.address, attempt, "Connecting");
            let result = match self.transport.connect().await {
                Ok(()) => wake(self.transport.as_ref(), &self.address).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    info!(address = %self.address, "Connected");
                    return Ok(());
                }
                Err(e) if attempt >= self.policy.retries => {
                    error!(
                        address = %self.address,
                        critical = true,
                        error = %e,
                        "Connection failed"
                    );
                    if self.exit_on_fail {
                        std::process::exit(1);
                    }
                    return Err(e);
                }
                Err(e) => {
                    attempt += 1;
                    warn!(
                        address = %self.address,
                        error = %e,
                        "Failed to connect, retrying ({}/{})...",
                        attempt,
                        self.policy.retries
                    );
                    tokio::time::sleep(self.policy.delay_for(attempt)).await;
                }
            }
        }
    }

    pub async fn disconnect(&self) -> Result<(), TransportError> {
        debug!(address = %self.address, "Disconnecting");
        self.transport.disconnect().await
    }

    pub async fn is_connected(&self) -> Result<bool, TransportError> {
        self.transport.is_connected().await
    }
}

/// Wakes the controller from sleep.
///
/// DPG1C controllers need the two-stage DPG sequence first; desks without
/// the DPG characteristic skip it.
pub(crate) async fn wake(transport: &dyn Transport, address: &str) -> Result<(), TransportError> {
    match transport.write(DPG_UUID, &DPG_WAKE_STAGE_ONE, true).await {
        Ok(()) => transport.write(DPG_UUID, &DPG_WAKE_STAGE_TWO, true).await?,
        Err(TransportError::CharacteristicNotFound(_)) => {
            debug!(address = %address, "No DPG characteristic, skipping DPG wakeup");
        }
        Err(e) => return Err(e),
    }
    transport
        .write(COMMAND_UUID, &DeskCommand::Wakeup.bytes(), true)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDesk;
    use parking_lot::Mutex;
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer};
    use tracing_subscriber::prelude::*;

    const ADDRESS: &str = "AA:AA:AA:AA:AA:AA";

    #[derive(Debug, Default)]
    struct LogCounts {
        warn: usize,
        error: usize,
        critical: usize,
    }

    /// Tallies warn and error events seen on the current thread.
    struct CountingLayer(Arc<Mutex<LogCounts>>);

    impl<S: Subscriber> Layer<S> for CountingLayer {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let metadata = event.metadata();
            let mut counts = self.0.lock();
            match *metadata.level() {
                Level::WARN => counts.warn += 1,
                Level::ERROR => {
                    counts.error += 1;
                    if metadata.fields().field("critical").is_some() {
                        counts.critical += 1;
                    }
                }
                _ => {}
            }
        }
    }

    async fn connect_counting_logs(failures: usize) -> (Result<(), TransportError>, LogCounts) {
        let counts = Arc::new(Mutex::new(LogCounts::default()));
        let subscriber = tracing_subscriber::registry().with(CountingLayer(counts.clone()));
        let _guard = tracing::subscriber::set_default(subscriber);

        let desk = Arc::new(MockDesk::new(1.0).with_connect_failures(failures));
        let manager = ConnectionManager::new(ADDRESS, desk);
        assert_eq!(manager.policy(), RetryPolicy::default());
        let result = manager.connect().await;

        let counts = std::mem::take(&mut *counts.lock());
        (result, counts)
    }

    #[test]
    fn backoff_grows_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(300));
        assert_eq!(policy.delay_for(2), Duration::from_millis(600));
        assert_eq!(policy.delay_for(3), Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_fourth_attempt() {
        let desk = Arc::new(MockDesk::new(1.0).with_connect_failures(3));
        let manager = ConnectionManager::new(ADDRESS, desk.clone());

        let started = tokio::time::Instant::now();
        manager.connect().await.unwrap();

        assert_eq!(desk.connect_attempts(), 4);
        assert!(manager.is_connected().await.unwrap());
        // 0.3 + 0.6 + 0.9 seconds of backoff
        assert!(started.elapsed() >= Duration::from_millis(1800));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_retries() {
        let desk = Arc::new(MockDesk::new(1.0).with_connect_failures(10));
        let manager = ConnectionManager::new(ADDRESS, desk.clone());

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::DeviceError(_)));
        assert_eq!(desk.connect_attempts(), 4);
        assert!(!manager.is_connected().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn each_retry_logs_one_warning() {
        let (result, counts) = connect_counting_logs(3).await;

        assert!(result.is_ok());
        assert_eq!(counts.warn, 3);
        assert_eq!(counts.error, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_logs_a_single_critical_error() {
        let (result, counts) = connect_counting_logs(4).await;

        assert!(result.is_err());
        assert_eq!(counts.warn, 3);
        assert_eq!(counts.error, 1);
        assert_eq!(counts.critical, 1);
    }

    #[tokio::test]
    async fn wake_writes_dpg_sequence_then_wakeup() {
        let desk = Arc::new(MockDesk::new(1.0));
        ConnectionManager::new(ADDRESS, desk.clone()).connect().await.unwrap();

        let writes = desk.writes();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0].characteristic, DPG_UUID);
        assert_eq!(writes[0].data, DPG_WAKE_STAGE_ONE.to_vec());
        assert_eq!(writes[1].data, DPG_WAKE_STAGE_TWO.to_vec());
        assert_eq!(writes[2].characteristic, COMMAND_UUID);
        assert_eq!(writes[2].data, DeskCommand::Wakeup.bytes().to_vec());
    }

    #[tokio::test]
    async fn wake_tolerates_missing_dpg() {
        let desk = Arc::new(MockDesk::new(1.0).without_characteristic(DPG_UUID));
        ConnectionManager::new(ADDRESS, desk.clone()).connect().await.unwrap();

        let writes = desk.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].data, DeskCommand::Wakeup.bytes().to_vec());
    }

    #[tokio::test]
    async fn disconnect_is_not_retried() {
        let desk = Arc::new(MockDesk::new(1.0));
        let manager = ConnectionManager::new(ADDRESS, desk.clone());
        manager.connect().await.unwrap();
        manager.disconnect().await.unwrap();
        assert!(!manager.is_connected().await.unwrap());
    }
}
