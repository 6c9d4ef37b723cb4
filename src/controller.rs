use crate::connection::{self, ConnectionManager, RetryPolicy};
use crate::error::DeskError;
use crate::monitor::{self, read_telemetry, TelemetryObserver};
use crate::movement::{MoveContext, MoveStrategy, MoveToken};
use crate::transport::{BleTransport, Transport};
use crate::types::{DeskCommand, MoveOutcome, StrategyKind};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error};

/// The in-flight move. `done` closes when the move task finishes.
struct MoveSession {
    token: MoveToken,
    done: watch::Receiver<()>,
}

/// One desk, reachable over one transport.
///
/// Only one move runs at a time per controller; a second `move_to_target`
/// while one is in flight is logged and dropped. Nothing stops two separate
/// controllers from driving the same desk.
pub struct DeskController {
    address: String,
    transport: Arc<dyn Transport>,
    connection: ConnectionManager,
    strategy: Arc<dyn MoveStrategy>,
    moving: AtomicBool,
    session: Mutex<Option<MoveSession>>,
}

impl DeskController {
    pub fn new(address: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        let address = address.into();
        DeskController {
            connection: ConnectionManager::new(address.clone(), transport.clone()),
            address,
            transport,
            strategy: StrategyKind::default().build(),
            moving: AtomicBool::new(false),
            session: Mutex::new(None),
        }
    }

    /// Controller for a desk reached through the platform Bluetooth stack.
    pub fn ble(address: impl Into<String>) -> Self {
        let address = address.into();
        let transport = Arc::new(BleTransport::new(address.clone()));
        Self::new(address, transport)
    }

    pub fn with_strategy(mut self, kind: StrategyKind) -> Self {
        self.strategy = kind.build();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.connection = self.connection.with_policy(policy);
        self
    }

    pub fn exit_on_fail(mut self, exit_on_fail: bool) -> Self {
        self.connection = self.connection.exit_on_fail(exit_on_fail);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// True while this controller is driving a move.
    pub fn is_moving(&self) -> bool {
        self.moving.load(Ordering::SeqCst)
    }

    pub async fn connect(&self) -> Result<(), DeskError> {
        Ok(self.connection.connect().await?)
    }

    pub async fn disconnect(&self) -> Result<(), DeskError> {
        Ok(self.connection.disconnect().await?)
    }

    pub async fn is_connected(&self) -> Result<bool, DeskError> {
        Ok(self.connection.is_connected().await?)
    }

    /// Pairs with the desk. On platforms without a pairing API the
    /// [`TransportError::NotImplemented`](crate::TransportError::NotImplemented)
    /// error is returned as is.
    pub async fn pair(&self) -> Result<(), DeskError> {
        Ok(self.transport.pair().await?)
    }

    /// Wakes the controller from sleep; only DPG1C controllers need this.
    pub async fn wakeup(&self) -> Result<(), DeskError> {
        Ok(connection::wake(self.transport.as_ref(), &self.address).await?)
    }

    /// Moves up for the fixed pulse duration of the desk controller (about a second).
    pub async fn move_up(&self) -> Result<(), DeskError> {
        self.send(DeskCommand::Up, false).await
    }

    pub async fn move_down(&self) -> Result<(), DeskError> {
        self.send(DeskCommand::Down, false).await
    }

    pub async fn get_height(&self) -> Result<f64, DeskError> {
        Ok(self.get_height_and_speed().await?.0)
    }

    pub async fn get_speed(&self) -> Result<f64, DeskError> {
        Ok(self.get_height_and_speed().await?.1)
    }

    pub async fn get_height_and_speed(&self) -> Result<(f64, f64), DeskError> {
        read_telemetry(self.transport.as_ref()).await
    }

    /// Registers `observer` for pushed height updates and returns once subscribed.
    pub async fn monitor(&self, observer: TelemetryObserver) -> Result<(), DeskError> {
        monitor::monitor(self.transport.as_ref(), &self.address, observer).await
    }

    /// Moves the desk to `target` meters and waits until the move ends.
    pub async fn move_to_target(&self, target: f64) -> Result<MoveOutcome, DeskError> {
        DeskError::check_height(target)?;

        if self.moving.swap(true, Ordering::SeqCst) {
            error!(address = %self.address, "Already moving");
            return Ok(MoveOutcome::AlreadyMoving);
        }

        let token = MoveToken::new();
        let (done_tx, done_rx) = watch::channel(());
        *self.session.lock() = Some(MoveSession {
            token: token.clone(),
            done: done_rx,
        });

        let ctx = MoveContext {
            address: self.address.clone(),
            transport: self.transport.clone(),
            token: token.clone(),
        };
        let strategy = self.strategy.clone();
        let task = tokio::spawn(async move {
            let _done = done_tx;
            strategy.drive(&ctx, target).await
        });

        let result = task.await;

        {
            let mut session = self.session.lock();
            if session.as_ref().is_some_and(|s| s.token.same_as(&token)) {
                *session = None;
            }
        }
        self.moving.store(false, Ordering::SeqCst);

        match result {
            Ok(outcome) => outcome,
            Err(e) => Err(DeskError::MoveTask(e.to_string())),
        }
    }

    /// Cancels any move in flight, waits for it to unwind, then sends the stop commands.
    pub async fn stop(&self) -> Result<(), DeskError> {
        self.moving.store(false, Ordering::SeqCst);

        let session = self.session.lock().take();
        if let Some(mut session) = session {
            debug!(address = %self.address, "Desk was moving, waiting for it to stop");
            session.token.cancel();
            // Resolves with an error once the move task drops its sender
            while session.done.changed().await.is_ok() {}
        }

        debug!(address = %self.address, "Sending stop commands");
        let (stop, reference_stop) = tokio::join!(
            self.send(DeskCommand::Stop, false),
            self.send(DeskCommand::ReferenceInputStop, false)
        );
        stop?;
        reference_stop
    }

    async fn send(&self, command: DeskCommand, ack: bool) -> Result<(), DeskError> {
        self.transport
            .write(command.characteristic(), &command.bytes(), ack)
            .await
            .map_err(DeskError::from)
    }
}
