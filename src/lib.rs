mod connection;
mod constants;
mod controller;
mod error;
mod monitor;
mod movement;
mod transport;
mod types;

pub mod codec;
pub mod config;
pub mod discovery;
pub mod mock;

pub use connection::{ConnectionManager, RetryPolicy};
pub use controller::DeskController;
pub use error::{DeskError, TransportError};
pub use monitor::{Deduplicator, TelemetryObserver};
pub use movement::{MoveContext, MoveStrategy, MoveToken, PollingJog, ReferenceInput};
pub use transport::{BleTransport, CharacteristicStatus, NotificationHandler, Transport};
pub use types::{DeskCommand, Direction, MoveOutcome, StrategyKind};

// Re-export commonly used items
pub use constants::{
    ADVERTISED_SERVICE_UUID, COMMAND_UUID, DPG_UUID, HEIGHT_UUID, MAX_HEIGHT, MIN_HEIGHT,
    REFERENCE_INPUT_UUID, RETRY_COUNT, TELEMETRY_SERVICE_UUID,
};
