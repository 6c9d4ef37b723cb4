//! In-memory desk for testing without hardware.
//!
//! [`MockDesk`] implements [`Transport`] and simulates just enough of the
//! controller to exercise every code path: pulse commands nudge the height,
//! reference-input writes step toward the requested height and report a
//! speed until it is reached, and notifications are pushed by the test.
//!
//! ```rust
//! use std::sync::Arc;
//! use desk_controller::mock::MockDesk;
//! use desk_controller::DeskController;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let mock = Arc::new(MockDesk::new(0.9));
//! let desk = DeskController::new("AA:AA:AA:AA:AA:AA", mock.clone());
//! desk.connect().await.unwrap();
//! assert!((desk.get_height().await.unwrap() - 0.9).abs() < 1e-4);
//! # });
//! ```

use crate::codec::{self, frame_from_units};
use crate::constants::{
    COMMAND_UUID, DPG_UUID, HEIGHT_UUID, MAX_HEIGHT, MIN_HEIGHT, REFERENCE_INPUT_UUID,
    TELEMETRY_SERVICE_UUID,
};
use crate::error::TransportError;
use crate::transport::{CharacteristicStatus, NotificationHandler, Transport};
use crate::types::DeskCommand;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use uuid::Uuid;

/// A write seen by the mock, in order of arrival.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    pub characteristic: Uuid,
    pub data: Vec<u8>,
    pub ack: bool,
}

impl RecordedWrite {
    pub fn is_command(&self, command: DeskCommand) -> bool {
        self.characteristic == command.characteristic() && self.data == command.bytes()
    }
}

#[derive(Default)]
struct MockState {
    connected: bool,
    height: f64,
    speed: f64,
    connect_failures: usize,
    connect_attempts: usize,
    writes: Vec<RecordedWrite>,
    missing: HashSet<Uuid>,
    service_missing: bool,
    handler: Option<NotificationHandler>,
    obstruction: Option<f64>,
    pair_supported: bool,
    paired: bool,
}

pub struct MockDesk {
    state: Mutex<MockState>,
    jog_step: f64,
    reference_step: f64,
}

impl MockDesk {
    /// Height change per up/down pulse.
    pub const DEFAULT_JOG_STEP: f64 = 0.004;
    /// Height change per reference-input write.
    pub const DEFAULT_REFERENCE_STEP: f64 = 0.01;

    pub fn new(height: f64) -> Self {
        MockDesk {
            state: Mutex::new(MockState {
                height,
                pair_supported: true,
                ..MockState::default()
            }),
            jog_step: Self::DEFAULT_JOG_STEP,
            reference_step: Self::DEFAULT_REFERENCE_STEP,
        }
    }

    /// Fail the first `count` connection attempts.
    pub fn with_connect_failures(self, count: usize) -> Self {
        self.state.lock().connect_failures = count;
        self
    }

    pub fn without_characteristic(self, uuid: Uuid) -> Self {
        self.state.lock().missing.insert(uuid);
        self
    }

    pub fn without_telemetry_service(self) -> Self {
        self.state.lock().service_missing = true;
        self
    }

    /// Upward travel past `height` trips the desk's anti-collision and makes it back off.
    pub fn with_obstruction_at(self, height: f64) -> Self {
        self.state.lock().obstruction = Some(height);
        self
    }

    pub fn without_pairing(self) -> Self {
        self.state.lock().pair_supported = false;
        self
    }

    pub fn with_steps(mut self, jog_step: f64, reference_step: f64) -> Self {
        self.jog_step = jog_step;
        self.reference_step = reference_step;
        self
    }

    pub fn height(&self) -> f64 {
        self.state.lock().height
    }

    pub fn speed(&self) -> f64 {
        self.state.lock().speed
    }

    pub fn set_height(&self, height: f64) {
        self.state.lock().height = height;
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.lock().connect_attempts
    }

    pub fn is_paired(&self) -> bool {
        self.state.lock().paired
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.state.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    pub fn count_command(&self, command: DeskCommand) -> usize {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|w| w.is_command(command))
            .count()
    }

    pub fn reference_writes(&self) -> usize {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|w| w.characteristic == REFERENCE_INPUT_UUID && w.data.len() == 2)
            .filter(|w| w.data != DeskCommand::ReferenceInputStop.bytes())
            .count()
    }

    pub fn has_subscriber(&self) -> bool {
        self.state.lock().handler.is_some()
    }

    /// Delivers a raw frame to the subscribed handler, if any.
    pub fn push_notification(&self, frame: &[u8]) -> bool {
        let handler = self.state.lock().handler.take();
        match handler {
            Some(mut handler) => {
                handler(frame.to_vec());
                let mut state = self.state.lock();
                if state.handler.is_none() {
                    state.handler = Some(handler);
                }
                true
            }
            None => false,
        }
    }

    fn jog(&self, state: &mut MockState, direction: f64) {
        let next = (state.height + direction * self.jog_step).clamp(MIN_HEIGHT, MAX_HEIGHT);
        match state.obstruction {
            Some(limit) if direction > 0.0 && next > limit => {
                state.height = (state.height - 2.0 * self.jog_step).max(MIN_HEIGHT);
            }
            _ => state.height = next,
        }
    }

    fn step_reference(&self, state: &mut MockState, raw: &[u8]) {
        let Ok((target, _)) = codec::decode(&[raw[0], raw[1], 0, 0]) else {
            return;
        };
        let diff = target - state.height;
        if diff.abs() < 1e-6 {
            state.speed = 0.0;
            return;
        }
        let step = diff.signum() * diff.abs().min(self.reference_step);
        state.height += step;
        state.speed = step;
    }
}

#[async_trait]
impl Transport for MockDesk {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(TransportError::DeviceError("simulated connect failure".into()));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.state.lock().connected = false;
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, TransportError> {
        Ok(self.state.lock().connected)
    }

    async fn pair(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.pair_supported {
            return Err(TransportError::NotImplemented("pairing"));
        }
        state.paired = true;
        Ok(())
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, TransportError> {
        let state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if characteristic != HEIGHT_UUID || state.missing.contains(&characteristic) {
            return Err(TransportError::CharacteristicNotFound(characteristic));
        }
        Ok(frame_from_units(state.height, state.speed).to_vec())
    }

    async fn write(
        &self,
        characteristic: Uuid,
        data: &[u8],
        ack: bool,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.missing.contains(&characteristic) {
            return Err(TransportError::CharacteristicNotFound(characteristic));
        }
        state.writes.push(RecordedWrite {
            characteristic,
            data: data.to_vec(),
            ack,
        });

        match characteristic {
            COMMAND_UUID if data == DeskCommand::Up.bytes() => self.jog(&mut state, 1.0),
            COMMAND_UUID if data == DeskCommand::Down.bytes() => self.jog(&mut state, -1.0),
            COMMAND_UUID if data == DeskCommand::Stop.bytes() => state.speed = 0.0,
            REFERENCE_INPUT_UUID if data == DeskCommand::ReferenceInputStop.bytes() => {
                state.speed = 0.0
            }
            REFERENCE_INPUT_UUID if data.len() == 2 => self.step_reference(&mut state, data),
            COMMAND_UUID | REFERENCE_INPUT_UUID | DPG_UUID => {}
            _ => return Err(TransportError::CharacteristicNotFound(characteristic)),
        }
        Ok(())
    }

    fn characteristic_status(&self, service: Uuid, characteristic: Uuid) -> CharacteristicStatus {
        let state = self.state.lock();
        if service != TELEMETRY_SERVICE_UUID || state.service_missing {
            CharacteristicStatus::ServiceMissing
        } else if characteristic != HEIGHT_UUID || state.missing.contains(&characteristic) {
            CharacteristicStatus::CharacteristicMissing
        } else {
            CharacteristicStatus::Present
        }
    }

    async fn start_notify(
        &self,
        characteristic: Uuid,
        handler: NotificationHandler,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if characteristic != HEIGHT_UUID {
            return Err(TransportError::CharacteristicNotFound(characteristic));
        }
        state.handler = Some(handler);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pulses_move_by_one_step() {
        let desk = MockDesk::new(1.0);
        desk.connect().await.unwrap();
        desk.write(COMMAND_UUID, &DeskCommand::Up.bytes(), false).await.unwrap();
        assert!((desk.height() - 1.004).abs() < 1e-9);
        desk.write(COMMAND_UUID, &DeskCommand::Down.bytes(), false).await.unwrap();
        assert!((desk.height() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn reference_input_reports_speed_until_reached() {
        let desk = MockDesk::new(1.0);
        desk.connect().await.unwrap();
        let target = codec::encode(1.015).unwrap();

        desk.write(REFERENCE_INPUT_UUID, &target, true).await.unwrap();
        assert!(desk.speed() > 0.0);
        desk.write(REFERENCE_INPUT_UUID, &target, true).await.unwrap();
        assert!((desk.height() - 1.015).abs() < 1e-9);
        desk.write(REFERENCE_INPUT_UUID, &target, true).await.unwrap();
        assert_eq!(desk.speed(), 0.0);
    }

    #[tokio::test]
    async fn requires_connection() {
        let desk = MockDesk::new(1.0);
        assert!(matches!(
            desk.read(HEIGHT_UUID).await,
            Err(TransportError::NotConnected)
        ));
    }
}
