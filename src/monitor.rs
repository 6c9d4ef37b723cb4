//! Height/speed telemetry: one-shot reads and pushed notifications.

use crate::codec;
use crate::constants::{DEDUP_THRESHOLD, HEIGHT_UUID, TELEMETRY_SERVICE_UUID};
use crate::error::DeskError;
use crate::transport::{CharacteristicStatus, Transport};
use tracing::{debug, error};

/// Receiver of deduplicated telemetry.
///
/// The variant decides whether speed changes alone are worth a callback.
pub enum TelemetryObserver {
    Height(Box<dyn FnMut(f64) + Send + 'static>),
    HeightAndSpeed(Box<dyn FnMut(f64, f64) + Send + 'static>),
}

impl TelemetryObserver {
    pub fn height(callback: impl FnMut(f64) + Send + 'static) -> Self {
        TelemetryObserver::Height(Box::new(callback))
    }

    pub fn height_and_speed(callback: impl FnMut(f64, f64) + Send + 'static) -> Self {
        TelemetryObserver::HeightAndSpeed(Box::new(callback))
    }

    pub fn wants_speed(&self) -> bool {
        matches!(self, TelemetryObserver::HeightAndSpeed(_))
    }

    fn dispatch(&mut self, height: f64, speed: f64) {
        match self {
            TelemetryObserver::Height(callback) => callback(height),
            TelemetryObserver::HeightAndSpeed(callback) => callback(height, speed),
        }
    }
}

/// Drops readings that only differ by transport jitter.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    previous_height: f64,
    previous_speed: f64,
    track_speed: bool,
}

impl Deduplicator {
    pub fn new(track_speed: bool) -> Self {
        Deduplicator {
            previous_height: 0.0,
            previous_speed: 0.0,
            track_speed,
        }
    }

    /// Returns true if the reading should be delivered, remembering it if so.
    pub fn accept(&mut self, height: f64, speed: f64) -> bool {
        let height_unchanged = (height - self.previous_height).abs() < DEDUP_THRESHOLD;
        let speed_unchanged =
            !self.track_speed || (speed - self.previous_speed).abs() < DEDUP_THRESHOLD;
        if height_unchanged && speed_unchanged {
            return false;
        }
        self.previous_height = height;
        self.previous_speed = speed;
        true
    }
}

pub(crate) async fn read_telemetry(transport: &dyn Transport) -> Result<(f64, f64), DeskError> {
    let raw = transport.read(HEIGHT_UUID).await?;
    Ok(codec::decode(&raw)?)
}

/// Subscribes `observer` to height notifications.
///
/// A desk without the telemetry service or characteristic is logged and
/// left alone; only transport failures while subscribing are returned.
pub(crate) async fn monitor(
    transport: &dyn Transport,
    address: &str,
    mut observer: TelemetryObserver,
) -> Result<(), DeskError> {
    match transport.characteristic_status(TELEMETRY_SERVICE_UUID, HEIGHT_UUID) {
        CharacteristicStatus::Present => {}
        CharacteristicStatus::ServiceMissing => {
            error!(address = %address, "Output service not found");
            return Ok(());
        }
        CharacteristicStatus::CharacteristicMissing => {
            error!(address = %address, "No output characteristic found");
            return Ok(());
        }
    }

    let mut dedup = Deduplicator::new(observer.wants_speed());
    let handler_address = address.to_string();
    let handler = Box::new(move |raw: Vec<u8>| match codec::decode(&raw) {
        Ok((height, speed)) => {
            debug!(address = %handler_address, "Got data: {}m {}m/s", height, speed);
            if dedup.accept(height, speed) {
                observer.dispatch(height, speed);
            }
        }
        Err(e) => {
            error!(address = %handler_address, error = %e, "Dropping malformed telemetry frame");
        }
    });

    debug!(address = %address, "Starting notify");
    transport.start_notify(HEIGHT_UUID, handler).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_frame;
    use crate::mock::MockDesk;
    use parking_lot::Mutex;
    use std::sync::Arc;

    const ADDRESS: &str = "AA:AA:AA:AA:AA:AA";

    #[test]
    fn suppresses_jitter() {
        let mut dedup = Deduplicator::new(false);
        assert!(dedup.accept(1.0, 0.0));
        assert!(!dedup.accept(1.0005, 0.0));
        assert!(!dedup.accept(0.9995, 0.05));
        assert!(dedup.accept(1.002, 0.0));
    }

    #[test]
    fn speed_counts_only_when_tracked() {
        let mut dedup = Deduplicator::new(true);
        assert!(dedup.accept(1.0, 0.0));
        assert!(dedup.accept(1.0, 0.02));
        assert!(!dedup.accept(1.0, 0.0205));
    }

    fn recorder() -> (Arc<Mutex<Vec<(f64, f64)>>>, TelemetryObserver, TelemetryObserver) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let a = seen.clone();
        let b = seen.clone();
        (
            seen,
            TelemetryObserver::height(move |h| a.lock().push((h, 0.0))),
            TelemetryObserver::height_and_speed(move |h, s| b.lock().push((h, s))),
        )
    }

    #[tokio::test]
    async fn delivers_deduplicated_heights_in_order() {
        let mock = Arc::new(MockDesk::new(1.0));
        mock.connect().await.unwrap();
        let (seen, height_only, _) = recorder();

        monitor(mock.as_ref(), ADDRESS, height_only).await.unwrap();
        assert!(mock.has_subscriber());

        mock.push_notification(&encode_frame(3800, 0));
        mock.push_notification(&encode_frame(3805, 0));
        mock.push_notification(&encode_frame(3900, 120));
        mock.push_notification(&encode_frame(3700, -120));

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert!((seen[0].0 - 1.0).abs() < 1e-9);
        assert!((seen[1].0 - 1.01).abs() < 1e-9);
        assert!((seen[2].0 - 0.99).abs() < 1e-9);
    }

    #[tokio::test]
    async fn speed_observer_sees_speed_changes() {
        let mock = Arc::new(MockDesk::new(1.0));
        mock.connect().await.unwrap();
        let (seen, _, with_speed) = recorder();

        monitor(mock.as_ref(), ADDRESS, with_speed).await.unwrap();
        mock.push_notification(&encode_frame(3800, 0));
        mock.push_notification(&encode_frame(3800, 258));

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!((seen[1].1 - 0.0258).abs() < 1e-9);
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped() {
        let mock = Arc::new(MockDesk::new(1.0));
        mock.connect().await.unwrap();
        let (seen, height_only, _) = recorder();

        monitor(mock.as_ref(), ADDRESS, height_only).await.unwrap();
        mock.push_notification(&[0x00, 0x00, 0x00]);
        mock.push_notification(&encode_frame(0, 0));

        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn missing_service_is_soft_failure() {
        let mock = Arc::new(MockDesk::new(1.0).without_telemetry_service());
        mock.connect().await.unwrap();
        let (_, height_only, _) = recorder();

        monitor(mock.as_ref(), ADDRESS, height_only).await.unwrap();
        assert!(!mock.has_subscriber());
    }

    #[tokio::test]
    async fn missing_characteristic_is_soft_failure() {
        let mock = Arc::new(MockDesk::new(1.0).without_characteristic(HEIGHT_UUID));
        mock.connect().await.unwrap();
        let (_, _, with_speed) = recorder();

        monitor(mock.as_ref(), ADDRESS, with_speed).await.unwrap();
        assert!(!mock.has_subscriber());
    }

    #[tokio::test]
    async fn reads_are_live() {
        let mock = Arc::new(MockDesk::new(1.0));
        mock.connect().await.unwrap();
        let (h, _) = read_telemetry(mock.as_ref()).await.unwrap();
        assert!((h - 1.0).abs() < 1e-4);

        mock.set_height(1.2);
        let (h, _) = read_telemetry(mock.as_ref()).await.unwrap();
        assert!((h - 1.2).abs() < 1e-4);
    }
}
