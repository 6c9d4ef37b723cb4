use crate::constants::SCAN_TIMEOUT;
use crate::error::TransportError;
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

/// Called once per pushed notification, in delivery order.
pub type NotificationHandler = Box<dyn FnMut(Vec<u8>) + Send + 'static>;

/// Whether a characteristic can be found in the desk's GATT table.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CharacteristicStatus {
    Present,
    ServiceMissing,
    CharacteristicMissing,
}

/// The narrow slice of a BLE stack the desk logic needs.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Live link state, never cached.
    async fn is_connected(&self) -> Result<bool, TransportError>;

    /// Not every platform supports explicit pairing; those return
    /// [`TransportError::NotImplemented`].
    async fn pair(&self) -> Result<(), TransportError>;

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, TransportError>;

    /// `ack` selects a write-with-response.
    async fn write(
        &self,
        characteristic: Uuid,
        data: &[u8],
        ack: bool,
    ) -> Result<(), TransportError>;

    fn characteristic_status(&self, service: Uuid, characteristic: Uuid) -> CharacteristicStatus;

    /// Subscribes to `characteristic` and returns once the handler is registered.
    async fn start_notify(
        &self,
        characteristic: Uuid,
        handler: NotificationHandler,
    ) -> Result<(), TransportError>;
}

/// True when `address` names the peripheral with this MAC or platform id.
///
/// macOS hides the MAC and identifies devices by a CoreBluetooth UUID, so the
/// id is matched as a substring. An empty address matches nothing.
fn identifies(address: &str, mac: &str, id: &str) -> bool {
    let address = address.trim();
    if address.is_empty() {
        return false;
    }
    mac.eq_ignore_ascii_case(address)
        || id
            .to_ascii_lowercase()
            .contains(&address.to_ascii_lowercase())
}

pub(crate) async fn first_adapter() -> Result<Adapter, TransportError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(TransportError::NoAdapter)
}

/// btleplug-backed link to a single desk.
///
/// The peripheral is resolved lazily on the first `connect`, by scanning
/// until a device with the configured address shows up.
pub struct BleTransport {
    address: String,
    peripheral: Mutex<Option<Peripheral>>,
}

impl BleTransport {
    pub fn new(address: impl Into<String>) -> Self {
        BleTransport {
            address: address.into(),
            peripheral: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn matches(&self, peripheral: &Peripheral) -> bool {
        identifies(
            &self.address,
            &peripheral.address().to_string(),
            &format!("{:?}", peripheral.id()),
        )
    }

    async fn resolve(&self) -> Result<Peripheral, TransportError> {
        let cached = self.peripheral.lock().clone();
        if let Some(peripheral) = cached {
            return Ok(peripheral);
        }
        if self.address.trim().is_empty() {
            return Err(TransportError::DeviceNotFound(self.address.clone()));
        }

        let adapter = first_adapter().await?;
        let mut events = adapter.events().await?;
        adapter.start_scan(ScanFilter::default()).await?;

        let mut found = adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| self.matches(p));

        let deadline = Instant::now() + SCAN_TIMEOUT;
        while found.is_none() {
            match tokio::time::timeout_at(deadline, events.next()).await {
                Ok(Some(CentralEvent::DeviceDiscovered(id)))
                | Ok(Some(CentralEvent::DeviceUpdated(id))) => {
                    let peripheral = adapter.peripheral(&id).await?;
                    if self.matches(&peripheral) {
                        found = Some(peripheral);
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            }
        }

        adapter.stop_scan().await?;

        let peripheral =
            found.ok_or_else(|| TransportError::DeviceNotFound(self.address.clone()))?;
        *self.peripheral.lock() = Some(peripheral.clone());
        Ok(peripheral)
    }

    fn connected_peripheral(&self) -> Result<Peripheral, TransportError> {
        self.peripheral.lock().clone().ok_or(TransportError::NotConnected)
    }

    fn find_characteristic(
        &self,
        uuid: Uuid,
    ) -> Result<(Peripheral, Characteristic), TransportError> {
        let peripheral = self.connected_peripheral()?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))?;
        Ok((peripheral, characteristic))
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let peripheral = self.resolve().await?;
        peripheral.connect().await?;
        peripheral.discover_services().await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected_peripheral()?.disconnect().await?;
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool, TransportError> {
        let peripheral = self.peripheral.lock().clone();
        match peripheral {
            Some(peripheral) => Ok(peripheral.is_connected().await?),
            None => Ok(false),
        }
    }

    async fn pair(&self) -> Result<(), TransportError> {
        // btleplug leaves pairing to the operating system
        Err(TransportError::NotImplemented("pairing"))
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, TransportError> {
        let (peripheral, characteristic) = self.find_characteristic(characteristic)?;
        Ok(peripheral.read(&characteristic).await?)
    }

    async fn write(
        &self,
        characteristic: Uuid,
        data: &[u8],
        ack: bool,
    ) -> Result<(), TransportError> {
        let (peripheral, characteristic) = self.find_characteristic(characteristic)?;
        let write_type = if ack {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        peripheral.write(&characteristic, data, write_type).await?;
        Ok(())
    }

    fn characteristic_status(&self, service: Uuid, characteristic: Uuid) -> CharacteristicStatus {
        let Some(peripheral) = self.peripheral.lock().clone() else {
            return CharacteristicStatus::ServiceMissing;
        };
        match peripheral.services().into_iter().find(|s| s.uuid == service) {
            None => CharacteristicStatus::ServiceMissing,
            Some(s) if s.characteristics.iter().any(|c| c.uuid == characteristic) => {
                CharacteristicStatus::Present
            }
            Some(_) => CharacteristicStatus::CharacteristicMissing,
        }
    }

    async fn start_notify(
        &self,
        characteristic: Uuid,
        mut handler: NotificationHandler,
    ) -> Result<(), TransportError> {
        let (peripheral, target) = self.find_characteristic(characteristic)?;
        let mut notifications = peripheral.notifications().await?;
        peripheral.subscribe(&target).await?;

        tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid == characteristic {
                    handler(notification.value);
                }
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MACOS_ID: &str = "PeripheralId(3f1c9a52-0b8e-4d6a-9c21-7e5f0a1b2c3d)";

    #[test]
    fn matches_mac_case_insensitively() {
        assert!(identifies("aa:bb:cc:dd:ee:ff", "AA:BB:CC:DD:EE:FF", "PeripheralId(hci0)"));
        assert!(!identifies("AA:BB:CC:DD:EE:00", "AA:BB:CC:DD:EE:FF", "PeripheralId(hci0)"));
    }

    #[test]
    fn matches_platform_id() {
        assert!(identifies(
            "3F1C9A52-0B8E-4D6A-9C21-7E5F0A1B2C3D",
            "00:00:00:00:00:00",
            MACOS_ID
        ));
    }

    #[test]
    fn empty_address_matches_nothing() {
        assert!(!identifies("", "AA:BB:CC:DD:EE:FF", MACOS_ID));
        assert!(!identifies("  ", "AA:BB:CC:DD:EE:FF", MACOS_ID));
    }

    #[tokio::test]
    async fn empty_address_is_not_resolved() {
        let transport = BleTransport::new("");
        assert!(matches!(
            transport.connect().await,
            Err(TransportError::DeviceNotFound(_))
        ));
        assert!(!transport.is_connected().await.unwrap());
    }
}
