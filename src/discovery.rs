use crate::constants::{ADVERTISED_SERVICE_UUID, SCAN_TIMEOUT};
use crate::error::TransportError;
use crate::transport::first_adapter;
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Peripheral as _, ScanFilter};
use futures::stream::StreamExt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// What a scan learned about one nearby device.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    pub address: String,
    pub local_name: Option<String>,
    pub services: Vec<Uuid>,
}

pub type AdvertisementFilter = dyn Fn(&Advertisement) -> bool + Send + Sync;

#[async_trait]
pub trait Scanner: Send + Sync {
    /// Returns the first advertisement accepted by `filter`, or `None` when the scan ends.
    async fn scan_for(
        &self,
        filter: &AdvertisementFilter,
    ) -> Result<Option<Advertisement>, TransportError>;
}

pub fn is_desk(advertisement: &Advertisement) -> bool {
    advertisement.services.contains(&ADVERTISED_SERVICE_UUID)
}

pub struct BleScanner {
    timeout: Duration,
}

impl Default for BleScanner {
    fn default() -> Self {
        BleScanner {
            timeout: SCAN_TIMEOUT,
        }
    }
}

impl BleScanner {
    pub fn with_timeout(timeout: Duration) -> Self {
        BleScanner { timeout }
    }
}

#[async_trait]
impl Scanner for BleScanner {
    async fn scan_for(
        &self,
        filter: &AdvertisementFilter,
    ) -> Result<Option<Advertisement>, TransportError> {
        let adapter = first_adapter().await?;
        let mut events = adapter.events().await?;
        adapter
            .start_scan(ScanFilter {
                services: vec![ADVERTISED_SERVICE_UUID],
            })
            .await?;

        debug!("Scanning for desks...");
        let deadline = Instant::now() + self.timeout;
        let mut found = None;
        while found.is_none() {
            let id = match tokio::time::timeout_at(deadline, events.next()).await {
                Ok(Some(CentralEvent::DeviceDiscovered(id)))
                | Ok(Some(CentralEvent::DeviceUpdated(id))) => id,
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            };
            let peripheral = adapter.peripheral(&id).await?;
            if let Some(properties) = peripheral.properties().await? {
                let advertisement = Advertisement {
                    address: properties.address.to_string(),
                    local_name: properties.local_name,
                    services: properties.services,
                };
                if filter(&advertisement) {
                    found = Some(advertisement);
                }
            }
        }

        adapter.stop_scan().await?;
        Ok(found)
    }
}

/// Looks for a desk with `scanner`. Scan failures count as "not found".
pub async fn discover_with(scanner: &dyn Scanner) -> Option<String> {
    match scanner.scan_for(&is_desk).await {
        Ok(Some(advertisement)) => {
            info!(
                address = %advertisement.address,
                name = advertisement.local_name.as_deref().unwrap_or("unknown"),
                "Discovered desk"
            );
            Some(advertisement.address)
        }
        Ok(None) => None,
        Err(e) => {
            debug!(error = %e, "Desk discovery failed");
            None
        }
    }
}

/// Single scan pass over the first Bluetooth adapter.
pub async fn discover() -> Option<String> {
    discover_with(&BleScanner::default()).await
}
