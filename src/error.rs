use crate::codec::{DecodeError, EncodeError};
use crate::constants::{MAX_HEIGHT, MIN_HEIGHT};
use thiserror::Error;
use uuid::Uuid;

/// Failures of the underlying Bluetooth link.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),

    #[error("No Bluetooth adapter found")]
    NoAdapter,

    #[error("Device {0} not found")]
    DeviceNotFound(String),

    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("Not connected")]
    NotConnected,

    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("Device error: {0}")]
    DeviceError(String),
}

#[derive(Error, Debug)]
pub enum DeskError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("target position of {target:.3} meters exceeds maximum of {max:.3}", max = MAX_HEIGHT)]
    AboveMaximum { target: f64 },

    #[error("target position of {target:.3} meters exceeds minimum of {min:.3}", min = MIN_HEIGHT)]
    BelowMinimum { target: f64 },

    #[error("Move task failed: {0}")]
    MoveTask(String),
}

impl DeskError {
    /// Range check shared by every entry point that accepts a height.
    pub fn check_height(target: f64) -> Result<(), DeskError> {
        if target > MAX_HEIGHT {
            Err(DeskError::AboveMaximum { target })
        } else if target < MIN_HEIGHT || target.is_nan() {
            Err(DeskError::BelowMinimum { target })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_messages_round_to_three_decimals() {
        let msg = DeskError::check_height(1.5).unwrap_err().to_string();
        assert_eq!(msg, "target position of 1.500 meters exceeds maximum of 1.270");

        let msg = DeskError::check_height(0.12345).unwrap_err().to_string();
        assert_eq!(msg, "target position of 0.123 meters exceeds minimum of 0.620");
    }

    #[test]
    fn boundaries_are_accepted() {
        assert!(DeskError::check_height(MIN_HEIGHT).is_ok());
        assert!(DeskError::check_height(MAX_HEIGHT).is_ok());
        assert!(DeskError::check_height(f64::NAN).is_err());
    }

    #[test]
    fn transport_errors_pass_through() {
        let err: DeskError =
            TransportError::CharacteristicNotFound(crate::constants::DPG_UUID).into();
        assert!(err.to_string().contains("99fa0011"));
    }
}
