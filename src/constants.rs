use std::time::Duration;
use uuid::Uuid;

// GATT identifiers
pub const TELEMETRY_SERVICE_UUID: Uuid = Uuid::from_u128(0x99fa0020_338a_1024_8a49_009c0215f78a);
pub const HEIGHT_UUID: Uuid = Uuid::from_u128(0x99fa0021_338a_1024_8a49_009c0215f78a);
pub const COMMAND_UUID: Uuid = Uuid::from_u128(0x99fa0002_338a_1024_8a49_009c0215f78a);
pub const REFERENCE_INPUT_UUID: Uuid = Uuid::from_u128(0x99fa0031_338a_1024_8a49_009c0215f78a);
pub const ADVERTISED_SERVICE_UUID: Uuid = Uuid::from_u128(0x99fa0001_338a_1024_8a49_009c0215f78a);
pub const DPG_UUID: Uuid = Uuid::from_u128(0x99fa0011_338a_1024_8a49_009c0215f78a);

// DPG1C wake sequence, written in two stages
pub const DPG_WAKE_STAGE_ONE: [u8; 3] = [0x7F, 0x86, 0x00];
pub const DPG_WAKE_STAGE_TWO: [u8; 20] = [
    0x7F, 0x86, 0x80, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C,
    0x0D, 0x0E, 0x0F, 0x10, 0x11,
];

// Desk height range in meters
pub const MIN_HEIGHT: f64 = 0.62;
pub const MAX_HEIGHT: f64 = 1.27;

/// Raw counter units per meter (and per meter/second for speed).
pub const COUNTS_PER_METER: f64 = 10_000.0;

pub const TELEMETRY_FRAME_LEN: usize = 4;

// Connection retry
pub const RETRY_COUNT: u32 = 3;
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(300);

// Movement
pub const REFERENCE_INPUT_INTERVAL: Duration = Duration::from_millis(200);
pub const JOG_INTERVAL: Duration = Duration::from_millis(200);
pub const JOG_TOLERANCE: f64 = 0.005;

/// Readings closer than this (meters, meters/second) are treated as unchanged.
pub const DEDUP_THRESHOLD: f64 = 0.001;

pub const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Length of a textual Bluetooth address, e.g. `AA:AA:AA:AA:AA:AA`.
pub const ADDRESS_LEN: usize = 17;
