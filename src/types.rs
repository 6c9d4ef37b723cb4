use crate::constants::{COMMAND_UUID, REFERENCE_INPUT_UUID};
use strum_macros::{Display, EnumIter, EnumString};
use uuid::Uuid;

/// Fixed two-byte opcodes understood by the desk controller.
#[derive(Debug, EnumIter, Clone, Copy, Eq, PartialEq, Hash)]
pub enum DeskCommand {
    Up,
    Down,
    Stop,
    Wakeup,
    ReferenceInputStop,
}

impl DeskCommand {
    pub const fn bytes(self) -> [u8; 2] {
        match self {
            DeskCommand::Up => [0x47, 0x00],
            DeskCommand::Down => [0x46, 0x00],
            DeskCommand::Stop => [0xFF, 0x00],
            DeskCommand::Wakeup => [0xFE, 0x00],
            DeskCommand::ReferenceInputStop => [0x01, 0x80],
        }
    }

    /// Characteristic the opcode is written to.
    pub const fn characteristic(self) -> Uuid {
        match self {
            DeskCommand::ReferenceInputStop => REFERENCE_INPUT_UUID,
            _ => COMMAND_UUID,
        }
    }
}

/// How a move-to-target is driven, picked per desk firmware.
#[derive(Debug, Display, EnumString, EnumIter, Clone, Copy, Eq, PartialEq, Default)]
#[strum(serialize_all = "kebab-case")]
pub enum StrategyKind {
    /// Stream the target height to the reference-input characteristic.
    #[default]
    ReferenceInput,
    /// Pulse up/down commands while polling the height.
    PollingJog,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn towards(from: f64, to: f64) -> Self {
        if to >= from {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    pub fn command(self) -> DeskCommand {
        match self {
            Direction::Up => DeskCommand::Up,
            Direction::Down => DeskCommand::Down,
        }
    }
}

/// How a `move_to_target` call ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveOutcome {
    /// The desk reported the target reached (or stopped on its own).
    Reached,
    /// The desk was already at the target; nothing was written.
    AlreadyAtTarget,
    /// The desk travelled against the requested direction and the loop gave up.
    SafetyAbort { height: f64 },
    /// The session was stopped from outside.
    Cancelled,
    /// Another move was in flight; this request was dropped.
    AlreadyMoving,
}
