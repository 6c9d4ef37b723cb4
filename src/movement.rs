//! Move-to-target strategies.
//!
//! Desks differ in how they accept a target height. Firmware with a
//! reference-input channel takes the encoded height directly and stops by
//! itself; older firmware only understands up/down pulses, so the height has
//! to be polled and the desk nudged until it is close enough.

use crate::codec;
use crate::constants::{
    COMMAND_UUID, JOG_INTERVAL, JOG_TOLERANCE, REFERENCE_INPUT_INTERVAL, REFERENCE_INPUT_UUID,
};
use crate::error::DeskError;
use crate::monitor::read_telemetry;
use crate::transport::Transport;
use crate::types::{DeskCommand, Direction, MoveOutcome, StrategyKind};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cooperative cancellation flag shared between a session and its move loop.
#[derive(Debug, Clone, Default)]
pub struct MoveToken(Arc<AtomicBool>);

impl MoveToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn same_as(&self, other: &MoveToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Everything a move loop needs, owned so it can run as a spawned task.
pub struct MoveContext {
    pub address: String,
    pub transport: Arc<dyn Transport>,
    pub token: MoveToken,
}

#[async_trait]
pub trait MoveStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Drives the desk toward `target`, which the caller has already range-checked.
    async fn drive(&self, ctx: &MoveContext, target: f64) -> Result<MoveOutcome, DeskError>;
}

impl StrategyKind {
    pub fn build(self) -> Arc<dyn MoveStrategy> {
        match self {
            StrategyKind::ReferenceInput => Arc::new(ReferenceInput),
            StrategyKind::PollingJog => Arc::new(PollingJog),
        }
    }
}

/// Streams the target height to the reference-input characteristic until
/// the desk reports zero speed.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceInput;

#[async_trait]
impl MoveStrategy for ReferenceInput {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ReferenceInput
    }

    async fn drive(&self, ctx: &MoveContext, target: f64) -> Result<MoveOutcome, DeskError> {
        let transport = ctx.transport.as_ref();
        let payload = codec::encode(target)?;

        let (current, _) = read_telemetry(transport).await?;
        if codec::encode(current).ok() == Some(payload) {
            debug!(address = %ctx.address, height = current, "Already at target");
            return Ok(MoveOutcome::AlreadyAtTarget);
        }

        // Wakeup followed by stop arms the reference input
        transport
            .write(COMMAND_UUID, &DeskCommand::Wakeup.bytes(), true)
            .await?;
        transport
            .write(COMMAND_UUID, &DeskCommand::Stop.bytes(), true)
            .await?;

        info!(address = %ctx.address, from = current, to = target, "Moving to target");
        while !ctx.token.is_cancelled() {
            transport.write(REFERENCE_INPUT_UUID, &payload, true).await?;
            tokio::time::sleep(REFERENCE_INPUT_INTERVAL).await;

            let (height, speed) = read_telemetry(transport).await?;
            debug!(address = %ctx.address, height, speed, "Moving");
            if speed == 0.0 {
                info!(address = %ctx.address, height, "Desk stopped");
                return Ok(MoveOutcome::Reached);
            }
        }

        debug!(address = %ctx.address, "Move cancelled");
        Ok(MoveOutcome::Cancelled)
    }
}

/// Polls the height and pulses up/down until within [`JOG_TOLERANCE`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PollingJog;

#[async_trait]
impl MoveStrategy for PollingJog {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PollingJog
    }

    async fn drive(&self, ctx: &MoveContext, target: f64) -> Result<MoveOutcome, DeskError> {
        let transport = ctx.transport.as_ref();
        let mut intended: Option<Direction> = None;
        let mut previous: Option<f64> = None;

        loop {
            if ctx.token.is_cancelled() {
                debug!(address = %ctx.address, "Move cancelled");
                return Ok(MoveOutcome::Cancelled);
            }

            let (height, _) = read_telemetry(transport).await?;
            if (height - target).abs() <= JOG_TOLERANCE {
                transport
                    .write(COMMAND_UUID, &DeskCommand::Stop.bytes(), false)
                    .await?;
                info!(address = %ctx.address, height, "Reached target");
                return Ok(MoveOutcome::Reached);
            }

            let intended = *intended.get_or_insert_with(|| {
                let direction = Direction::towards(height, target);
                info!(
                    address = %ctx.address,
                    from = height,
                    to = target,
                    ?direction,
                    "Moving to target"
                );
                direction
            });

            // Travel against the intended direction means the desk's own
            // collision protection kicked in
            if let Some(previous) = previous {
                let reversed = match intended {
                    Direction::Up => height < previous,
                    Direction::Down => height > previous,
                };
                if reversed {
                    warn!(
                        address = %ctx.address,
                        height,
                        previous,
                        "Desk moved against the requested direction, aborting move"
                    );
                    return Ok(MoveOutcome::SafetyAbort { height });
                }
            }
            previous = Some(height);

            let step = Direction::towards(height, target);
            debug!(address = %ctx.address, height, ?step, "Jogging");
            transport
                .write(COMMAND_UUID, &step.command().bytes(), false)
                .await?;
            tokio::time::sleep(JOG_INTERVAL).await;
        }
    }
}
