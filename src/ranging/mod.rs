//! Implementation of double-sided two-way ranging
//!
//! Two nodes estimate the distance between them by exchanging timestamped
//! frames and algebraically cancelling clock-offset error, without sharing a
//! clock. The exchange uses four messages:
//!
//! 1. The initiator sends a Poll frame, recording its TX timestamp.
//! 2. The responder replies with a Response frame.
//! 3. The initiator sends a Final frame embedding its poll-TX, response-RX
//!    and (predicted) final-TX timestamps.
//! 4. The initiator repeats the Final frame, this time embedding the actual
//!    final-TX timestamp captured after message 3 went out.
//!
//! The responder records its own poll-RX, response-TX and final-RX timestamps
//! and combines them with the three values embedded in the repeated Final to
//! compute the time of flight and distance. The symmetric double-sided
//! formula cancels first-order clock-frequency offset between the two
//! devices; see [`compute_time_of_flight`].
//!
//! Each role runs as an independent blocking loop over a
//! [`Transceiver`](crate::radio::Transceiver): [`Initiator`] drives the
//! exchange, [`Responder`] reacts to it and produces a [`RangingResult`] per
//! completed exchange. Any lost, corrupted or unexpected frame abandons the
//! exchange in progress; both loops then return to their initial state, so a
//! single bad frame costs one measurement and nothing else.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::FinalTimestamps;
use crate::radio::{ReceiveError, TransmitError};
use crate::time::DEVICE_TIME_UNIT_SECONDS;

pub use initiator::Initiator;
pub use responder::Responder;

mod initiator;
mod responder;

#[cfg(test)]
pub(crate) mod mock;

/// Speed of light in air, in metres per second
pub const SPEED_OF_LIGHT: f64 = 299_702_547.0;

/// Configuration of the ranging exchange timing
///
/// The defaults reproduce the reference tuning for the 110 kbps / 1024-symbol
/// -preamble radio configuration, where a frame takes around 2.5 ms of air
/// time. The delays exist to keep both sides' receive windows aligned with
/// the other side's transmissions; the timeouts must cover the full length of
/// the expected frame.
#[derive(Clone, Copy, Debug)]
pub struct RangingConfig {
    /// TX antenna delay, in device time units
    ///
    /// Experimentally determined calibration value; the default is a typical
    /// figure, and real deployments should calibrate per device.
    pub antenna_delay: u16,

    /// Delay between ranging exchanges, in milliseconds
    pub inter_ranging_delay_ms: u32,

    /// Poll TX to response RX-window delay, in UWB microseconds
    pub poll_tx_to_resp_rx_delay_uus: u32,

    /// Receive timeout for the Response frame, in UWB microseconds
    pub resp_rx_timeout_uus: u32,

    /// Response RX to final TX delay, in UWB microseconds
    ///
    /// Basis for the predicted final-TX timestamp embedded in the first Final
    /// frame. Includes the air time of the Final frame itself.
    pub resp_rx_to_final_tx_delay_uus: u32,

    /// Response TX to final RX-window delay, in UWB microseconds
    pub resp_tx_to_final_rx_delay_uus: u32,

    /// Receive timeout for the Final frame, in UWB microseconds
    pub final_rx_timeout_uus: u32,

    /// Pause before retransmitting the Final frame, in microseconds
    pub final_repeat_pause_us: u32,
}

impl Default for RangingConfig {
    fn default() -> Self {
        RangingConfig {
            antenna_delay: 16436,
            inter_ranging_delay_ms: 1000,
            poll_tx_to_resp_rx_delay_uus: 150,
            resp_rx_timeout_uus: 5000,
            resp_rx_to_final_tx_delay_uus: 5000,
            resp_tx_to_final_rx_delay_uus: 500,
            final_rx_timeout_uus: 6000,
            final_repeat_pause_us: 100,
        }
    }
}

/// Why a ranging exchange was abandoned
///
/// Every variant is recoverable: the state machine resets transient radio
/// state and restarts from its initial state. None of these terminate the
/// ranging loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum ExchangeError {
    /// The radio rejected or missed a scheduled transmission
    #[error("transmission failed: {0}")]
    Transmit(#[from] TransmitError),

    /// No frame arrived within the receive window
    #[error("receive window timed out")]
    ReceiveTimeout,

    /// A frame arrived but could not be received cleanly
    #[error("frame reception failed: {0}")]
    Receive(ReceiveError),

    /// A clean frame arrived, but it is not the expected message
    #[error("received frame is not the expected message")]
    FrameMismatch,
}

impl From<ReceiveError> for ExchangeError {
    fn from(error: ReceiveError) -> Self {
        if error.is_timeout() {
            ExchangeError::ReceiveTimeout
        } else {
            ExchangeError::Receive(error)
        }
    }
}

/// The six timestamps of a completed exchange, truncated to 32 bits
///
/// Three come out of the repeated Final frame's payload and are in the
/// initiator's clock domain; three were captured locally by the responder in
/// its own clock domain. The formula only ever subtracts timestamps within
/// one domain, which is what makes it immune to the offset between the two.
#[derive(Clone, Copy, Debug)]
pub struct ExchangeTimestamps {
    /// The initiator's timestamps, as embedded in the repeated Final frame
    pub embedded: FinalTimestamps,

    /// When the Poll frame was received, in responder time
    pub poll_rx: u32,

    /// When the Response frame was transmitted, in responder time
    pub resp_tx: u32,

    /// When the first Final frame was received, in responder time
    pub final_rx: u32,
}

/// The product of a completed ranging exchange
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct RangingResult {
    /// Estimated one-way time of flight, in device time units
    ///
    /// Signed: measurement noise can push an estimate below zero for nodes
    /// that are very close together. Rejecting or clamping implausible values
    /// is left to the caller.
    pub tof_device_units: i64,

    /// Estimated one-way time of flight, in seconds
    pub time_of_flight: f64,

    /// Estimated distance, in metres
    ///
    /// Negative exactly when the time of flight is.
    pub distance: f64,
}

/// Computes time of flight and distance with the symmetric DS-TWR formula
///
/// With `Ra`/`Da` the initiator's round-trip and turnaround and `Rb`/`Db` the
/// responder's:
///
/// ```text
/// tof = (Ra × Rb − Da × Db) / (Ra + Rb + Da + Db)
/// ```
///
/// The four terms are 32-bit wrapping subtractions of truncated timestamps,
/// which give correct answers even if the 40-bit clock has wrapped between
/// the two captures, as long as they lie less than 2^32 device time units
/// apart. Because each term is measured on a single device's clock, a
/// constant clock offset between the devices cancels exactly, and the
/// symmetric form cancels clock-frequency offset to first order.
pub fn compute_time_of_flight(timestamps: &ExchangeTimestamps) -> RangingResult {
    let ra = timestamps
        .embedded
        .resp_rx
        .wrapping_sub(timestamps.embedded.poll_tx) as f64;
    let rb = timestamps.final_rx.wrapping_sub(timestamps.resp_tx) as f64;
    let da = timestamps
        .embedded
        .final_tx
        .wrapping_sub(timestamps.embedded.resp_rx) as f64;
    let db = timestamps.resp_tx.wrapping_sub(timestamps.poll_rx) as f64;

    let tof_device_units = ((ra * rb - da * db) / (ra + rb + da + db)) as i64;

    let time_of_flight = tof_device_units as f64 * DEVICE_TIME_UNIT_SECONDS;
    let distance = time_of_flight * SPEED_OF_LIGHT;

    RangingResult {
        tof_device_units,
        time_of_flight,
        distance,
    }
}
