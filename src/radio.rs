//! The radio transceiver contract consumed by the protocol core
//!
//! The ranging state machines drive the radio exclusively through the
//! [`Transceiver`] trait. Carrier configuration, antenna-delay calibration,
//! register-level I/O and physical scheduling all live behind this boundary;
//! the core only needs to queue frames, learn their timestamps, and wait on
//! receive windows.
//!
//! The wait methods are non-blocking in the `nb` sense: they return
//! [`nb::Result`] and are expected to be driven with `nb::block!`, which is
//! where the state machines suspend. Implementations backed by real hardware
//! would poll a status register here; the in-crate implementations poll a
//! channel ([`crate::sim`]) or a socket ([`crate::udp`]).

use thiserror::Error;

use crate::time::TxSlot;

/// The time at which a transmission will start
#[derive(Clone, Copy, Debug)]
pub enum SendTime {
    /// As fast as possible
    Now,

    /// At the given delayed-transmission slot
    Delayed(TxSlot),
}

/// An error reported by the radio when starting a transmission
///
/// Recoverable: the state machines abandon the current exchange and start
/// over.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum TransmitError {
    /// The radio rejected the transmission request
    #[error("transmitter rejected the frame")]
    Rejected,

    /// A delayed transmission was requested for a slot already in the past
    #[error("delayed send started too late")]
    DelayedSendTooLate,
}

/// An error reported by the radio while waiting for a frame
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum ReceiveError {
    /// No frame arrived within the configured receive timeout
    #[error("receive window timed out")]
    FrameWaitTimeout,

    /// A frame arrived but its checksum didn't verify
    #[error("frame checksum error")]
    Fcs,

    /// A frame arrived but its PHY header was in error
    #[error("PHY header error")]
    Phy,

    /// The receiver was overrun before the frame could be read out
    #[error("receiver overrun")]
    Overrun,
}

impl ReceiveError {
    /// Whether this outcome is a timeout rather than a frame error
    ///
    /// The state machines route both to the same recovery path; the
    /// distinction only matters for diagnostics.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ReceiveError::FrameWaitTimeout)
    }
}

/// A radio transceiver, as seen by the ranging protocol core
///
/// The contract assumes a single-threaded, strictly sequential call pattern:
/// one transmission or one receive window is in flight at a time, and
/// timestamps are read immediately after the wait that produced them.
pub trait Transceiver {
    /// Queues a frame and starts its transmission
    ///
    /// With `expect_response` set, the radio arms its receiver automatically
    /// once the transmission completes, after the configured
    /// [RX-after-TX delay](Self::set_rx_after_tx_delay).
    fn start_transmit(
        &mut self,
        frame: &[u8],
        send_time: SendTime,
        expect_response: bool,
    ) -> Result<(), TransmitError>;

    /// Waits for the queued transmission to complete
    fn wait_transmit(&mut self) -> nb::Result<(), TransmitError>;

    /// Reads the timestamp of the last completed transmission
    ///
    /// Five bytes, least significant first; widen with
    /// [`Instant::from_le_bytes`](crate::time::Instant::from_le_bytes).
    fn read_tx_timestamp(&mut self) -> [u8; 5];

    /// Reads the timestamp of the last good reception
    ///
    /// Five bytes, least significant first.
    fn read_rx_timestamp(&mut self) -> [u8; 5];

    /// Sets the delay between a transmission completing and the receiver
    /// being armed for the expected reply, in UWB microseconds
    ///
    /// Only takes effect for transmissions started with `expect_response`.
    fn set_rx_after_tx_delay(&mut self, delay_uus: u32);

    /// Sets the receive timeout, in UWB microseconds
    ///
    /// `None` disables the timeout; the receiver then waits indefinitely.
    /// The timeout is enforced by the radio: on expiry the pending wait
    /// reports [`ReceiveError::FrameWaitTimeout`] instead of blocking forever.
    fn set_rx_timeout(&mut self, timeout_uus: Option<u32>);

    /// Arms the receiver immediately
    fn enable_receiver(&mut self);

    /// Waits for the armed receive window to produce an outcome
    ///
    /// On a good frame, the payload is copied into `buffer` and its length
    /// is returned. Timeouts and frame errors are reported as
    /// [`ReceiveError`]s; the caller is expected to
    /// [reset the receiver](Self::reset_receiver) before trying again.
    fn wait_receive(&mut self, buffer: &mut [u8]) -> nb::Result<usize, ReceiveError>;

    /// Resets the receiver after an error or timeout
    ///
    /// Clears pending receive state so the next receive window starts clean.
    fn reset_receiver(&mut self);

    /// Suspends execution for the given number of microseconds
    ///
    /// Platform sleep hook used for the fixed inter-ranging delay and the
    /// short pause before the repeated Final frame. Simulated transceivers
    /// advance their virtual clock instead of sleeping.
    fn delay_us(&mut self, us: u32);
}
