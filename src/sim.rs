//! A simulated radio link for testing the protocol without hardware
//!
//! [`pair`] produces two connected [`SimTransceiver`]s backed by in-process
//! channels. Time is virtual: each end keeps its own clock that only
//! advances when the end does something that takes time, and frames carry
//! their transmission time so a receiver's clock is pulled forward by what
//! it hears. Runs are deterministic and finish instantly regardless of the
//! configured delays. Each end derives its device timestamps from its
//! virtual time plus a configurable offset, which makes the clock-offset
//! cancellation of the ranging formula observable in tests.
//!
//! Frames cross the link with a configurable flight time. A [`FaultPlan`]
//! injects losses and corruption at chosen points, addressed by a global
//! frame index that counts every transmission attempt on the link.

use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::radio::{ReceiveError, SendTime, Transceiver, TransmitError};
use crate::time::{TIME_MAX, UUS_TO_DTU};

/// Time the simulated radio spends between queueing a frame and the frame
/// leaving the antenna, in device time units
const TX_TURNAROUND: u64 = 20 * UUS_TO_DTU;

/// Real-time limit on a simulated wait with a receive timeout configured
///
/// Virtual time never makes a test wait; if nothing arrives within this
/// much real time, nothing is coming and the configured timeout is deemed
/// to have elapsed. Generous against scheduling hiccups, short enough that
/// failure paths resolve quickly.
const REAL_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(200);

/// Real-time limit on a simulated wait with no timeout configured
///
/// Hitting this means the peer is gone or wedged; the wait then reports a
/// frame-wait timeout rather than hanging the test.
const REAL_WAIT: std::time::Duration = std::time::Duration::from_secs(5);

/// What to do to a single transmission attempt
#[derive(Clone, Copy, Debug)]
enum Fault {
    Drop,
    Corrupt,
    Garble,
    RejectTx,
}

/// Scripted faults, addressed by global frame index
///
/// The index counts every `start_transmit` call on the link, both directions
/// combined, starting at zero. In a clean DS-TWR exchange index 0 is the
/// Poll, 1 the Response, 2 the Final and 3 its repeat; the next exchange
/// starts at 4.
#[derive(Clone, Debug, Default)]
pub struct FaultPlan {
    faults: HashMap<u64, Fault>,
}

impl FaultPlan {
    /// A plan with no faults
    pub fn new() -> Self {
        Self::default()
    }

    /// Silently loses the numbered frame
    ///
    /// The sender still sees a successful transmission and a TX timestamp.
    pub fn drop_frame(mut self, index: u64) -> Self {
        self.faults.insert(index, Fault::Drop);
        self
    }

    /// Delivers the numbered frame with its header damaged
    ///
    /// The frame passes the FCS check but no longer matches any expected
    /// message type.
    pub fn corrupt_frame(mut self, index: u64) -> Self {
        self.faults.insert(index, Fault::Corrupt);
        self
    }

    /// Delivers the numbered frame as an FCS failure
    pub fn garble_frame(mut self, index: u64) -> Self {
        self.faults.insert(index, Fault::Garble);
        self
    }

    /// Makes the radio reject the numbered transmission attempt
    pub fn reject_transmit(mut self, index: u64) -> Self {
        self.faults.insert(index, Fault::RejectTx);
        self
    }
}

/// Configuration of a simulated link
#[derive(Clone, Debug)]
pub struct SimConfig {
    /// One-way flight time between the two ends, in device time units
    ///
    /// Roughly 213 units per metre.
    pub flight_time: u64,

    /// Clock offset of the first transceiver, in device time units
    pub offset_a: u64,

    /// Clock offset of the second transceiver, in device time units
    pub offset_b: u64,

    /// Scripted faults
    pub faults: FaultPlan,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            flight_time: 0,
            offset_a: 0,
            offset_b: 0,
            faults: FaultPlan::new(),
        }
    }
}

/// A frame in flight
struct Airframe {
    payload: Vec<u8>,
    /// Global virtual time at which the frame left the antenna
    tx_global: u64,
    garbled: bool,
}

struct Link {
    /// Next global frame index, shared by both ends
    frame_index: Mutex<u64>,
    faults: HashMap<u64, Fault>,
}

/// A simulated transceiver, one end of a [`pair`]
///
/// The two ends are meant to be driven from separate threads, one running an
/// initiator and one a responder. All waits are bounded in real time, so a
/// lost peer shows up as a receive timeout rather than a hung test.
///
/// Each end keeps its own virtual time, advanced by its own actions and
/// synchronized forward by the frames it receives. Nothing an end does can
/// move the other end's time, so receive-window deadlines are deterministic
/// no matter how the two threads interleave in real time.
pub struct SimTransceiver {
    link: Arc<Link>,
    tx: Sender<Airframe>,
    rx: Receiver<Airframe>,
    offset: u64,
    flight_time: u64,
    /// This end's virtual time, in global (offset-free) device time units
    local_now: u64,

    pending: Option<Airframe>,
    /// A received frame that belongs beyond the current receive window
    stashed: Option<Airframe>,
    last_tx_ts: u64,
    last_rx_ts: u64,
    rx_timeout_uus: Option<u32>,
}

/// Creates a connected pair of simulated transceivers
pub fn pair(config: SimConfig) -> (SimTransceiver, SimTransceiver) {
    let link = Arc::new(Link {
        frame_index: Mutex::new(0),
        faults: config.faults.faults,
    });
    let (tx_a, rx_b) = channel();
    let (tx_b, rx_a) = channel();

    let a = SimTransceiver {
        link: Arc::clone(&link),
        tx: tx_a,
        rx: rx_a,
        offset: config.offset_a,
        flight_time: config.flight_time,
        local_now: 0,
        pending: None,
        stashed: None,
        last_tx_ts: 0,
        last_rx_ts: 0,
        rx_timeout_uus: None,
    };
    let b = SimTransceiver {
        link,
        tx: tx_b,
        rx: rx_b,
        offset: config.offset_b,
        flight_time: config.flight_time,
        local_now: 0,
        pending: None,
        stashed: None,
        last_tx_ts: 0,
        last_rx_ts: 0,
        rx_timeout_uus: None,
    };
    (a, b)
}

impl SimTransceiver {
    fn device_time(&self, global: u64) -> u64 {
        global.wrapping_add(self.offset) & TIME_MAX
    }

    /// Moves this end's virtual time forward to `to`, never backward
    fn bump_to(&mut self, to: u64) {
        if self.local_now < to {
            self.local_now = to;
        }
    }

    fn take_fault(&self) -> Option<Fault> {
        let mut index = self.link.frame_index.lock().unwrap();
        let fault = self.link.faults.get(&*index).copied();
        *index += 1;
        fault
    }
}

impl Transceiver for SimTransceiver {
    fn start_transmit(
        &mut self,
        frame: &[u8],
        send_time: SendTime,
        _expect_response: bool,
    ) -> Result<(), TransmitError> {
        let fault = self.take_fault();
        if let Some(Fault::RejectTx) = fault {
            trace!("sim: transmission rejected by fault plan");
            return Err(TransmitError::Rejected);
        }

        let now = self.local_now;
        let tx_global = match send_time {
            SendTime::Now => now + TX_TURNAROUND,
            SendTime::Delayed(slot) => {
                // The slot is in this end's device time. A target more than
                // half the 40-bit range ahead is really in the past.
                let target = (slot.value() as u64) << 8;
                let ahead = target.wrapping_sub(self.device_time(now)) & TIME_MAX;
                if ahead > TIME_MAX / 2 {
                    return Err(TransmitError::DelayedSendTooLate);
                }
                now + ahead
            }
        };

        let mut payload = frame.to_vec();
        let mut garbled = false;
        let mut dropped = false;
        match fault {
            Some(Fault::Corrupt) => payload[5] ^= 0xff,
            Some(Fault::Garble) => garbled = true,
            Some(Fault::Drop) => dropped = true,
            _ => (),
        }

        self.pending = if dropped {
            // The sender still experiences a normal transmission.
            trace!("sim: frame dropped by fault plan");
            self.last_tx_ts = self.device_time(tx_global);
            self.bump_to(tx_global);
            None
        } else {
            Some(Airframe {
                payload,
                tx_global,
                garbled,
            })
        };
        Ok(())
    }

    fn wait_transmit(&mut self) -> nb::Result<(), TransmitError> {
        if let Some(frame) = self.pending.take() {
            self.last_tx_ts = self.device_time(frame.tx_global);
            self.bump_to(frame.tx_global);
            // A closed peer just means nobody is listening.
            let _ = self.tx.send(frame);
        }
        Ok(())
    }

    fn read_tx_timestamp(&mut self) -> [u8; 5] {
        let bytes = self.last_tx_ts.to_le_bytes();
        [bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]]
    }

    fn read_rx_timestamp(&mut self) -> [u8; 5] {
        let bytes = self.last_rx_ts.to_le_bytes();
        [bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]]
    }

    fn set_rx_after_tx_delay(&mut self, _delay_uus: u32) {
        // Receptions are driven by the channel; the delay has no observable
        // effect in virtual time.
    }

    fn set_rx_timeout(&mut self, timeout_uus: Option<u32>) {
        self.rx_timeout_uus = timeout_uus;
    }

    fn enable_receiver(&mut self) {
        // Frames queue in the channel whether or not the receiver is armed.
    }

    fn wait_receive(&mut self, buffer: &mut [u8]) -> nb::Result<usize, ReceiveError> {
        let window_open = self.local_now;
        let deadline = self
            .rx_timeout_uus
            .map(|uus| window_open + uus as u64 * UUS_TO_DTU);
        let real_limit = if deadline.is_some() {
            REAL_TIMEOUT
        } else {
            REAL_WAIT
        };

        let frame = match self.stashed.take() {
            Some(frame) => frame,
            None => match self.rx.recv_timeout(real_limit) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    // Nothing is coming. Let the configured timeout elapse
                    // in virtual time and report it; without one, behave as
                    // if an idle watchdog had fired.
                    if let Some(deadline) = deadline {
                        self.bump_to(deadline);
                    }
                    return Err(nb::Error::Other(ReceiveError::FrameWaitTimeout));
                }
            },
        };

        let rx_global = frame.tx_global + self.flight_time;

        // A frame from beyond the window is not received by it: the window
        // times out first. The frame stays around for the next window, just
        // as a radio keeps hearing what is on the air.
        if let Some(deadline) = deadline {
            if rx_global > deadline {
                self.stashed = Some(frame);
                self.bump_to(deadline);
                return Err(nb::Error::Other(ReceiveError::FrameWaitTimeout));
            }
        }

        self.bump_to(rx_global);

        if frame.garbled {
            return Err(nb::Error::Other(ReceiveError::Fcs));
        }

        self.last_rx_ts = self.device_time(rx_global);
        buffer[..frame.payload.len()].copy_from_slice(&frame.payload);
        Ok(frame.payload.len())
    }

    fn reset_receiver(&mut self) {
        // The channel holds frames in flight, and a receiver reset doesn't
        // remove what is on the air. Nothing to clear.
    }

    fn delay_us(&mut self, us: u32) {
        self.local_now += us as u64 * UUS_TO_DTU;
    }
}
