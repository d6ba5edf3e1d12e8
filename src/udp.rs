//! A UDP-backed transceiver for running the two roles as separate processes
//!
//! Maps the radio contract onto a UDP socket pair, with device time derived
//! from the host's monotonic clock scaled to device time units. One UWB
//! microsecond is treated as one real microsecond for delays and timeouts;
//! the 2.5% difference doesn't matter at host time scales.
//!
//! Distances measured over this transport are dominated by scheduling jitter
//! between the two processes. The point is exercising the protocol end to
//! end over a real process boundary, not accuracy.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::thread;
use std::time::Duration;

use tracing::{trace, warn};

use crate::radio::{ReceiveError, SendTime, Transceiver, TransmitError};
use crate::time::TIME_MAX;

/// Device time units per nanosecond, as a ratio
///
/// The device clock ticks at 499.2 MHz × 128 = 63.8976 GHz.
const DTU_PER_NS: (u128, u128) = (638_976, 10_000);

/// A transceiver that exchanges frames over UDP
pub struct UdpTransceiver {
    socket: UdpSocket,
    peer: SocketAddr,
    epoch: std::time::Instant,
    pending: Option<(Vec<u8>, SendTime)>,
    last_tx_ts: u64,
    last_rx_ts: u64,
    rx_timeout_uus: Option<u32>,
}

impl UdpTransceiver {
    /// Binds a local socket and points it at the peer
    pub fn bind(local: impl ToSocketAddrs, peer: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(local)?;
        let peer = peer
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "peer address resolved to nothing"))?;

        Ok(UdpTransceiver {
            socket,
            peer,
            epoch: std::time::Instant::now(),
            pending: None,
            last_tx_ts: 0,
            last_rx_ts: 0,
            rx_timeout_uus: None,
        })
    }

    /// Current device time, 40 bits wrapping
    fn now(&self) -> u64 {
        let nanos = self.epoch.elapsed().as_nanos();
        (nanos * DTU_PER_NS.0 / DTU_PER_NS.1) as u64 & TIME_MAX
    }
}

impl Transceiver for UdpTransceiver {
    fn start_transmit(
        &mut self,
        frame: &[u8],
        send_time: SendTime,
        _expect_response: bool,
    ) -> Result<(), TransmitError> {
        if let SendTime::Delayed(slot) = send_time {
            // A target more than half the 40-bit range ahead is in the past.
            let target = (slot.value() as u64) << 8;
            let ahead = target.wrapping_sub(self.now()) & TIME_MAX;
            if ahead > TIME_MAX / 2 {
                return Err(TransmitError::DelayedSendTooLate);
            }
        }
        self.pending = Some((frame.to_vec(), send_time));
        Ok(())
    }

    fn wait_transmit(&mut self) -> nb::Result<(), TransmitError> {
        let (frame, send_time) = match self.pending.take() {
            Some(pending) => pending,
            None => return Ok(()),
        };

        if let SendTime::Delayed(slot) = send_time {
            let target = (slot.value() as u64) << 8;
            let ahead = target.wrapping_sub(self.now()) & TIME_MAX;
            if ahead <= TIME_MAX / 2 {
                let nanos = ahead as u128 * DTU_PER_NS.1 / DTU_PER_NS.0;
                thread::sleep(Duration::from_nanos(nanos as u64));
            }
        }

        self.socket
            .send_to(&frame, self.peer)
            .map_err(|error| {
                warn!(%error, "UDP send failed");
                nb::Error::Other(TransmitError::Rejected)
            })?;
        self.last_tx_ts = self.now();
        trace!(len = frame.len(), "frame sent");
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
        // Datagrams queue in the socket regardless; there is no receiver to
        // arm late.
    }

    fn set_rx_timeout(&mut self, timeout_uus: Option<u32>) {
        self.rx_timeout_uus = timeout_uus;
    }

    fn enable_receiver(&mut self) {
        // See `set_rx_after_tx_delay`.
    }

    fn wait_receive(&mut self, buffer: &mut [u8]) -> nb::Result<usize, ReceiveError> {
        let timeout = self
            .rx_timeout_uus
            .map(|uus| Duration::from_micros(uus as u64));
        if self.socket.set_read_timeout(timeout).is_err() {
            return Err(nb::Error::Other(ReceiveError::Phy));
        }

        loop {
            match self.socket.recv_from(buffer) {
                Ok((len, source)) => {
                    if source != self.peer {
                        trace!(%source, "ignoring datagram from unknown sender");
                        continue;
                    }
                    self.last_rx_ts = self.now();
                    return Ok(len);
                }
                Err(error)
                    if error.kind() == io::ErrorKind::WouldBlock
                        || error.kind() == io::ErrorKind::TimedOut =>
                {
                    return Err(nb::Error::Other(ReceiveError::FrameWaitTimeout));
                }
                Err(error) => {
                    warn!(%error, "UDP receive failed");
                    return Err(nb::Error::Other(ReceiveError::Phy));
                }
            }
        }
    }

    fn reset_receiver(&mut self) {
        // Drain stale datagrams so the next window starts clean.
        if self.socket.set_nonblocking(true).is_ok() {
            let mut scratch = [0; 1024];
            while self.socket.recv_from(&mut scratch).is_ok() {}
            let _ = self.socket.set_nonblocking(false);
        }
    }

    fn delay_us(&mut self, us: u32) {
        thread::sleep(Duration::from_micros(us as u64));
    }
}
