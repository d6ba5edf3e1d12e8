//! The responding side of the ranging exchange

use core::num::Wrapping;

use nb::block;
use tracing::{debug, trace};

use crate::frame;
use crate::radio::{SendTime, Transceiver};
use crate::ranging::{compute_time_of_flight, ExchangeTimestamps, RangingResult};
use crate::time::Instant;

use super::{ExchangeError, RangingConfig};

/// The responding node of a ranging exchange
///
/// Waits indefinitely for a Poll, answers with a Response, then receives the
/// Final frame twice. The distance comes out of the repeated Final: its
/// payload carries the initiator's timestamps, while the RX timestamp of the
/// first Final is the local capture that goes into the formula.
pub struct Responder<T: Transceiver> {
    radio: T,
    config: RangingConfig,
    seq: Wrapping<u8>,
}

impl<T> Responder<T>
where
    T: Transceiver,
{
    /// Creates a responder driving the given radio
    pub fn new(radio: T, config: RangingConfig) -> Self {
        Responder {
            radio,
            config,
            seq: Wrapping(0),
        }
    }

    /// Serves ranging exchanges forever, reporting each result
    ///
    /// Calls `report` once per completed exchange. Abandoned exchanges are
    /// logged and the loop carries on.
    pub fn run(&mut self, mut report: impl FnMut(RangingResult)) -> ! {
        loop {
            match self.run_once() {
                Ok(result) => report(result),
                Err(error) => debug!(%error, "ranging exchange abandoned"),
            }
        }
    }

    /// Serves a single ranging exchange
    ///
    /// Blocks until a Poll arrives and the exchange runs to completion or
    /// fails. On failure the radio is left ready for the next Poll.
    pub fn run_once(&mut self) -> Result<RangingResult, ExchangeError> {
        let mut buffer = [0; 128];

        // Wait for a Poll, with no timeout; an idle responder listens
        // indefinitely.
        self.radio.set_rx_timeout(None);
        self.radio.enable_receiver();
        let len = match block!(self.radio.wait_receive(&mut buffer)) {
            Ok(len) => len,
            Err(error) => {
                self.radio.reset_receiver();
                return Err(error.into());
            }
        };
        if !frame::matches_header(&buffer[..len], &frame::POLL_HEADER) {
            return Err(ExchangeError::FrameMismatch);
        }
        let poll_rx_ts = Instant::from_le_bytes(self.radio.read_rx_timestamp());
        trace!("poll received");

        // Response. The receive window for the first Final gets a timeout;
        // the radio opens it by itself after the programmed RX-after-TX
        // delay.
        self.radio
            .set_rx_after_tx_delay(self.config.resp_tx_to_final_rx_delay_uus);
        self.radio
            .set_rx_timeout(Some(self.config.final_rx_timeout_uus));

        let response = frame::encode_response(self.seq.0);
        self.radio.start_transmit(&response, SendTime::Now, true)?;
        block!(self.radio.wait_transmit()).map_err(ExchangeError::Transmit)?;
        let resp_tx_ts = Instant::from_le_bytes(self.radio.read_tx_timestamp());
        trace!(seq = self.seq.0, "response sent");

        // First Final frame. Its RX timestamp is the local capture the
        // formula needs; its payload is superseded by the repeat and gets
        // ignored. The sequence number moves on whatever the outcome.
        let outcome = block!(self.radio.wait_receive(&mut buffer));
        self.seq += Wrapping(1);
        let len = match outcome {
            Ok(len) => len,
            Err(error) => {
                self.radio.reset_receiver();
                return Err(error.into());
            }
        };
        if !frame::matches_header(&buffer[..len], &frame::FINAL_HEADER) {
            return Err(ExchangeError::FrameMismatch);
        }
        let final_rx_ts = Instant::from_le_bytes(self.radio.read_rx_timestamp());
        trace!("final received");

        // Repeated Final frame, which carries the initiator's actual final
        // TX timestamp. It arrives on the initiator's schedule rather than
        // the radio's RX-after-TX timing, so the timeout is cleared and the
        // receiver re-armed by hand.
        self.radio.set_rx_timeout(None);
        self.radio.enable_receiver();
        let outcome = block!(self.radio.wait_receive(&mut buffer));
        self.seq += Wrapping(1);
        let len = match outcome {
            Ok(len) => len,
            Err(error) => {
                self.radio.reset_receiver();
                return Err(error.into());
            }
        };
        if !frame::matches_header(&buffer[..len], &frame::FINAL_HEADER) {
            return Err(ExchangeError::FrameMismatch);
        }
        let embedded = frame::decode_final_timestamps(&buffer[..len])
            .map_err(|_| ExchangeError::FrameMismatch)?;

        let result = compute_time_of_flight(&ExchangeTimestamps {
            embedded,
            poll_rx: poll_rx_ts.lower_32(),
            resp_tx: resp_tx_ts.lower_32(),
            final_rx: final_rx_ts.lower_32(),
        });
        debug!(
            distance = result.distance,
            time_of_flight = result.time_of_flight,
            "ranging exchange completed",
        );
        Ok(result)
    }

    /// Releases the radio
    pub fn into_radio(self) -> T {
        self.radio
    }
}
