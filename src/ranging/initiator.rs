//! The initiating side of the ranging exchange

use core::num::Wrapping;

use nb::block;
use tracing::{debug, trace, warn};

use crate::frame::{self, FinalTimestamps};
use crate::radio::{SendTime, Transceiver};
use crate::time::{Duration, Instant};

use super::{ExchangeError, RangingConfig};

/// The initiating node of a ranging exchange
///
/// Sends the Poll, waits for the Response, then sends the Final frame twice;
/// the first Final carries a predicted TX timestamp, the repeat carries the
/// actual one. The initiator never learns the measured distance; that is
/// computed on the [responder](super::Responder).
pub struct Initiator<T: Transceiver> {
    radio: T,
    config: RangingConfig,
    seq: Wrapping<u8>,
}

impl<T> Initiator<T>
where
    T: Transceiver,
{
    /// Creates an initiator driving the given radio
    ///
    /// Programs the RX-after-TX delay and the Response receive timeout once,
    /// up front; they stay in effect for every exchange.
    pub fn new(mut radio: T, config: RangingConfig) -> Self {
        radio.set_rx_after_tx_delay(config.poll_tx_to_resp_rx_delay_uus);
        radio.set_rx_timeout(Some(config.resp_rx_timeout_uus));

        Initiator {
            radio,
            config,
            seq: Wrapping(0),
        }
    }

    /// Runs ranging exchanges forever
    ///
    /// Abandoned exchanges are logged and the loop carries on; a failure
    /// costs one measurement, nothing more.
    pub fn run(&mut self) -> ! {
        loop {
            match self.run_once() {
                Ok(()) => debug!("ranging exchange completed"),
                Err(error) => warn!(%error, "ranging exchange abandoned"),
            }
        }
    }

    /// Runs a single ranging exchange
    ///
    /// Blocks until the exchange completes or fails, including the idle
    /// delay that paces consecutive exchanges. On failure the radio is left
    /// ready for the next attempt.
    pub fn run_once(&mut self) -> Result<(), ExchangeError> {
        let mut buffer = [0; 128];

        // Poll. The receiver arms itself after the programmed RX-after-TX
        // delay, so the Response window opens without further action here.
        let poll = frame::encode_poll(self.seq.0);
        self.radio.start_transmit(&poll, SendTime::Now, true)?;
        block!(self.radio.wait_transmit()).map_err(ExchangeError::Transmit)?;
        let poll_tx_ts = Instant::from_le_bytes(self.radio.read_tx_timestamp());
        trace!(seq = self.seq.0, "poll sent");

        // The sequence number moves on whether or not a Response arrives, so
        // a retry after a timeout is distinguishable from a retransmission.
        let outcome = block!(self.radio.wait_receive(&mut buffer));
        self.seq += Wrapping(1);
        let len = match outcome {
            Ok(len) => len,
            Err(error) => {
                self.radio.reset_receiver();
                self.idle_delay();
                return Err(error.into());
            }
        };

        if !frame::matches_header(&buffer[..len], &frame::RESPONSE_HEADER) {
            self.idle_delay();
            return Err(ExchangeError::FrameMismatch);
        }
        let resp_rx_ts = Instant::from_le_bytes(self.radio.read_rx_timestamp());
        trace!("response received");

        // First Final frame. The embedded TX timestamp is a prediction: the
        // delayed-TX slot the configured delay lands in, plus the antenna
        // delay. `antenna_delay` is a u16, so the unwrap cannot fail.
        let antenna_delay = Duration::new(self.config.antenna_delay as u64).unwrap();
        let final_tx_slot = (resp_rx_ts
            + Duration::from_uus(self.config.resp_rx_to_final_tx_delay_uus))
        .delay_slot();
        let predicted_final_tx = final_tx_slot.tx_timestamp(antenna_delay);

        let final_frame = frame::encode_final(
            self.seq.0,
            FinalTimestamps {
                poll_tx: poll_tx_ts.lower_32(),
                resp_rx: resp_rx_ts.lower_32(),
                final_tx: predicted_final_tx.lower_32(),
            },
        );
        if let Err(error) = self.radio.start_transmit(&final_frame, SendTime::Now, false) {
            self.idle_delay();
            return Err(error.into());
        }
        block!(self.radio.wait_transmit()).map_err(ExchangeError::Transmit)?;
        let final_tx_ts = Instant::from_le_bytes(self.radio.read_tx_timestamp());
        self.seq += Wrapping(1);
        trace!(
            predicted = predicted_final_tx.value(),
            actual = final_tx_ts.value(),
            "final sent",
        );

        // Repeated Final frame, now carrying the actual TX timestamp of the
        // first one. The short pause gives the responder time to re-arm.
        self.radio.delay_us(self.config.final_repeat_pause_us);
        let repeat_frame = frame::encode_final(
            self.seq.0,
            FinalTimestamps {
                poll_tx: poll_tx_ts.lower_32(),
                resp_rx: resp_rx_ts.lower_32(),
                final_tx: final_tx_ts.lower_32(),
            },
        );
        if let Err(error) = self.radio.start_transmit(&repeat_frame, SendTime::Now, false) {
            self.idle_delay();
            return Err(error.into());
        }
        block!(self.radio.wait_transmit()).map_err(ExchangeError::Transmit)?;
        self.seq += Wrapping(1);
        trace!("final repeated");

        self.idle_delay();
        Ok(())
    }

    /// Releases the radio
    pub fn into_radio(self) -> T {
        self.radio
    }

    fn idle_delay(&mut self) {
        self.radio.delay_us(self.config.inter_ranging_delay_ms * 1000);
    }
}
