//! A scripted transceiver for exercising the ranging state machines
//!
//! Transmissions always succeed unless a failure is queued; receptions
//! replay a queued script of frames and errors. Tests assert on what the
//! state machine sent, how it advanced its sequence number and what it did
//! to the receiver.

use std::collections::VecDeque;

use crate::radio::{ReceiveError, SendTime, Transceiver, TransmitError};

/// One scripted outcome of a receive window
pub(crate) enum RxStep {
    /// A clean frame, and the RX timestamp the radio captured for it
    Frame(Vec<u8>, u64),
    /// A timeout or frame error
    Error(ReceiveError),
}

pub(crate) struct MockRadio {
    rx_script: VecDeque<RxStep>,
    tx_failures: VecDeque<TransmitError>,
    tx_timestamps: VecDeque<u64>,
    last_rx_timestamp: u64,
    next_tx_timestamp: u64,

    /// Every frame handed to `start_transmit`, in order
    pub sent: Vec<(Vec<u8>, SendTime)>,
    /// Calls to `reset_receiver`
    pub resets: usize,
    /// Calls to `enable_receiver`
    pub enables: usize,
    /// Arguments of every `delay_us` call
    pub delays_us: Vec<u32>,
    /// Every value given to `set_rx_timeout`, in order
    pub rx_timeouts: Vec<Option<u32>>,
    /// Last value given to `set_rx_timeout`
    pub rx_timeout_uus: Option<u32>,
    /// Last value given to `set_rx_after_tx_delay`
    pub rx_after_tx_delay_uus: u32,
}

impl MockRadio {
    pub fn new() -> Self {
        MockRadio {
            rx_script: VecDeque::new(),
            tx_failures: VecDeque::new(),
            tx_timestamps: VecDeque::new(),
            last_rx_timestamp: 0,
            next_tx_timestamp: 1_000_000,
            sent: Vec::new(),
            resets: 0,
            enables: 0,
            delays_us: Vec::new(),
            rx_timeouts: Vec::new(),
            rx_timeout_uus: None,
            rx_after_tx_delay_uus: 0,
        }
    }

    /// Queues a clean frame for the next receive window
    pub fn queue_frame(&mut self, frame: &[u8], rx_timestamp: u64) {
        self.rx_script
            .push_back(RxStep::Frame(frame.to_vec(), rx_timestamp));
    }

    /// Queues an error for the next receive window
    pub fn queue_rx_error(&mut self, error: ReceiveError) {
        self.rx_script.push_back(RxStep::Error(error));
    }

    /// Makes the next `start_transmit` call fail
    pub fn queue_tx_failure(&mut self, error: TransmitError) {
        self.tx_failures.push_back(error);
    }

    /// Fixes the TX timestamp reported for the next transmission
    pub fn queue_tx_timestamp(&mut self, timestamp: u64) {
        self.tx_timestamps.push_back(timestamp);
    }

    fn timestamp_bytes(value: u64) -> [u8; 5] {
        let bytes = value.to_le_bytes();
        [bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]]
    }
}

impl Transceiver for MockRadio {
    fn start_transmit(
        &mut self,
        frame: &[u8],
        send_time: SendTime,
        _expect_response: bool,
    ) -> Result<(), TransmitError> {
        if let Some(error) = self.tx_failures.pop_front() {
            return Err(error);
        }
        self.sent.push((frame.to_vec(), send_time));
        Ok(())
    }

    fn wait_transmit(&mut self) -> nb::Result<(), TransmitError> {
        Ok(())
    }

    fn read_tx_timestamp(&mut self) -> [u8; 5] {
        let timestamp = self.tx_timestamps.pop_front().unwrap_or_else(|| {
            self.next_tx_timestamp += 1_000_000;
            self.next_tx_timestamp
        });
        Self::timestamp_bytes(timestamp)
    }

    fn read_rx_timestamp(&mut self) -> [u8; 5] {
        Self::timestamp_bytes(self.last_rx_timestamp)
    }

    fn set_rx_after_tx_delay(&mut self, delay_uus: u32) {
        self.rx_after_tx_delay_uus = delay_uus;
    }

    fn set_rx_timeout(&mut self, timeout_uus: Option<u32>) {
        self.rx_timeouts.push(timeout_uus);
        self.rx_timeout_uus = timeout_uus;
    }

    fn enable_receiver(&mut self) {
        self.enables += 1;
    }

    fn wait_receive(&mut self, buffer: &mut [u8]) -> nb::Result<usize, ReceiveError> {
        match self.rx_script.pop_front() {
            None => panic!("receive window opened with an empty script"),
            Some(RxStep::Error(error)) => Err(nb::Error::Other(error)),
            Some(RxStep::Frame(frame, rx_timestamp)) => {
                buffer[..frame.len()].copy_from_slice(&frame);
                self.last_rx_timestamp = rx_timestamp;
                Ok(frame.len())
            }
        }
    }

    fn reset_receiver(&mut self) {
        self.resets += 1;
    }

    fn delay_us(&mut self, us: u32) {
        self.delays_us.push(us);
    }
}
