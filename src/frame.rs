//! Wire format of the three ranging frames
//!
//! Every frame starts with the same 10-byte header, compatible with the IEEE
//! 802.15.4 data-frame encoding used by the DecaRanging reference protocol:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       2B    frame control (0x41 0x88: data frame, 16-bit addressing)
//! 2       1B    sequence number, incremented for each new frame
//! 3       2B    PAN ID (0xDECA)
//! 5       2B    destination address
//! 7       2B    source address
//! 9       1B    function code (which ranging message this is)
//! ```
//!
//! The remaining bytes are specific to each message:
//!
//! - Poll: no more data.
//! - Response: a 1-byte activity code (0x02: go on with the exchange) and a
//!   2-byte activity parameter, unused for this activity code.
//! - Final: three 4-byte timestamp fields (poll TX, response RX, final TX),
//!   each little-endian with the least significant byte at the lowest offset.
//!
//! All frames end with two bytes left zero for the checksum the radio appends
//! on air.
//!
//! The sequence number carries no meaning for frame identity: received frames
//! are validated by comparing the common header with the sequence byte masked
//! to zero on both sides.

use thiserror::Error;

/// Length of the common part of every ranging frame
pub const COMMON_LEN: usize = 10;

/// Offset of the sequence number within the common header
pub const SEQ_IDX: usize = 2;

/// Total length of a Poll frame, checksum placeholder included
pub const POLL_LEN: usize = 12;

/// Total length of a Response frame, checksum placeholder included
pub const RESPONSE_LEN: usize = 15;

/// Total length of a Final frame, checksum placeholder included
pub const FINAL_LEN: usize = 24;

/// Offset of the poll TX timestamp within a Final frame
pub const FINAL_POLL_TX_IDX: usize = 10;

/// Offset of the response RX timestamp within a Final frame
pub const FINAL_RESP_RX_IDX: usize = 14;

/// Offset of the final TX timestamp within a Final frame
pub const FINAL_FINAL_TX_IDX: usize = 18;

/// Common header of the Poll frame (initiator → responder, function 0x21)
pub const POLL_HEADER: [u8; COMMON_LEN] =
    [0x41, 0x88, 0, 0xca, 0xde, b'W', b'A', b'V', b'E', 0x21];

/// Common header of the Response frame (responder → initiator, function 0x10)
pub const RESPONSE_HEADER: [u8; COMMON_LEN] =
    [0x41, 0x88, 0, 0xca, 0xde, b'V', b'E', b'W', b'A', 0x10];

/// Common header of the Final frame (initiator → responder, function 0x23)
pub const FINAL_HEADER: [u8; COMMON_LEN] =
    [0x41, 0x88, 0, 0xca, 0xde, b'W', b'A', b'V', b'E', 0x23];

/// Activity code sent in the Response frame
///
/// 0x02 tells the initiator to go on with the ranging exchange.
const ACTIVITY_CODE: u8 = 0x02;

/// An error that can occur when decoding a received frame
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum DecodeError {
    /// The frame is shorter than the expected fixed layout
    #[error("frame too short: got {len} bytes, need {required} bytes")]
    TooShort {
        /// Length of the received frame
        len: usize,
        /// Length the fixed layout requires
        required: usize,
    },
}

/// The three timestamps embedded in a Final frame
///
/// These are the initiator's captures, truncated to 32 bits for transport.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FinalTimestamps {
    /// When the Poll frame was transmitted, in initiator time
    pub poll_tx: u32,

    /// When the Response frame was received, in initiator time
    pub resp_rx: u32,

    /// When the Final frame was transmitted, in initiator time
    ///
    /// Predicted in the first Final of an exchange, actual in the repeat.
    pub final_tx: u32,
}

/// Builds a Poll frame carrying the given sequence number
pub fn encode_poll(seq: u8) -> [u8; POLL_LEN] {
    let mut frame = [0; POLL_LEN];
    frame[..COMMON_LEN].copy_from_slice(&POLL_HEADER);
    frame[SEQ_IDX] = seq;
    frame
}

/// Builds a Response frame carrying the given sequence number
pub fn encode_response(seq: u8) -> [u8; RESPONSE_LEN] {
    let mut frame = [0; RESPONSE_LEN];
    frame[..COMMON_LEN].copy_from_slice(&RESPONSE_HEADER);
    frame[SEQ_IDX] = seq;
    frame[COMMON_LEN] = ACTIVITY_CODE;
    // Bytes 11/12 are the activity parameter, unused for this activity code.
    frame
}

/// Builds a Final frame embedding the initiator's three timestamps
pub fn encode_final(seq: u8, timestamps: FinalTimestamps) -> [u8; FINAL_LEN] {
    let mut frame = [0; FINAL_LEN];
    frame[..COMMON_LEN].copy_from_slice(&FINAL_HEADER);
    frame[SEQ_IDX] = seq;
    write_timestamp(&mut frame[FINAL_POLL_TX_IDX..], timestamps.poll_tx);
    write_timestamp(&mut frame[FINAL_RESP_RX_IDX..], timestamps.resp_rx);
    write_timestamp(&mut frame[FINAL_FINAL_TX_IDX..], timestamps.final_tx);
    frame
}

/// Reads the three embedded timestamps back out of a Final frame
///
/// The inverse of [`encode_final`]. Input shorter than the fixed Final layout
/// yields an error, never an out-of-bounds read.
pub fn decode_final_timestamps(frame: &[u8]) -> Result<FinalTimestamps, DecodeError> {
    if frame.len() < FINAL_FINAL_TX_IDX + 4 {
        return Err(DecodeError::TooShort {
            len: frame.len(),
            required: FINAL_FINAL_TX_IDX + 4,
        });
    }

    Ok(FinalTimestamps {
        poll_tx: read_timestamp(&frame[FINAL_POLL_TX_IDX..]),
        resp_rx: read_timestamp(&frame[FINAL_RESP_RX_IDX..]),
        final_tx: read_timestamp(&frame[FINAL_FINAL_TX_IDX..]),
    })
}

/// Checks whether a received frame is structurally the expected message type
///
/// Compares the common header bytes, with the sequence number masked on both
/// sides, since it carries no semantic meaning for validation. Fails open:
/// a frame too short to hold a common header simply doesn't match.
pub fn matches_header(frame: &[u8], header: &[u8; COMMON_LEN]) -> bool {
    if frame.len() < COMMON_LEN {
        return false;
    }

    frame[..COMMON_LEN]
        .iter()
        .zip(header.iter())
        .enumerate()
        .all(|(i, (received, expected))| i == SEQ_IDX || received == expected)
}

/// Writes a 32-bit timestamp into a frame field, least significant byte first
///
/// Callers guarantee the field holds at least 4 bytes.
fn write_timestamp(field: &mut [u8], timestamp: u32) {
    field[..4].copy_from_slice(&timestamp.to_le_bytes());
}

/// Reads a 32-bit timestamp from a frame field, least significant byte first
fn read_timestamp(field: &[u8]) -> u32 {
    let mut bytes = [0; 4];
    bytes.copy_from_slice(&field[..4]);
    u32::from_le_bytes(bytes)
}
