//! Time-related types based on the radio's 40-bit system time
//!
//! The radio timestamps every transmitted and received frame with a 40-bit
//! counter running at 499.2 MHz × 128, i.e. one device time unit is roughly
//! 15.65 ps and the counter wraps about every 17.2 seconds. All protocol
//! arithmetic in this crate is done in these units.

use core::ops::Add;

use serde::{Deserialize, Serialize};

/// The maximum value of 40-bit system time stamps.
pub const TIME_MAX: u64 = 0xff_ffff_ffff;

/// Device time units per UWB microsecond
///
/// 1 uus = 512 / 499.2 µs. Delays and timeouts handed to the radio are
/// expressed in UWB microseconds; timestamps are in device time units.
pub const UUS_TO_DTU: u64 = 65536;

/// The duration of one device time unit, in seconds: 1 / (499.2 MHz × 128).
pub const DEVICE_TIME_UNIT_SECONDS: f64 = 1.0 / 63_897_600_000.0;

/// Represents an instant in device time
///
/// Always captured on a concrete TX or RX event reported by the radio.
/// Internally uses the same 40-bit timestamps that the radio uses.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Instant(u64);

impl Instant {
    /// Creates a new instance of `Instant`
    ///
    /// The given value must fit in a 40-bit timestamp, so:
    /// 0 <= `value` <= 2^40 - 1
    ///
    /// Returns `Some(...)`, if `value` is within the valid range, `None` if it
    /// isn't.
    ///
    /// # Example
    ///
    /// ``` rust
    /// use ds_twr::time::{TIME_MAX, Instant};
    ///
    /// let valid_instant   = Instant::new(TIME_MAX);
    /// let invalid_instant = Instant::new(TIME_MAX + 1);
    ///
    /// assert!(valid_instant.is_some());
    /// assert!(invalid_instant.is_none());
    /// ```
    pub fn new(value: u64) -> Option<Self> {
        if value <= TIME_MAX {
            Some(Instant(value))
        } else {
            None
        }
    }

    /// Widens a 5-byte timestamp capture into an `Instant`
    ///
    /// The radio reports TX and RX timestamps as five bytes, least significant
    /// byte first. The result is a 64-bit value with the top 24 bits zero.
    ///
    /// # Example
    ///
    /// ``` rust
    /// use ds_twr::time::Instant;
    ///
    /// let instant = Instant::from_le_bytes([0x01, 0x00, 0x00, 0x00, 0xff]);
    /// assert_eq!(instant.value(), 0xff_0000_0001);
    /// ```
    pub fn from_le_bytes(bytes: [u8; 5]) -> Self {
        let mut value = 0u64;
        for &byte in bytes.iter().rev() {
            value = (value << 8) | byte as u64;
        }

        // Five bytes can't exceed 2^40 - 1, so this will never panic.
        Instant::new(value).unwrap()
    }

    /// Returns the raw 40-bit timestamp
    ///
    /// The returned value is guaranteed to be in the following range:
    /// 0 <= `value` <= 2^40 - 1
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Truncates the timestamp to its low 32 bits
    ///
    /// Round-trip and turnaround delays are computed as 32-bit wrapping
    /// subtractions of truncated timestamps. As long as the two timestamps of
    /// a subtraction lie less than 2^32 device time units (~67 ms) apart, a
    /// wraparound of the 40-bit counter cancels identically on both sides and
    /// the difference comes out correct.
    pub fn lower_32(&self) -> u32 {
        self.0 as u32
    }

    /// Returns the amount of time passed between the two `Instant`s
    ///
    /// Assumes that `&self` represents a later time than the argument
    /// `earlier`. Please make sure that this is the case, as this method has no
    /// way of knowing (40-bit timestamps can overflow, so comparing the
    /// numerical value of the timestamp doesn't tell anything about order).
    ///
    /// # Example
    ///
    /// ``` rust
    /// use ds_twr::time::{TIME_MAX, Instant};
    ///
    /// // `unwrap`ing here is okay, since we're passing constants that we know
    /// // are in the valid range.
    /// let instant_1 = Instant::new(TIME_MAX - 50).unwrap();
    /// let instant_2 = Instant::new(TIME_MAX).unwrap();
    /// let instant_3 = Instant::new(49).unwrap();
    ///
    /// // Works as expected, if the later timestamp is larger than the earlier
    /// // one.
    /// let duration = instant_2.duration_since(instant_1);
    /// assert_eq!(duration.value(), 50);
    ///
    /// // Still works as expected, if the later timestamp is the numerically
    /// // smaller value.
    /// let duration = instant_3.duration_since(instant_2);
    /// assert_eq!(duration.value(), 50);
    /// ```
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        if self.value() >= earlier.value() {
            Duration(self.value() - earlier.value())
        } else {
            Duration(TIME_MAX - earlier.value() + self.value() + 1)
        }
    }

    /// Computes the delayed-transmission slot for this instant
    ///
    /// The radio's delayed-transmission scheduling has a resolution of 512
    /// device time units: the value programmed into the delay register is the
    /// timestamp shifted right by 8 bits, with the lowest bit of the result
    /// cleared. The returned slot is what gets programmed, and is also the
    /// basis for predicting the frame's eventual TX timestamp before the
    /// transmission happens.
    pub fn delay_slot(&self) -> TxSlot {
        TxSlot((self.0 >> 8) as u32 & 0xffff_fffe)
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Self::Output {
        // Both `Instant` and `Duration` are guaranteed to contain 40-bit
        // numbers, so this addition will never overflow.
        let value = (self.value() + rhs.value()) % (TIME_MAX + 1);

        // We made sure to keep the result of the addition within `TIME_MAX`,
        // so the following will never panic.
        Instant::new(value).unwrap()
    }
}

/// A delayed-transmission time slot
///
/// Produced by [`Instant::delay_slot`]. Covers the full 40-bit time range at
/// the 512-unit granularity the radio's delayed-TX scheduling supports.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TxSlot(u32);

impl TxSlot {
    /// Returns the raw slot value, as programmed into the radio
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Predicts the TX timestamp of a frame sent in this slot
    ///
    /// The frame leaves the antenna at the slot time plus the TX antenna
    /// delay. This prediction is what the initiator embeds in the first Final
    /// frame, since the actual timestamp isn't known until after the
    /// transmission completes.
    pub fn tx_timestamp(&self, antenna_delay: Duration) -> Instant {
        // The slot is 32 bits with bit 0 clear, so shifting left by 8 stays
        // within 40 bits and the modular add handles the rest.
        Instant::new((self.0 as u64) << 8).unwrap() + antenna_delay
    }
}

/// A duration between two instants in device time
///
/// Internally uses the same 40-bit timestamps that the radio uses.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Duration(u64);

impl Duration {
    /// Creates a new instance of `Duration`
    ///
    /// The given value must fit in a 40-bit timestamp, so:
    /// 0 <= `value` <= 2^40 - 1
    ///
    /// Returns `Some(...)`, if `value` is within the valid range, `None` if it
    /// isn't.
    pub fn new(value: u64) -> Option<Self> {
        if value <= TIME_MAX {
            Some(Duration(value))
        } else {
            None
        }
    }

    /// Creates an instance of `Duration` from a number of UWB microseconds
    ///
    /// # Example
    ///
    /// ``` rust
    /// use ds_twr::time::Duration;
    ///
    /// assert_eq!(Duration::from_uus(5000).value(), 5000 * 65536);
    /// ```
    pub fn from_uus(uus: u32) -> Self {
        // `uus` takes up at most 32 bits before it is cast to `u64`, and
        // `UUS_TO_DTU` is 2^16, so the product fits within 48 bits. Values
        // used by the protocol are a few thousand uus, far below `TIME_MAX`.
        Duration::new(uus as u64 * UUS_TO_DTU % (TIME_MAX + 1)).unwrap()
    }

    /// Returns the raw 40-bit timestamp
    ///
    /// The returned value is guaranteed to be in the following range:
    /// 0 <= `value` <= 2^40 - 1
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn widen_reads_five_bytes_little_endian() {
        let instant = Instant::from_le_bytes([0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(instant.value(), 0x55_4433_2211);

        let zero = Instant::from_le_bytes([0; 5]);
        assert_eq!(zero.value(), 0);
    }

    #[test]
    fn add_wraps_at_40_bits() {
        let instant = Instant::new(TIME_MAX).unwrap();
        let sum = instant + Duration::new(1).unwrap();
        assert_eq!(sum.value(), 0);
    }

    #[test]
    fn delay_slot_aligns_to_512_units() {
        // Bit 0 of the shifted value must be cleared.
        let instant = Instant::new(0x1_2345_67ff).unwrap();
        assert_eq!(instant.delay_slot().value(), 0x0123_4566);

        let aligned = Instant::new(0x2_0000_0200).unwrap();
        assert_eq!(aligned.delay_slot().value(), 0x0200_0002);
    }

    #[test]
    fn predicted_tx_timestamp_adds_antenna_delay() {
        let antenna_delay = Duration::new(16436).unwrap();
        let resp_rx = Instant::new(0x12_3456_7890).unwrap();
        let slot = (resp_rx + Duration::from_uus(5000)).delay_slot();

        let predicted = slot.tx_timestamp(antenna_delay);
        assert_eq!(predicted.value(), ((slot.value() as u64) << 8) + 16436);
    }

    proptest! {
        /// For captures less than 2^32 device time units apart, the 32-bit
        /// wrapping subtraction of truncated timestamps equals the true
        /// difference modulo 2^32, regardless of 40-bit wraparound.
        #[test]
        fn truncated_subtraction_survives_wraparound(
            t1 in 0..=TIME_MAX,
            delta in 0u64..0x1_0000_0000,
        ) {
            let t2 = (t1 + delta) % (TIME_MAX + 1);

            let a = Instant::new(t1).unwrap();
            let b = Instant::new(t2).unwrap();

            let diff = b.lower_32().wrapping_sub(a.lower_32());
            prop_assert_eq!(diff, delta as u32);
        }

        #[test]
        fn widen_then_read_round_trips(value in 0..=TIME_MAX) {
            let bytes = [
                value as u8,
                (value >> 8) as u8,
                (value >> 16) as u8,
                (value >> 24) as u8,
                (value >> 32) as u8,
            ];
            prop_assert_eq!(Instant::from_le_bytes(bytes).value(), value);
        }
    }
}
