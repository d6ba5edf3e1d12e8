//! Double-sided two-way ranging over ultra-wideband radios
//!
//! Implements the four-message DS-TWR exchange used to measure the distance
//! between two UWB nodes from timestamped frames alone, with no shared
//! clock. The protocol core is transport-agnostic: the two role state
//! machines ([`Initiator`] and [`Responder`]) drive any radio that
//! implements the [`Transceiver`] trait. The crate ships two transports, a
//! deterministic in-process simulator ([`sim`]) and a UDP mapping ([`udp`])
//! for running the roles as separate processes.
//!
//! # Usage
//!
//! Hand each role a transceiver and run them against each other; the
//! responder produces one [`RangingResult`] per completed exchange:
//!
//! ```rust
//! use ds_twr::{sim, Initiator, RangingConfig, Responder};
//!
//! let (left, right) = sim::pair(sim::SimConfig {
//!     flight_time: 320, // about a metre and a half
//!     ..sim::SimConfig::default()
//! });
//!
//! let responder = std::thread::spawn(move || {
//!     Responder::new(right, RangingConfig::default())
//!         .run_once()
//!         .unwrap()
//! });
//!
//! Initiator::new(left, RangingConfig::default())
//!     .run_once()
//!     .unwrap();
//!
//! let result = responder.join().unwrap();
//! assert_eq!(result.tof_device_units, 320);
//! ```

#![deny(missing_docs)]

pub mod frame;
pub mod radio;
pub mod ranging;
pub mod sim;
pub mod time;
pub mod udp;

pub use crate::radio::{ReceiveError, SendTime, Transceiver, TransmitError};
pub use crate::ranging::{
    ExchangeError,
    Initiator,
    RangingConfig,
    RangingResult,
    Responder,
};
pub use crate::time::{Duration, Instant, TIME_MAX};
