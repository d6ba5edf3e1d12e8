//! End-to-end ranging exchanges over the simulated link
//!
//! Each test wires an initiator and a responder to the two ends of a
//! simulated radio link, runs them from separate threads and checks what
//! comes out of the responder. The link is deterministic, so clean exchanges
//! must recover the configured flight time exactly.

use std::thread;

use nb::block;

use ds_twr::frame::{self, FinalTimestamps};
use ds_twr::sim::{pair, FaultPlan, SimConfig};
use ds_twr::{
    ExchangeError, Initiator, Instant, RangingConfig, RangingResult, ReceiveError,
    Responder, SendTime, Transceiver,
};

/// Ten metres of flight, in device time units
const TEN_METRES: u64 = 2132;

type InitiatorOutcomes = Vec<Result<(), ExchangeError>>;
type ResponderOutcomes = Vec<Result<RangingResult, ExchangeError>>;

/// Runs both roles to completion and collects their outcomes
///
/// The initiator is dropped before the responder is joined, so a responder
/// still waiting on a dead link resolves promptly instead of hanging.
fn run_exchanges(
    config: SimConfig,
    initiator_exchanges: u64,
    responder_exchanges: u64,
) -> (InitiatorOutcomes, ResponderOutcomes) {
    let (left, right) = pair(config);

    let responder = thread::spawn(move || {
        let mut responder = Responder::new(right, RangingConfig::default());
        (0..responder_exchanges)
            .map(|_| responder.run_once())
            .collect::<Vec<_>>()
    });

    let mut initiator = Initiator::new(left, RangingConfig::default());
    let initiator_outcomes = (0..initiator_exchanges)
        .map(|_| initiator.run_once())
        .collect();
    drop(initiator);

    (initiator_outcomes, responder.join().unwrap())
}

#[test]
fn clean_exchange_measures_the_configured_distance() {
    let config = SimConfig {
        flight_time: TEN_METRES,
        ..SimConfig::default()
    };

    let (initiator, responder) = run_exchanges(config, 1, 1);

    assert!(initiator[0].is_ok());
    let result = responder[0].unwrap();
    assert_eq!(result.tof_device_units, TEN_METRES as i64);
    assert!((result.distance - 10.0).abs() < 0.05);
}

#[test]
fn clock_offset_between_the_nodes_cancels() {
    let config = SimConfig {
        flight_time: TEN_METRES,
        offset_b: 0x12_3456_789a,
        ..SimConfig::default()
    };

    let (_, responder) = run_exchanges(config, 1, 1);

    assert_eq!(responder[0].unwrap().tof_device_units, TEN_METRES as i64);
}

#[test]
fn timestamps_wrapping_mid_exchange_do_no_harm() {
    // The initiator's clock sits just below the 40-bit limit and wraps
    // while the exchange is in flight.
    let config = SimConfig {
        flight_time: TEN_METRES,
        offset_a: ds_twr::TIME_MAX - 10_000,
        ..SimConfig::default()
    };

    let (_, responder) = run_exchanges(config, 1, 1);

    assert_eq!(responder[0].unwrap().tof_device_units, TEN_METRES as i64);
}

#[test]
fn consecutive_exchanges_agree() {
    let config = SimConfig {
        flight_time: TEN_METRES,
        ..SimConfig::default()
    };

    let (initiator, responder) = run_exchanges(config, 3, 3);

    assert!(initiator.iter().all(Result::is_ok));
    for outcome in &responder {
        assert_eq!(outcome.unwrap().tof_device_units, TEN_METRES as i64);
    }
}

#[test]
fn corrupted_response_costs_exactly_one_measurement() {
    // Frame 1 is the Response: the initiator sees a frame that matches
    // nothing and walks away; the responder times out waiting for a Final.
    let config = SimConfig {
        flight_time: TEN_METRES,
        faults: FaultPlan::new().corrupt_frame(1),
        ..SimConfig::default()
    };

    let (initiator, responder) = run_exchanges(config, 1, 1);

    assert_eq!(initiator[0], Err(ExchangeError::FrameMismatch));
    assert_eq!(responder[0].unwrap_err(), ExchangeError::ReceiveTimeout);
}

#[test]
fn garbled_response_reports_a_frame_error() {
    let config = SimConfig {
        flight_time: TEN_METRES,
        faults: FaultPlan::new().garble_frame(1),
        ..SimConfig::default()
    };

    let (initiator, _) = run_exchanges(config, 1, 1);

    assert_eq!(
        initiator[0],
        Err(ExchangeError::Receive(ReceiveError::Fcs)),
    );
}

#[test]
fn dropped_final_repeat_is_recovered_from() {
    // Frame 3 is the repeated Final. The untimed repeat window blocks until
    // the next exchange's Poll arrives and is rejected as a mismatch, which
    // also costs that exchange; the one after runs cleanly.
    let config = SimConfig {
        flight_time: TEN_METRES,
        faults: FaultPlan::new().drop_frame(3),
        ..SimConfig::default()
    };

    let (initiator, responder) = run_exchanges(config, 3, 2);

    assert!(initiator[0].is_ok());
    assert_eq!(initiator[1], Err(ExchangeError::ReceiveTimeout));
    assert!(initiator[2].is_ok());
    assert_eq!(responder[0].unwrap_err(), ExchangeError::FrameMismatch);
    assert_eq!(responder[1].unwrap().tof_device_units, TEN_METRES as i64);
}

#[test]
fn late_final_repeat_is_still_received() {
    // The repeat window is untimed: the repeat arrives on the initiator's
    // schedule, here well past the 6000 uus Final timeout. Drives the
    // initiator side by hand to control the pause between the two Finals.
    let (mut left, right) = pair(SimConfig {
        flight_time: 320,
        ..SimConfig::default()
    });

    let responder = thread::spawn(move || {
        Responder::new(right, RangingConfig::default()).run_once()
    });

    let mut buffer = [0; 128];

    left.start_transmit(&frame::encode_poll(0), SendTime::Now, true)
        .unwrap();
    block!(left.wait_transmit()).unwrap();
    let poll_tx = Instant::from_le_bytes(left.read_tx_timestamp());

    left.set_rx_timeout(Some(5000));
    block!(left.wait_receive(&mut buffer)).unwrap();
    let resp_rx = Instant::from_le_bytes(left.read_rx_timestamp());

    // First Final; its payload gets superseded by the repeat anyway.
    let first = frame::encode_final(
        1,
        FinalTimestamps {
            poll_tx: poll_tx.lower_32(),
            resp_rx: resp_rx.lower_32(),
            final_tx: 0,
        },
    );
    left.start_transmit(&first, SendTime::Now, false).unwrap();
    block!(left.wait_transmit()).unwrap();
    let final_tx = Instant::from_le_bytes(left.read_tx_timestamp());

    left.delay_us(8000);
    let repeat = frame::encode_final(
        2,
        FinalTimestamps {
            poll_tx: poll_tx.lower_32(),
            resp_rx: resp_rx.lower_32(),
            final_tx: final_tx.lower_32(),
        },
    );
    left.start_transmit(&repeat, SendTime::Now, false).unwrap();
    block!(left.wait_transmit()).unwrap();
    drop(left);

    let result = responder.join().unwrap().unwrap();
    assert_eq!(result.tof_device_units, 320);
}

#[test]
fn rejected_poll_transmission_is_survivable() {
    let config = SimConfig {
        flight_time: TEN_METRES,
        faults: FaultPlan::new().reject_transmit(0),
        ..SimConfig::default()
    };

    // The responder never notices the failed attempt; it serves one clean
    // exchange driven by the initiator's second try.
    let (initiator, responder) = run_exchanges(config, 2, 1);

    assert!(matches!(
        initiator[0],
        Err(ExchangeError::Transmit(_)),
    ));
    assert!(initiator[1].is_ok());
    assert_eq!(responder[0].unwrap().tof_device_units, TEN_METRES as i64);
}
