//! Acquisition state machine against the simulated device

use std::thread;
use std::time::Duration;

use approx::assert_relative_eq;
use spectrascan::{Acquisition, DeviceProfile, Error, RunMode, RunState, ScanConfig, Usb4000};

mod helpers;
use helpers::{
    default_sim, simulated_acquisition, single_line_spectrum, wait_for, Event, Recorder,
    SlowDataReads,
};

#[test]
fn test_single_shot_captures_one_frame() {
    let (mut acquisition, log) = simulated_acquisition(default_sim());
    let recorder = Recorder::default();
    acquisition.add_observer(recorder.clone());

    assert_eq!(acquisition.state(), RunState::Idle);
    assert!(acquisition.start(ScanConfig::single_shot()));
    acquisition.wait().expect("scan failed");

    assert_eq!(acquisition.state(), RunState::Stopped);
    assert_eq!(recorder.running_flags(), vec![true, false]);
    assert_eq!(log.count_commands(0x09), 1);

    let frame = acquisition.latest_frame().expect("no frame published");
    assert_eq!(frame.len(), 4096);
    let calibration = acquisition.calibration().expect("calibration not loaded");
    assert_relative_eq!(calibration.c0, 190.377221);
}

#[test]
fn test_start_while_running_is_ignored() {
    let (mut acquisition, _log) = simulated_acquisition(default_sim());
    let recorder = Recorder::default();
    acquisition.add_observer(recorder.clone());

    assert!(acquisition.start(ScanConfig::repeating(50)));
    assert!(!acquisition.start(ScanConfig::repeating(50)));
    assert!(!acquisition.start(ScanConfig::info_query()));
    assert!(acquisition.is_running());

    acquisition.stop();
    acquisition.wait().expect("scan failed");
    assert_eq!(recorder.running_flags(), vec![true, false]);
}

#[test]
fn test_repeating_scan_until_stopped() {
    let (mut acquisition, log) = simulated_acquisition(default_sim());
    let frames = acquisition.subscribe(256);

    assert!(acquisition.start(ScanConfig::repeating(50)));
    thread::sleep(Duration::from_millis(150));
    acquisition.stop();
    acquisition.wait().expect("scan failed");

    let received = frames.try_iter().count();
    assert!(received >= 2, "only {received} frame(s) in 150 ms at 50 Hz");
    assert_eq!(log.count_commands(0x09), received);
    assert_eq!(acquisition.state(), RunState::Stopped);
}

#[test]
fn test_repeating_scan_is_paced_by_rate() {
    let (mut acquisition, log) = simulated_acquisition(default_sim());

    // 10 Hz: captures start at roughly 0, 100, 200 and 300 ms
    assert!(acquisition.start(ScanConfig::repeating(10)));
    thread::sleep(Duration::from_millis(350));
    acquisition.stop();
    acquisition.wait().expect("scan failed");

    let captured = log.count_commands(0x09);
    assert!(
        (2..=5).contains(&captured),
        "{captured} frame(s) in 350 ms at 10 Hz"
    );
}

#[test]
fn test_stop_during_capture_completes_frame() {
    // 16 blocks x 5 ms per frame, longer than the 20 ms period
    let slow = SlowDataReads::new(default_sim(), Duration::from_millis(5));
    let capturing = slow.capture_started();
    let mut acquisition = Acquisition::new(Usb4000::new(slow, DeviceProfile::usb4000()));
    let frames = acquisition.subscribe(8);

    assert!(acquisition.start(ScanConfig::repeating(50)));
    wait_for(&capturing);
    acquisition.stop();
    acquisition.wait().expect("scan failed");

    assert_eq!(frames.try_iter().count(), 1);
    let frame = acquisition.latest_frame().expect("in-flight frame dropped");
    assert_eq!(frame.len(), 4096);
    assert_eq!(acquisition.state(), RunState::Stopped);
}

#[test]
fn test_worker_panic_is_reported_and_recoverable() {
    let sim = default_sim().fail_at_receive(0, || panic!("transport crashed"));
    let (mut acquisition, _log) = simulated_acquisition(sim);
    let recorder = Recorder::default();
    acquisition.add_observer(recorder.clone());

    assert!(acquisition.start(ScanConfig::single_shot()));
    let err = acquisition.wait().unwrap_err();

    assert!(matches!(err, Error::WorkerPanicked));
    assert_eq!(acquisition.state(), RunState::Stopped);
    assert_eq!(recorder.running_flags(), vec![true, false]);

    // the session is usable again once the failed run is joined
    let temperature = acquisition
        .with_device(|device| device.pcb_temperature())
        .expect("device still busy");
    assert!(temperature.is_ok());
}

#[test]
fn test_rate_zero_ends_loop_after_current_frame() {
    let (mut acquisition, _log) = simulated_acquisition(default_sim());

    assert!(acquisition.start(ScanConfig::repeating(50)));
    thread::sleep(Duration::from_millis(50));
    acquisition.set_rate(0);
    acquisition.wait().expect("scan failed");

    assert_eq!(acquisition.rate(), 0);
    assert_eq!(acquisition.state(), RunState::Stopped);
    assert!(acquisition.latest_frame().is_some());
}

#[test]
fn test_transport_error_stops_scan() {
    // receives 0..=3 are coefficients, 4 is status, 5.. are frame blocks
    let sim = default_sim().fail_at_receive(7, || rs_usb4000::Error::Timeout);
    let (mut acquisition, _log) = simulated_acquisition(sim);
    let recorder = Recorder::default();
    acquisition.add_observer(recorder.clone());

    assert!(acquisition.start(ScanConfig::repeating(10)));
    let err = acquisition.wait().unwrap_err();

    assert!(matches!(err, Error::Device(rs_usb4000::Error::Timeout)));
    assert_eq!(acquisition.state(), RunState::Stopped);
    assert!(acquisition.latest_frame().is_none());

    let events = recorder.events();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0], Event::Running(true));
    assert!(matches!(&events[1], Event::Failed(msg) if msg.contains("timeout")));
    assert_eq!(events[2], Event::Running(false));
}

#[test]
fn test_bad_calibration_is_reported() {
    let sim = default_sim().with_coefficients(["190.3", "0.36", "n/a", "0"]);
    let (mut acquisition, log) = simulated_acquisition(sim);

    assert!(acquisition.start(ScanConfig::single_shot()));
    let err = acquisition.wait().unwrap_err();

    assert_eq!(
        err.device_kind(),
        Some(rs_usb4000::ErrorKind::ProtocolDecode)
    );
    assert_eq!(log.count_commands(0x09), 0);
    assert_eq!(acquisition.state(), RunState::Stopped);
}

#[test]
fn test_calibration_fetched_once_per_session() {
    let (mut acquisition, log) = simulated_acquisition(default_sim());

    for _ in 0..2 {
        assert!(acquisition.start(ScanConfig::single_shot()));
        acquisition.wait().expect("scan failed");
    }

    assert_eq!(log.count_commands(0x01), 2);
    assert_eq!(log.count_commands(0x05), 4);
    assert_eq!(log.count_commands(0x09), 2);
}

#[test]
fn test_info_query_returns_to_idle() {
    let sim = default_sim().with_serial_number("USB4C04321");
    let (mut acquisition, log) = simulated_acquisition(sim);
    let recorder = Recorder::default();
    acquisition.add_observer(recorder.clone());

    assert!(acquisition.start(ScanConfig::info_query()));
    acquisition.wait().expect("info query failed");

    assert_eq!(acquisition.state(), RunState::Idle);
    assert_eq!(recorder.running_flags(), vec![true, false]);
    assert!(acquisition.latest_frame().is_none());
    assert_eq!(log.count_commands(0x09), 0);

    let info = acquisition.device_info().expect("no device info");
    assert_eq!(info.serial_number, "USB4C04321");
    assert_eq!(info.pixel_count, 4096);
    assert_eq!(info.bench.filter, "OFLV");
}

#[test]
fn test_stop_request_is_not_a_run() {
    let (mut acquisition, _log) = simulated_acquisition(default_sim());
    let recorder = Recorder::default();
    acquisition.add_observer(recorder.clone());

    assert!(!acquisition.start(ScanConfig::new(5, RunMode::Stop)));
    assert_eq!(acquisition.state(), RunState::Idle);
    assert!(recorder.events().is_empty());
}

#[test]
fn test_device_is_busy_while_scanning() {
    let (mut acquisition, _log) = simulated_acquisition(default_sim());

    assert!(acquisition.start(ScanConfig::repeating(50)));
    let busy = acquisition.with_device(|device| device.pcb_temperature());
    assert!(matches!(busy, Err(Error::Busy)));

    acquisition.stop();
    acquisition.wait().expect("scan failed");
    let temperature = acquisition
        .with_device(|device| device.pcb_temperature())
        .expect("device still busy")
        .expect("temperature query failed");
    assert_relative_eq!(temperature, 0x1800 as f64 * 0.003906);
}

#[test]
fn test_published_frame_carries_spectrum() {
    let sim = default_sim().with_spectrum(single_line_spectrum(1500, 60000));
    let (mut acquisition, _log) = simulated_acquisition(sim);

    assert!(acquisition.start(ScanConfig::single_shot()));
    acquisition.wait().expect("scan failed");

    let frame = acquisition.latest_frame().expect("no frame published");
    assert_eq!(frame.peak(22..3670), Some((1500, 60000)));
}
