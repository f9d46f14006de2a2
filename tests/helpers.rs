//! Test helpers for driving an acquisition against the simulated device

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rs_usb4000::sim::TransferLog;
use rs_usb4000::Endpoint;
use spectrascan::{
    Acquisition, DeviceProfile, Error, RunStateObserver, SimulatedDevice, Transport, Usb4000,
};

/// Wrap a simulated device in an acquisition and keep its transfer log
pub fn simulated_acquisition(sim: SimulatedDevice) -> (Acquisition<SimulatedDevice>, TransferLog) {
    let log = sim.log();
    let device = Usb4000::new(sim, DeviceProfile::usb4000());
    (Acquisition::new(device), log)
}

/// Default simulated USB4000 at high speed
pub fn default_sim() -> SimulatedDevice {
    SimulatedDevice::new(DeviceProfile::usb4000())
}

/// Event seen by a [`Recorder`]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Running(bool),
    Failed(String),
}

/// Observer that records every notification in order
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<Event>>>);

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn running_flags(&self) -> Vec<bool> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Running(running) => Some(running),
                Event::Failed(_) => None,
            })
            .collect()
    }
}

impl RunStateObserver for Recorder {
    fn on_run_state_changed(&self, running: bool) {
        self.0.lock().unwrap().push(Event::Running(running));
    }

    fn on_error(&self, error: &Error) {
        self.0.lock().unwrap().push(Event::Failed(error.to_string()));
    }
}

/// Synthetic spectrum with a single line at `pixel`
pub fn single_line_spectrum(pixel: usize, height: u16) -> Vec<u16> {
    (0..4096)
        .map(|p| if p == pixel { height } else { 1000 })
        .collect()
}

/// Simulated device whose bulk data reads each take `delay`
pub struct SlowDataReads {
    inner: SimulatedDevice,
    command_in: Endpoint,
    delay: Duration,
    capturing: Arc<AtomicBool>,
}

impl SlowDataReads {
    pub fn new(inner: SimulatedDevice, delay: Duration) -> Self {
        Self {
            inner,
            command_in: DeviceProfile::usb4000().command_in,
            delay,
            capturing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Raised once the first data block has been requested
    pub fn capture_started(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.capturing)
    }
}

impl Transport for SlowDataReads {
    fn send(&mut self, endpoint: Endpoint, data: &[u8]) -> rs_usb4000::Result<()> {
        self.inner.send(endpoint, data)
    }

    fn receive(&mut self, endpoint: Endpoint, length: usize) -> rs_usb4000::Result<Vec<u8>> {
        if endpoint != self.command_in {
            self.capturing.store(true, Ordering::SeqCst);
            thread::sleep(self.delay);
        }
        self.inner.receive(endpoint, length)
    }
}

/// Block until `flag` is raised, giving up after two seconds
pub fn wait_for(flag: &AtomicBool) {
    for _ in 0..2000 {
        if flag.load(Ordering::SeqCst) {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("flag never raised");
}
