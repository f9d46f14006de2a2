//! Acquisition state machine.
//!
//! An [`Acquisition`] owns one USB4000 session and drives it from a single
//! worker thread. A scan initializes the device, loads the wavelength
//! calibration (once per session), reads the status block, then captures
//! frames either once (`rate_hz == 0`) or repeatedly at `rate_hz` until
//! stopped. Each captured frame replaces the shared latest frame and is
//! offered to subscribers.
//!
//! Cancellation is cooperative. [`Acquisition::stop`] raises a flag that the
//! worker checks before starting the next capture, so a frame in flight is
//! always completed. Observers are notified synchronously from the worker
//! thread when a run starts and when it ends.
//!
//! ```no_run
//! use spectrascan::acquisition::{Acquisition, ScanConfig};
//! use rs_usb4000::{DeviceProfile, SimulatedDevice, Usb4000};
//!
//! let profile = DeviceProfile::usb4000();
//! let device = Usb4000::new(SimulatedDevice::new(profile.clone()), profile);
//! let mut acquisition = Acquisition::new(device);
//! acquisition.add_observer(|running: bool| println!("running: {running}"));
//! acquisition.start(ScanConfig::single_shot());
//! acquisition.wait()?;
//! let frame = acquisition.latest_frame().expect("one frame");
//! println!("{} pixels", frame.len());
//! # Ok::<(), spectrascan::Error>(())
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use rs_usb4000::{CalibrationCoefficients, DeviceInfo, IntensityFrame, Transport, Usb4000};

use crate::error::{Error, Result};

/// What a run should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunMode {
    /// Capture spectra.
    Scan,
    /// Gather a [`DeviceInfo`] report, then go back to idle.
    InfoQuery,
    /// End the current run.
    Stop,
}

/// Where the acquisition currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    Scanning,
    InfoQuery,
    Stopped,
}

impl RunState {
    pub fn is_running(self) -> bool {
        matches!(self, RunState::Scanning | RunState::InfoQuery)
    }
}

/// Run request: repeat rate and mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanConfig {
    /// Frames per second; 0 captures a single frame.
    pub rate_hz: u32,
    pub mode: RunMode,
}

impl ScanConfig {
    pub fn new(rate_hz: u32, mode: RunMode) -> Self {
        Self { rate_hz, mode }
    }

    pub fn single_shot() -> Self {
        Self::new(0, RunMode::Scan)
    }

    pub fn repeating(rate_hz: u32) -> Self {
        Self::new(rate_hz, RunMode::Scan)
    }

    pub fn info_query() -> Self {
        Self::new(0, RunMode::InfoQuery)
    }

    /// Target time between capture starts, if repeating.
    pub fn period(&self) -> Option<Duration> {
        scan_period(self.rate_hz)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::single_shot()
    }
}

fn scan_period(rate_hz: u32) -> Option<Duration> {
    (rate_hz > 0).then(|| Duration::from_millis(1000 / rate_hz as u64))
}

/// Receives run-state changes from the worker thread.
pub trait RunStateObserver: Send + Sync {
    /// Called with `true` when a run starts and `false` when it ends.
    fn on_run_state_changed(&self, running: bool);

    /// Called before the final `false` notification when a run aborts.
    fn on_error(&self, _error: &Error) {}
}

impl<F> RunStateObserver for F
where
    F: Fn(bool) + Send + Sync,
{
    fn on_run_state_changed(&self, running: bool) {
        self(running)
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the controlling handle and the worker.
struct Shared {
    state: Mutex<RunState>,
    rate_hz: AtomicU32,
    stop_requested: AtomicBool,
    latest_frame: Mutex<Option<Arc<IntensityFrame>>>,
    calibration: Mutex<Option<CalibrationCoefficients>>,
    device_info: Mutex<Option<DeviceInfo>>,
    observers: Mutex<Vec<Arc<dyn RunStateObserver>>>,
    subscribers: Mutex<Vec<Sender<Arc<IntensityFrame>>>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(RunState::Idle),
            rate_hz: AtomicU32::new(0),
            stop_requested: AtomicBool::new(false),
            latest_frame: Mutex::new(None),
            calibration: Mutex::new(None),
            device_info: Mutex::new(None),
            observers: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn set_state(&self, state: RunState) {
        let mut current = lock(&self.state);
        trace!("Run state {:?} -> {:?}", *current, state);
        *current = state;
    }

    fn notify(&self, running: bool) {
        let observers = lock(&self.observers).clone();
        for observer in observers {
            observer.on_run_state_changed(running);
        }
    }

    fn notify_error(&self, error: &Error) {
        let observers = lock(&self.observers).clone();
        for observer in observers {
            observer.on_error(error);
        }
    }

    fn publish(&self, frame: IntensityFrame) {
        let frame = Arc::new(frame);
        *lock(&self.latest_frame) = Some(Arc::clone(&frame));

        lock(&self.subscribers).retain(|tx| match tx.try_send(Arc::clone(&frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Frame subscriber lagging, frame dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

/// Controls one USB4000 session from a worker thread.
pub struct Acquisition<T: Transport + Send + 'static> {
    device: Arc<Mutex<Usb4000<T>>>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<Result<()>>>,
}

impl<T: Transport + Send + 'static> Acquisition<T> {
    pub fn new(device: Usb4000<T>) -> Self {
        Self {
            device: Arc::new(Mutex::new(device)),
            shared: Arc::new(Shared::new()),
            worker: None,
        }
    }

    pub fn add_observer<O: RunStateObserver + 'static>(&self, observer: O) {
        lock(&self.shared.observers).push(Arc::new(observer));
    }

    /// Frames captured from now on, buffered up to `capacity`. Frames are
    /// dropped for this subscriber while its buffer is full.
    pub fn subscribe(&self, capacity: usize) -> Receiver<Arc<IntensityFrame>> {
        let (tx, rx) = channel::bounded(capacity);
        lock(&self.shared.subscribers).push(tx);
        rx
    }

    /// Start a run. Returns `false` without side effects if one is already
    /// running. A `Stop` request behaves like [`stop`](Self::stop).
    pub fn start(&mut self, config: ScanConfig) -> bool {
        let next = match config.mode {
            RunMode::Stop => {
                self.stop();
                return false;
            }
            RunMode::Scan => RunState::Scanning,
            RunMode::InfoQuery => RunState::InfoQuery,
        };

        if self.worker.as_ref().is_some_and(|h| h.is_finished()) {
            self.reap_worker();
        }

        {
            let mut state = lock(&self.shared.state);
            if state.is_running() {
                debug!("Start ignored, acquisition already {:?}", *state);
                return false;
            }
            *state = next;
        }
        self.reap_worker();

        self.shared.stop_requested.store(false, Ordering::SeqCst);
        self.shared.rate_hz.store(config.rate_hz, Ordering::SeqCst);

        let device = Arc::clone(&self.device);
        let shared = Arc::clone(&self.shared);
        let mode = config.mode;
        self.worker = Some(thread::spawn(move || run_worker(device, shared, mode)));
        true
    }

    /// Ask the worker to stop before its next capture.
    pub fn stop(&self) {
        if self.state().is_running() {
            debug!("Stop requested");
        }
        self.shared.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Change the repeat rate; takes effect after the current frame.
    pub fn set_rate(&self, rate_hz: u32) {
        self.shared.rate_hz.store(rate_hz, Ordering::SeqCst);
    }

    pub fn rate(&self) -> u32 {
        self.shared.rate_hz.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RunState {
        *lock(&self.shared.state)
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Most recently captured frame.
    pub fn latest_frame(&self) -> Option<Arc<IntensityFrame>> {
        lock(&self.shared.latest_frame).clone()
    }

    /// Calibration loaded by the last run, if any.
    pub fn calibration(&self) -> Option<CalibrationCoefficients> {
        *lock(&self.shared.calibration)
    }

    /// Report gathered by the last info query.
    pub fn device_info(&self) -> Option<DeviceInfo> {
        lock(&self.shared.device_info).clone()
    }

    /// Block until the current run ends and return its outcome.
    pub fn wait(&mut self) -> Result<()> {
        self.join_worker()
    }

    /// Run `f` against the device while no run is active.
    pub fn with_device<R>(&mut self, f: impl FnOnce(&mut Usb4000<T>) -> R) -> Result<R> {
        if self.worker.as_ref().is_some_and(|h| h.is_finished()) {
            self.reap_worker();
        }
        if self.is_running() {
            return Err(Error::Busy);
        }
        self.reap_worker();
        let mut device = lock(&self.device);
        Ok(f(&mut device))
    }

    fn join_worker(&mut self) -> Result<()> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        handle.join().unwrap_or_else(|_| {
            // the worker never reached its exit transition
            warn!("Acquisition worker panicked");
            self.shared.set_state(RunState::Stopped);
            self.shared.notify(false);
            Err(Error::WorkerPanicked)
        })
    }

    fn reap_worker(&mut self) {
        if let Err(e) = self.join_worker() {
            debug!("Previous run ended with: {}", e);
        }
    }
}

impl<T: Transport + Send + 'static> Drop for Acquisition<T> {
    fn drop(&mut self) {
        self.stop();
        self.reap_worker();
    }
}

fn run_worker<T: Transport>(
    device: Arc<Mutex<Usb4000<T>>>,
    shared: Arc<Shared>,
    mode: RunMode,
) -> Result<()> {
    shared.notify(true);

    let result = {
        let mut device = lock(&device);
        match mode {
            RunMode::InfoQuery => info_query(&mut device, &shared),
            _ => scan(&mut device, &shared),
        }
    };

    match &result {
        Ok(()) if mode == RunMode::InfoQuery => shared.set_state(RunState::Idle),
        Ok(()) => shared.set_state(RunState::Stopped),
        Err(e) => {
            warn!("Acquisition aborted: {}", e);
            shared.set_state(RunState::Stopped);
            shared.notify_error(e);
        }
    }
    shared.notify(false);
    result
}

/// Reset the device and load what every run needs.
fn prepare<T: Transport>(device: &mut Usb4000<T>, shared: &Shared) -> Result<bool> {
    device.initialize()?;
    let calibration = device.fetch_calibration()?;
    *lock(&shared.calibration) = Some(calibration);
    let status = device.status()?;
    debug!(
        "Device reports {} pixels at {}",
        status.pixel_count,
        if status.high_speed { "480 Mbps" } else { "12 Mbps" }
    );
    Ok(status.high_speed)
}

fn scan<T: Transport>(device: &mut Usb4000<T>, shared: &Shared) -> Result<()> {
    let high_speed = prepare(device, shared)?;
    let mut frames = 0u64;

    while !shared.stop_requested.load(Ordering::SeqCst) {
        let started = Instant::now();
        let frame = device.capture_frame(high_speed)?;
        trace!("Frame {} captured in {:?}", frames, started.elapsed());
        shared.publish(frame);
        frames += 1;

        let Some(period) = scan_period(shared.rate_hz.load(Ordering::SeqCst)) else {
            break;
        };
        if let Some(remaining) = period.checked_sub(started.elapsed()) {
            thread::sleep(remaining);
        }
    }

    info!("Scan finished after {} frame(s)", frames);
    Ok(())
}

fn info_query<T: Transport>(device: &mut Usb4000<T>, shared: &Shared) -> Result<()> {
    prepare(device, shared)?;
    let report = device.device_info()?;
    info!("Device {} ({})", report.serial_number, report.model);
    *lock(&shared.device_info) = Some(report);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_period() {
        assert_eq!(ScanConfig::single_shot().period(), None);
        assert_eq!(
            ScanConfig::repeating(5).period(),
            Some(Duration::from_millis(200))
        );
        // integer milliseconds
        assert_eq!(
            ScanConfig::repeating(3).period(),
            Some(Duration::from_millis(333))
        );
    }

    #[test]
    fn test_running_states() {
        assert!(RunState::Scanning.is_running());
        assert!(RunState::InfoQuery.is_running());
        assert!(!RunState::Idle.is_running());
        assert!(!RunState::Stopped.is_running());
    }

    #[test]
    fn test_closure_observer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: Arc<dyn RunStateObserver> =
            Arc::new(move |running: bool| sink.lock().unwrap().push(running));
        observer.on_run_state_changed(true);
        observer.on_error(&Error::Busy);
        observer.on_run_state_changed(false);
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn test_lock_recovers_from_poison() {
        let mutex = Arc::new(Mutex::new(7));
        let poisoner = Arc::clone(&mutex);
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(mutex.is_poisoned());
        assert_eq!(*lock(&mutex), 7);
    }
}
