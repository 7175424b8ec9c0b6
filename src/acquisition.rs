//! Entry points: plan a capture, run it against a unit and hand the bundle on.
//!
//! A [`Digitizer`] owns the driver behind a mutex that is held from open to
//! close, so two acquisitions never talk to the same unit at once. Blocking
//! callers use [`Digitizer::acquire`]; hosts with their own event loop use
//! [`Digitizer::spawn_acquire`] and check the returned [`PendingAcquisition`].

use crate::bundle::{BundleBuilder, SampleBlock, SampleBundle};
use crate::capture::{capture, CancelToken, OverflowPolicy, PollSettings, RawBlock};
use crate::channel::{Channel, ChannelSettings, Resolution, VoltageRange};
use crate::compensate::compensate;
use crate::config::AcquisitionConfig;
use crate::driver::DeviceDriver;
use crate::error::{AcquisitionError, Result};
use crate::session::DeviceSession;
use crate::timebase::{
    plan, CaptureWindow, DeviceModel, TimebaseDescriptor, TimingModel, TimingTable,
};
use crate::trigger_config::{SimpleTrigger, TriggerSource};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Everything one acquisition needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionRequest {
    pub duration: Duration,
    pub window: CaptureWindow,
    pub resolution: Resolution,
    pub channels: Vec<(Channel, ChannelSettings)>,
    pub trigger: SimpleTrigger,
    /// `None` uses the device family's default.
    pub oversampling: Option<u32>,
    pub poll_interval: Option<Duration>,
    pub overflow: OverflowPolicy,
    pub absolute_time: bool,
}

impl Default for AcquisitionRequest {
    fn default() -> Self {
        Self {
            duration: Duration::from_millis(1),
            window: CaptureWindow {
                pre_trigger: 5_000,
                post_trigger: 5_000,
            },
            resolution: Resolution::Bits12,
            channels: vec![
                (Channel::A, ChannelSettings::dc(VoltageRange::V10)),
                (Channel::B, ChannelSettings::dc(VoltageRange::V10)),
            ],
            trigger: SimpleTrigger::start_capturing_when(TriggerSource::External, 500.0)
                .rising_edge()
                .wait_indefinitely()
                .build(),
            oversampling: None,
            poll_interval: None,
            overflow: OverflowPolicy::Reject,
            absolute_time: false,
        }
    }
}

impl AcquisitionRequest {
    pub fn enabled_channels(&self) -> usize {
        self.channels.iter().filter(|(_, s)| s.enabled).count()
    }
}

/// What the device will actually be asked to do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapturePlan {
    pub model: DeviceModel,
    pub resolution: Resolution,
    pub timing: TimingModel,
    /// Samples delivered to the caller.
    pub requested: CaptureWindow,
    /// Samples recorded by the device, `oversampling` times `requested`.
    pub device_window: CaptureWindow,
    pub oversampling: u32,
    pub timebase: TimebaseDescriptor,
}

impl CapturePlan {
    pub fn is_oversampled(&self) -> bool {
        self.oversampling > 1
    }

    /// Spacing of the delivered samples.
    pub fn effective_interval_ns(&self) -> f64 {
        self.timebase.sample_interval_ns * f64::from(self.oversampling)
    }
}

pub fn plan_capture(
    model: DeviceModel,
    table: &TimingTable,
    request: &AcquisitionRequest,
) -> Result<CapturePlan> {
    let timing = table.lookup(model, request.resolution)?;
    let enabled = request.enabled_channels();
    if enabled == 0 {
        return Err(AcquisitionError::configuration("no channel is enabled"));
    }
    if enabled > timing.max_channels {
        return Err(AcquisitionError::configuration(format!(
            "{model} at {} supports {} channels, {enabled} enabled",
            request.resolution, timing.max_channels
        )));
    }

    let oversampling = request
        .oversampling
        .unwrap_or_else(|| model.default_oversampling());
    let device_window = request.window.oversampled(oversampling)?;
    let timebase = plan(request.duration, device_window.total(), &timing)?;

    Ok(CapturePlan {
        model,
        resolution: request.resolution,
        timing,
        requested: request.window,
        device_window,
        oversampling,
        timebase,
    })
}

/// Receives finished bundles.
pub trait BundleSink {
    fn deliver(&mut self, bundle: &SampleBundle) -> Result<()>;
}

impl BundleSink for Vec<SampleBundle> {
    fn deliver(&mut self, bundle: &SampleBundle) -> Result<()> {
        self.push(bundle.clone());
        Ok(())
    }
}

impl<S: BundleSink + ?Sized> BundleSink for &mut S {
    fn deliver(&mut self, bundle: &SampleBundle) -> Result<()> {
        (**self).deliver(bundle)
    }
}

/// Writes every bundle to the same file, CSV unless the path ends in `.parquet`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BundleSink for FileSink {
    fn deliver(&mut self, bundle: &SampleBundle) -> Result<()> {
        bundle.save(&self.path)
    }
}

pub struct Digitizer<D> {
    driver: Arc<Mutex<D>>,
    model: DeviceModel,
    timing: TimingTable,
    request: AcquisitionRequest,
}

impl<D: DeviceDriver> Digitizer<D> {
    pub fn new(driver: D, model: DeviceModel) -> Self {
        let request = AcquisitionRequest {
            resolution: model.default_resolution(),
            ..AcquisitionRequest::default()
        };
        Self {
            driver: Arc::new(Mutex::new(driver)),
            model,
            timing: TimingTable::default(),
            request,
        }
    }

    pub fn from_config(driver: D, config: &AcquisitionConfig) -> Result<Self> {
        let digitizer = Self {
            driver: Arc::new(Mutex::new(driver)),
            model: config.device.model,
            timing: config.timing_table(),
            request: config.to_request()?,
        };
        digitizer.plan()?;
        Ok(digitizer)
    }

    pub fn with_timing_table(mut self, timing: TimingTable) -> Self {
        self.timing = timing;
        self
    }

    pub fn model(&self) -> DeviceModel {
        self.model
    }

    /// Shared handle to the driver. Holding its lock blocks acquisitions.
    pub fn driver(&self) -> Arc<Mutex<D>> {
        Arc::clone(&self.driver)
    }

    pub fn request(&self) -> &AcquisitionRequest {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut AcquisitionRequest {
        &mut self.request
    }

    pub fn plan(&self) -> Result<CapturePlan> {
        plan_capture(self.model, &self.timing, &self.request)
    }

    /// Set the capture duration and sample counts. Nothing changes when the
    /// combination is infeasible.
    pub fn configure_duration(
        &mut self,
        duration: Duration,
        pre_trigger: u32,
        post_trigger: u32,
    ) -> Result<CapturePlan> {
        let request = AcquisitionRequest {
            duration,
            window: CaptureWindow::new(pre_trigger, post_trigger)?,
            ..self.request.clone()
        };
        let plan = plan_capture(self.model, &self.timing, &request)?;
        self.request = request;

        if plan.is_oversampled() {
            log::info!(
                "{:?} over {} samples: timebase {} at {:.1} ns, oversampled x{} to {:.1} ns",
                duration,
                plan.requested.total(),
                plan.timebase.timebase_code,
                plan.timebase.sample_interval_ns,
                plan.oversampling,
                plan.effective_interval_ns()
            );
        } else {
            log::info!(
                "{:?} over {} samples: timebase {} at {:.1} ns",
                duration,
                plan.requested.total(),
                plan.timebase.timebase_code,
                plan.timebase.sample_interval_ns
            );
        }
        Ok(plan)
    }

    /// Capture one block from unit `serial`, deliver it to `sink` and return it.
    pub fn acquire<S: BundleSink + ?Sized>(&self, sink: &mut S, serial: &str) -> Result<SampleBundle> {
        let plan = self.plan()?;
        let bundle = {
            let mut driver = self.driver.lock();
            run_acquisition(&mut *driver, serial, &self.request, &plan, None)?
        };
        sink.deliver(&bundle)?;
        Ok(bundle)
    }
}

impl<D: DeviceDriver + Send + 'static> Digitizer<D> {
    /// Run [`Digitizer::acquire`] on a worker thread.
    pub fn spawn_acquire<S>(&self, mut sink: S, serial: impl Into<String>) -> PendingAcquisition<S>
    where
        S: BundleSink + Send + 'static,
    {
        let driver = Arc::clone(&self.driver);
        let model = self.model;
        let timing = self.timing.clone();
        let request = self.request.clone();
        let serial = serial.into();
        let cancel = CancelToken::new();
        let token = cancel.clone();

        let worker = std::thread::spawn(move || -> WorkerResult<S> {
            let plan = plan_capture(model, &timing, &request)?;
            let bundle = {
                let mut driver = driver.lock();
                run_acquisition(&mut *driver, &serial, &request, &plan, Some(token))?
            };
            sink.deliver(&bundle)?;
            Ok((bundle, sink))
        });

        PendingAcquisition {
            worker: Some(worker),
            cancel,
        }
    }
}

type WorkerResult<S> = Result<(SampleBundle, S)>;

/// An acquisition running on a worker thread.
pub struct PendingAcquisition<S> {
    worker: Option<JoinHandle<WorkerResult<S>>>,
    cancel: CancelToken,
}

impl<S> PendingAcquisition<S> {
    /// The finished acquisition, or `self` back while the worker still runs.
    pub fn try_get_result(mut self) -> Result<std::result::Result<(SampleBundle, S), Self>> {
        let running = self.worker.as_ref().is_some_and(|w| !w.is_finished());
        if running {
            return Ok(Err(self));
        }
        self.join().map(Ok)
    }

    pub fn wait(mut self) -> WorkerResult<S> {
        self.join()
    }

    /// Ask the worker to stop polling; the unit is stopped and closed before
    /// the worker returns.
    pub fn cancel(mut self) -> WorkerResult<S> {
        self.cancel.cancel();
        self.join()
    }

    fn join(&mut self) -> WorkerResult<S> {
        let worker = self
            .worker
            .take()
            .ok_or_else(|| AcquisitionError::Worker("result already taken".to_string()))?;
        worker.join().map_err(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            AcquisitionError::Worker(message)
        })?
    }
}

impl<S> Drop for PendingAcquisition<S> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.cancel.cancel();
        }
    }
}

/// Open, configure, capture and close one unit, then convert the block.
pub fn run_acquisition<D: DeviceDriver + ?Sized>(
    driver: &mut D,
    serial: &str,
    request: &AcquisitionRequest,
    plan: &CapturePlan,
    cancel: Option<CancelToken>,
) -> Result<SampleBundle> {
    let mut session = DeviceSession::open(driver, serial, request.resolution)?;
    let captured = capture_block(&mut session, request, plan, cancel);
    let closed = session.close();

    let (raw, builder) = match (captured, closed) {
        (Ok(done), Ok(())) => done,
        (Ok(_), Err(e)) | (Err(e), Ok(())) => return Err(e),
        (Err(e), Err(close_error)) => {
            log::warn!("{close_error} after {e}");
            return Err(e);
        }
    };

    let block = compensate(SampleBlock::from(raw), plan.oversampling)?;
    builder.build(block)
}

fn capture_block<D: DeviceDriver + ?Sized>(
    session: &mut DeviceSession<'_, D>,
    request: &AcquisitionRequest,
    plan: &CapturePlan,
    cancel: Option<CancelToken>,
) -> Result<(RawBlock, BundleBuilder)> {
    session.configure_channels(&request.channels)?;
    session.configure_trigger(&request.trigger)?;
    let timebase = session.query_timebase(&plan.timebase)?;
    let poll = PollSettings {
        interval: request.poll_interval,
        cancel,
    };
    let raw = capture(session, &timebase, plan.device_window, &poll, request.overflow)?;
    let builder = BundleBuilder::for_session(session)?.absolute_time(request.absolute_time);
    Ok((raw, builder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedDriver;
    use crate::status::{Command, PicoStatus};

    #[test]
    fn test_configure_duration_plan() {
        let mut digitizer = Digitizer::new(SimulatedDriver::new(DeviceModel::Ps5000a), DeviceModel::Ps5000a);
        let plan = digitizer
            .configure_duration(Duration::from_millis(1), 5_000, 5_000)
            .unwrap();
        assert_eq!(plan.timebase.timebase_code, 9);
        assert!(!plan.is_oversampled());
        assert_eq!(plan.device_window.total(), 10_000);
    }

    #[test]
    fn test_ps3000a_oversamples_by_default() {
        let mut digitizer = Digitizer::new(SimulatedDriver::new(DeviceModel::Ps3000a), DeviceModel::Ps3000a);
        let plan = digitizer
            .configure_duration(Duration::from_millis(10), 100, 400)
            .unwrap();
        assert_eq!(plan.oversampling, 32);
        assert_eq!(plan.device_window.pre_trigger, 3_200);
        assert_eq!(plan.resolution, Resolution::Bits8);
    }

    #[test]
    fn test_infeasible_duration_keeps_previous_request() {
        let mut digitizer = Digitizer::new(SimulatedDriver::new(DeviceModel::Ps5000a), DeviceModel::Ps5000a);
        let before = digitizer.request().clone();
        let err = digitizer
            .configure_duration(Duration::from_nanos(1), 5_000, 5_000)
            .unwrap_err();
        assert!(matches!(err, AcquisitionError::InfeasibleTimebase { .. }));
        assert_eq!(digitizer.request(), &before);
    }

    #[test]
    fn test_too_many_channels_for_resolution() {
        let mut digitizer = Digitizer::new(SimulatedDriver::new(DeviceModel::Ps5000a), DeviceModel::Ps5000a);
        digitizer.request_mut().resolution = Resolution::Bits16;
        assert!(matches!(
            digitizer.plan(),
            Err(AcquisitionError::Configuration { .. })
        ));
    }

    #[test]
    fn test_acquire_delivers_to_sink() {
        let digitizer = Digitizer::new(
            SimulatedDriver::new(DeviceModel::Ps5000a).with_polls_until_ready(5),
            DeviceModel::Ps5000a,
        );
        let mut sink: Vec<SampleBundle> = Vec::new();
        let bundle = digitizer.acquire(&mut sink, "SIM001").unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0], bundle);
        assert_eq!(bundle.len(), 10_000);
        assert_eq!(bundle.time_ns()[5_000], 0.0);
        assert!(!digitizer.driver().lock().is_open());
    }

    #[test]
    fn test_transfer_failure_still_closes() {
        let digitizer = Digitizer::new(
            SimulatedDriver::new(DeviceModel::Ps5000a).fail_on(Command::GetValues, PicoStatus::NotResponding),
            DeviceModel::Ps5000a,
        );
        let err = digitizer.acquire(&mut Vec::<SampleBundle>::new(), "SIM001").unwrap_err();
        assert_eq!(err.command(), Some(Command::GetValues));
        let driver = digitizer.driver();
        let driver = driver.lock();
        assert_eq!(driver.calls(Command::Stop), 1);
        assert_eq!(driver.calls(Command::CloseUnit), 1);
    }

    #[test]
    fn test_spawned_acquisition_can_be_cancelled() {
        let digitizer = Digitizer::new(
            SimulatedDriver::new(DeviceModel::Ps5000a).with_polls_until_ready(u32::MAX),
            DeviceModel::Ps5000a,
        );
        let pending = digitizer.spawn_acquire(Vec::<SampleBundle>::new(), "SIM001");
        let Ok(Err(pending)) = pending.try_get_result() else {
            unreachable!("acquisition finished without a trigger");
        };
        let err = pending.cancel().err();
        assert!(matches!(err, Some(AcquisitionError::Cancelled)));
        assert_eq!(digitizer.driver().lock().calls(Command::CloseUnit), 1);
    }
}
