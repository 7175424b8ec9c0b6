//! # BlockScope RS
//!
//! Block-mode acquisition for PicoScope-class waveform digitizers (5000A and 3000A
//! families).
//!
//! The library turns a request of the form "capture this long, with this many samples
//! before and after the trigger" into device timing, drives the unit through
//! open → configure → arm → wait → transfer → close, and hands back a trigger-relative,
//! millivolt-scaled bundle that can be written to CSV or Parquet.
//!
//! ## Features
//!
//! - **Timebase planning**: Duration and sample counts become a device timebase code,
//!   with per-family timing tables that can be overridden from configuration
//! - **Safe device lifecycle**: A session closes its unit exactly once, on every path
//! - **Status log**: Every device command and its status is recorded per session
//! - **Oversampling**: Runs of samples are averaged to gain resolution (x32 by default
//!   on the 3000A)
//! - **DataFrame output**: Uses `polars` for writing `time_ns` / `ChA_mV` / … tables
//! - **Simulated device**: Run everything without hardware through [`SimulatedDriver`]
//!
//! ## Examples
//!
//! ### Single Acquisition
//!
//! ```rust
//! use blockscope_rs::{Digitizer, DeviceModel, SampleBundle, SimulatedDriver};
//! use std::time::Duration;
//!
//! let driver = SimulatedDriver::new(DeviceModel::Ps5000a);
//! let mut scope = Digitizer::new(driver, DeviceModel::Ps5000a);
//!
//! // 1 ms window, 5000 samples on each side of the trigger
//! let plan = scope.configure_duration(Duration::from_millis(1), 5_000, 5_000)?;
//! assert_eq!(plan.timebase.timebase_code, 9);
//!
//! let mut collected: Vec<SampleBundle> = Vec::new();
//! let bundle = scope.acquire(&mut collected, "GO021/0001")?;
//! println!("Captured {} samples at {} ns", bundle.len(), bundle.sample_interval_ns());
//! # Ok::<(), blockscope_rs::AcquisitionError>(())
//! ```
//!
//! ### Trigger Configuration
//!
//! ```rust
//! use blockscope_rs::{Channel, SimpleTrigger, TriggerSource};
//! use std::time::Duration;
//!
//! let trigger = SimpleTrigger::start_capturing_when(TriggerSource::Channel(Channel::A), -250.0)
//!     .falling_edge()
//!     .auto_trigger_after(Duration::from_millis(100))
//!     .build();
//!
//! // Threshold in device counts for a ±500 mV channel
//! let raw = trigger.to_raw(500.0, 32_767).unwrap();
//! assert_eq!(raw.threshold, -16_384);
//! ```
//!
//! ### Background Acquisition
//!
//! ```rust
//! use blockscope_rs::{Digitizer, DeviceModel, FileSink, SimulatedDriver};
//! use std::time::Duration;
//!
//! let dir = tempfile::tempdir()?;
//! let driver = SimulatedDriver::new(DeviceModel::Ps3000a).with_polls_until_ready(100);
//! let mut scope = Digitizer::new(driver, DeviceModel::Ps3000a);
//!
//! // The 3000A records 32 samples for every delivered one
//! let plan = scope.configure_duration(Duration::from_millis(20), 500, 500)?;
//! assert_eq!(plan.device_window.total(), 32_000);
//!
//! let mut pending = scope.spawn_acquire(FileSink::new(dir.path().join("trace.parquet")), "JO123/0042");
//! let (bundle, _sink) = loop {
//!     pending = match pending.try_get_result()? {
//!         Ok(done) => break done,
//!         Err(still_running) => still_running,
//!     };
//!     // do other work here
//! };
//! assert_eq!(bundle.len(), 1_000);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Driving a Session by Hand
//!
//! ```rust
//! use blockscope_rs::capture::{capture, OverflowPolicy, PollSettings};
//! use blockscope_rs::{
//!     compensate, BundleBuilder, Channel, ChannelSettings, DeviceModel, DeviceSession,
//!     Resolution, SampleBlock, SimulatedDriver, VoltageRange,
//! };
//! use blockscope_rs::timebase::{plan, CaptureWindow, TimingTable};
//! use std::time::Duration;
//!
//! let mut driver = SimulatedDriver::new(DeviceModel::Ps5000a);
//! let mut session = DeviceSession::open(&mut driver, "GO021/0001", Resolution::Bits14)?;
//! session.configure_channels(&[(Channel::A, ChannelSettings::dc(VoltageRange::V1))])?;
//!
//! let timing = TimingTable::default().lookup(DeviceModel::Ps5000a, Resolution::Bits14)?;
//! let window = CaptureWindow::new(1_000, 3_000)?;
//! let timebase = session.query_timebase(&plan(Duration::from_micros(400), window.total(), &timing)?)?;
//! let raw = capture(&mut session, &timebase, window, &PollSettings::default(), OverflowPolicy::Reject)?;
//! let builder = BundleBuilder::for_session(&session)?;
//! session.close()?;
//!
//! let bundle = builder.build(compensate(SampleBlock::from(raw), 1)?)?;
//! assert_eq!(bundle.time_ns()[1_000], 0.0);
//! # Ok::<(), blockscope_rs::AcquisitionError>(())
//! ```

pub mod acquisition;
pub mod bundle;
pub mod capture;
pub mod channel;
pub mod compensate;
pub mod config;
pub mod driver;
pub mod error;
pub mod session;
pub mod simulated;
pub mod status;
pub mod timebase;
pub mod trigger_config;

// Re-export the main types for convenience
pub use acquisition::{
    AcquisitionRequest, BundleSink, CapturePlan, Digitizer, FileSink, PendingAcquisition,
};

pub use bundle::{BundleBuilder, SampleBlock, SampleBundle};

pub use capture::{CancelToken, RawBlock};

pub use channel::{Channel, ChannelSettings, Coupling, Resolution, VoltageRange};

pub use compensate::compensate;

pub use config::AcquisitionConfig;

pub use driver::DeviceDriver;

pub use error::{AcquisitionError, Result};

pub use session::{DeviceSession, SessionState};

pub use simulated::SimulatedDriver;

pub use status::{Command, PicoStatus, StatusLog};

pub use timebase::{DeviceModel, TimebaseDescriptor};

pub use trigger_config::{SimpleTrigger, ThresholdDirection, TriggerSource};
