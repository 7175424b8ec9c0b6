use crate::capture::RawBlock;
use crate::channel::{Channel, VoltageRange};
use crate::driver::DeviceDriver;
use crate::error::{AcquisitionError, Result};
use crate::session::DeviceSession;
use chrono::{DateTime, Utc};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

pub const TIME_COLUMN_NAME: &str = "time_ns";

/// `t_k = (k - pre_trigger) * interval_ns`, so the trigger sample sits at zero.
pub fn time_axis(len: usize, pre_trigger: u32, interval_ns: f64) -> Vec<f64> {
    let pre = f64::from(pre_trigger);
    (0..len).map(|k| (k as f64 - pre) * interval_ns).collect()
}

/// Convert a device count to millivolts on a channel spanning `±range`.
pub fn adc_to_mv(count: f64, max_adc_count: i16, range: VoltageRange) -> f64 {
    count / f64::from(max_adc_count) * range.full_scale_mv()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleChannel {
    pub channel: Channel,
    pub counts: Vec<f64>,
    pub overflowed: bool,
}

/// A block in real-valued counts with its trigger-relative time axis.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    pub time_ns: Vec<f64>,
    pub channels: Vec<SampleChannel>,
    pub pre_trigger: u32,
    pub sample_interval_ns: f64,
    pub started_at: DateTime<Utc>,
}

impl SampleBlock {
    pub fn len(&self) -> usize {
        self.time_ns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_ns.is_empty()
    }

    pub fn channel(&self, channel: Channel) -> Option<&SampleChannel> {
        self.channels.iter().find(|c| c.channel == channel)
    }
}

impl From<RawBlock> for SampleBlock {
    fn from(block: RawBlock) -> Self {
        let len = block.len();
        Self {
            time_ns: time_axis(len, block.pre_trigger, block.sample_interval_ns),
            channels: block
                .channels
                .into_iter()
                .map(|c| SampleChannel {
                    channel: c.channel,
                    counts: c.samples.into_iter().map(f64::from).collect(),
                    overflowed: c.overflowed,
                })
                .collect(),
            pre_trigger: block.pre_trigger,
            sample_interval_ns: block.sample_interval_ns,
            started_at: block.started_at,
        }
    }
}

/// Turns blocks into millivolt bundles using one session's calibration.
#[derive(Debug, Clone)]
pub struct BundleBuilder {
    max_adc_count: i16,
    ranges: BTreeMap<Channel, VoltageRange>,
    absolute_time: bool,
}

impl BundleBuilder {
    pub fn new(max_adc_count: i16, ranges: BTreeMap<Channel, VoltageRange>) -> Result<Self> {
        if max_adc_count <= 0 {
            return Err(AcquisitionError::configuration(format!(
                "maximum ADC count must be positive, got {max_adc_count}"
            )));
        }
        Ok(Self {
            max_adc_count,
            ranges,
            absolute_time: false,
        })
    }

    pub fn for_session<D: DeviceDriver + ?Sized>(session: &DeviceSession<'_, D>) -> Result<Self> {
        let max = session
            .max_adc_count()
            .ok_or_else(|| AcquisitionError::configuration("no channel is enabled"))?;
        Self::new(max, session.channel_ranges().clone())
    }

    /// Stamp bundles with the capture-start time.
    pub fn absolute_time(mut self, enabled: bool) -> Self {
        self.absolute_time = enabled;
        self
    }

    pub fn build(&self, block: SampleBlock) -> Result<SampleBundle> {
        let len = block.len();
        let mut channels = Vec::with_capacity(block.channels.len());
        for c in block.channels {
            let range = self.ranges.get(&c.channel).copied().ok_or_else(|| {
                AcquisitionError::configuration(format!("no range recorded for {}", c.channel))
            })?;
            if c.counts.len() != len {
                return Err(AcquisitionError::configuration(format!(
                    "{} has {} samples, time axis has {len}",
                    c.channel,
                    c.counts.len()
                )));
            }
            channels.push(ChannelTrace {
                channel: c.channel,
                millivolts: c
                    .counts
                    .iter()
                    .map(|&count| adc_to_mv(count, self.max_adc_count, range))
                    .collect(),
                overflowed: c.overflowed,
            });
        }

        Ok(SampleBundle {
            time_ns: block.time_ns,
            channels,
            sample_interval_ns: block.sample_interval_ns,
            epoch: self.absolute_time.then_some(block.started_at),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelTrace {
    channel: Channel,
    millivolts: Vec<f64>,
    overflowed: bool,
}

impl ChannelTrace {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn millivolts(&self) -> &[f64] {
        &self.millivolts
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }
}

/// Finished, unit-converted capture.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBundle {
    time_ns: Vec<f64>,
    channels: Vec<ChannelTrace>,
    sample_interval_ns: f64,
    epoch: Option<DateTime<Utc>>,
}

impl SampleBundle {
    /// Trigger-relative sample times.
    pub fn time_ns(&self) -> &[f64] {
        &self.time_ns
    }

    pub fn channels(&self) -> &[ChannelTrace] {
        &self.channels
    }

    pub fn channel(&self, channel: Channel) -> Option<&[f64]> {
        self.channels
            .iter()
            .find(|t| t.channel == channel)
            .map(ChannelTrace::millivolts)
    }

    pub fn overflowed(&self, channel: Channel) -> bool {
        self.channels
            .iter()
            .any(|t| t.channel == channel && t.overflowed)
    }

    pub fn sample_interval_ns(&self) -> f64 {
        self.sample_interval_ns
    }

    /// Capture start, present when absolute time was requested.
    pub fn epoch(&self) -> Option<DateTime<Utc>> {
        self.epoch
    }

    /// Sample times in nanoseconds since the Unix epoch.
    pub fn absolute_time_ns(&self) -> Option<Vec<i64>> {
        let start = self.epoch?.timestamp_nanos_opt()?;
        Some(
            self.time_ns
                .iter()
                .map(|&t| start + t.round() as i64)
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.time_ns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_ns.is_empty()
    }

    /// One `time_ns` column plus one `ChX_mV` column per channel. The time
    /// column is absolute when the bundle carries an epoch.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let time: Column = match self.absolute_time_ns() {
            Some(absolute) => Series::new(TIME_COLUMN_NAME.into(), absolute).into(),
            None => Series::new(TIME_COLUMN_NAME.into(), self.time_ns.clone()).into(),
        };
        let mut columns = vec![time];
        for trace in &self.channels {
            let column: Column =
                Series::new(trace.channel.column_name().into(), trace.millivolts.clone()).into();
            columns.push(column);
        }
        Ok(DataFrame::new(columns)?)
    }

    /// Write the bundle as Parquet for `.parquet` paths and CSV otherwise.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut df = self.to_dataframe()?;
        let mut file = File::create(path)?;
        let is_parquet = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("parquet"));
        if is_parquet {
            ParquetWriter::new(&mut file).finish(&mut df)?;
        } else {
            CsvWriter::new(&mut file).finish(&mut df)?;
        }
        log::info!("trace saved to {}", path.display());
        Ok(())
    }
}
