//! Oversample-and-average: trading sample rate for resolution.
//!
//! A block recorded with `factor` times the requested samples is reduced by
//! replacing every run of `factor` consecutive values with their mean. The time
//! axis is averaged the same way, which keeps every averaged sample at the centre
//! of the interval it summarises.

use crate::bundle::{SampleBlock, SampleChannel};
use crate::error::{AcquisitionError, Result};

fn run_means(values: &[f64], factor: usize) -> Vec<f64> {
    let n = factor as f64;
    values
        .chunks_exact(factor)
        .map(|run| run.iter().sum::<f64>() / n)
        .collect()
}

pub fn compensate(block: SampleBlock, factor: u32) -> Result<SampleBlock> {
    let samples = block.len();
    let factor_len = factor as usize;
    if factor == 0 || samples % factor_len.max(1) != 0 {
        return Err(AcquisitionError::Decimation {
            samples,
            factor: factor_len,
        });
    }
    if factor == 1 {
        return Ok(block);
    }
    if let Some(c) = block.channels.iter().find(|c| c.counts.len() != samples) {
        return Err(AcquisitionError::Decimation {
            samples: c.counts.len(),
            factor: factor_len,
        });
    }

    log::debug!("averaging {samples} samples in runs of {factor}");
    Ok(SampleBlock {
        time_ns: run_means(&block.time_ns, factor_len),
        channels: block
            .channels
            .into_iter()
            .map(|c| SampleChannel {
                channel: c.channel,
                counts: run_means(&c.counts, factor_len),
                overflowed: c.overflowed,
            })
            .collect(),
        pre_trigger: block.pre_trigger / factor,
        sample_interval_ns: block.sample_interval_ns * f64::from(factor),
        started_at: block.started_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::time_axis;
    use crate::channel::Channel;
    use chrono::Utc;

    fn block(counts: Vec<f64>, pre_trigger: u32) -> SampleBlock {
        SampleBlock {
            time_ns: time_axis(counts.len(), pre_trigger, 8.0),
            channels: vec![SampleChannel {
                channel: Channel::A,
                counts,
                overflowed: false,
            }],
            pre_trigger,
            sample_interval_ns: 8.0,
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_constant_runs_are_exact() {
        let out = compensate(block(vec![-1234.0; 32 * 20], 32 * 5), 32).unwrap();
        assert_eq!(out.len(), 20);
        assert!(out.channel(Channel::A).unwrap().counts.iter().all(|&v| v == -1234.0));
        assert_eq!(out.pre_trigger, 5);
        assert_eq!(out.sample_interval_ns, 256.0);
    }

    #[test]
    fn test_run_means() {
        let out = compensate(block(vec![1.0, 2.0, 3.0, 10.0, 20.0, 30.0], 3), 3).unwrap();
        assert_eq!(out.channel(Channel::A).unwrap().counts, vec![2.0, 20.0]);
        assert_eq!(out.time_ns, vec![-16.0, 8.0]);
    }

    #[test]
    fn test_identity_factor() {
        let input = block(vec![1.0, 5.0, 7.0], 1);
        assert_eq!(compensate(input.clone(), 1).unwrap(), input);
    }

    #[test]
    fn test_bad_factors() {
        assert!(matches!(
            compensate(block(vec![0.0; 10], 0), 0),
            Err(AcquisitionError::Decimation { factor: 0, .. })
        ));
        assert!(matches!(
            compensate(block(vec![0.0; 10], 0), 4),
            Err(AcquisitionError::Decimation { samples: 10, factor: 4 })
        ));
    }
}
