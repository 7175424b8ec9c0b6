// Background capture with cancellation
//
// This example runs acquisitions on a worker thread while the main thread keeps
// polling for the result, and shows how a capture that never triggers is
// cancelled cleanly.

use blockscope_rs::{AcquisitionError, Command, DeviceModel, Digitizer, SampleBundle, SimulatedDriver};
use clap::Parser;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "background_capture")]
#[command(version = "1.0")]
#[command(about = "Capture blocks on a worker thread")]
struct Args {
    /// Number of blocks to capture
    #[arg(short, long, default_value_t = 3)]
    count: usize,

    /// Readiness polls before the simulated block completes
    #[arg(short, long, default_value_t = 200_000)]
    polls: u32,

    /// Give up on a capture after this many milliseconds
    #[arg(short, long, default_value_t = 500)]
    timeout_ms: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let driver = SimulatedDriver::new(DeviceModel::Ps5000a)
        .with_polls_until_ready(args.polls)
        .with_signal(|_, k| ((k as f64 / 250.0).sin() * 20_000.0) as i16);
    let mut scope = Digitizer::new(driver, DeviceModel::Ps5000a);
    scope.request_mut().poll_interval = Some(Duration::from_micros(1));
    scope.configure_duration(Duration::from_millis(2), 2_000, 8_000)?;

    let timeout = Duration::from_millis(args.timeout_ms);
    for i in 0..args.count {
        let started = Instant::now();
        let mut pending = scope.spawn_acquire(Vec::<SampleBundle>::new(), "GO021/0001");
        let mut checks = 0u64;

        let outcome = loop {
            pending = match pending.try_get_result() {
                Ok(Ok((bundle, _))) => break Ok(bundle),
                Ok(Err(still_running)) => still_running,
                Err(e) => break Err(e),
            };
            checks += 1;
            if started.elapsed() > timeout {
                break pending.cancel().map(|(bundle, _)| bundle);
            }
            std::thread::sleep(Duration::from_millis(1));
        };

        match outcome {
            Ok(bundle) => println!(
                "Block {}: {} samples in {:?} ({} checks)",
                i + 1,
                bundle.len(),
                started.elapsed(),
                checks
            ),
            Err(AcquisitionError::Cancelled) => {
                println!("Block {}: no trigger within {:?}, cancelled", i + 1, timeout);
            }
            Err(e) => return Err(e.into()),
        }
    }

    let driver = scope.driver();
    let driver = driver.lock();
    println!(
        "\nOpened {} times, closed {} times",
        driver.calls(Command::OpenUnit),
        driver.calls(Command::CloseUnit)
    );
    Ok(())
}
