// Single block capture
//
// This example plans a capture window, runs one triggered block against the
// simulated digitizer and writes the bundle to a CSV or Parquet file.

use blockscope_rs::{AcquisitionConfig, Channel, Command, DeviceModel, Digitizer, FileSink, SimulatedDriver};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "block_capture")]
#[command(version = "1.0")]
#[command(about = "Capture one triggered block and save it")]
#[command(long_about = "Plan a block capture from a duration and pre/post trigger sample counts, run it on a simulated PicoScope and save the millivolt traces. Settings can also come from a TOML file.")]
struct Args {
    /// Serial number of the unit to open
    #[arg(short, long, default_value = "GO021/0001")]
    serial: String,

    /// TOML acquisition config; overrides the timing arguments below
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Capture duration in microseconds
    #[arg(short, long, default_value_t = 1_000)]
    duration_us: u64,

    /// Samples before the trigger
    #[arg(long, default_value_t = 5_000)]
    pre: u32,

    /// Samples after the trigger
    #[arg(long, default_value_t = 5_000)]
    post: u32,

    /// Emulate the 8-bit PS3000A instead of the PS5000A
    #[arg(long)]
    ps3000a: bool,

    /// Output file (.csv or .parquet)
    #[arg(short, long, default_value = "trace.csv")]
    output: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, help = "Show every device command and its status")]
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

    println!("BlockScope Block Capture");
    println!("========================\n");

    let config = match &args.config {
        Some(path) => Some(AcquisitionConfig::from_file(path)?),
        None => None,
    };
    let model = match &config {
        Some(config) => config.device.model,
        None if args.ps3000a => DeviceModel::Ps3000a,
        None => DeviceModel::Ps5000a,
    };

    // 1 kHz square wave on A, a slower ramp on B
    let driver = SimulatedDriver::new(model)
        .with_polls_until_ready(50)
        .with_signal(|channel, k| match channel {
            Channel::A if (k / 500) % 2 == 0 => 12_000,
            Channel::A => -12_000,
            _ => ((k % 4_000) as i16 - 2_000) * 8,
        });

    let (mut scope, serial, mut sink) = match &config {
        Some(config) => (
            Digitizer::from_config(driver, config)?,
            config.device.serial.clone(),
            config.file_sink().unwrap_or_else(|| FileSink::new(&args.output)),
        ),
        None => (
            Digitizer::new(driver, model),
            args.serial.clone(),
            FileSink::new(&args.output),
        ),
    };

    let plan = if config.is_some() {
        scope.plan()?
    } else {
        scope.configure_duration(Duration::from_micros(args.duration_us), args.pre, args.post)?
    };
    println!("Model:       {}", plan.model);
    println!("Resolution:  {}", plan.resolution);
    println!("Timebase:    {}", plan.timebase.timebase_code);
    println!("Interval:    {:.1} ns", plan.effective_interval_ns());
    if plan.is_oversampled() {
        println!("Oversampled: x{}", plan.oversampling);
    }

    let bundle = scope.acquire(&mut sink, &serial)?;
    println!("\n✓ Captured {} samples per channel", bundle.len());
    for trace in bundle.channels() {
        let mv = trace.millivolts();
        let min = mv.iter().copied().fold(f64::INFINITY, f64::min);
        let max = mv.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        println!("  {}: {:.1} mV .. {:.1} mV", trace.channel(), min, max);
    }
    println!("✓ Saved to {}", sink.path().display());

    let driver = scope.driver();
    let driver = driver.lock();
    println!(
        "\nDevice calls: {} polls, {} transfers, {} closes",
        driver.calls(Command::IsReady),
        driver.calls(Command::GetValues),
        driver.calls(Command::CloseUnit)
    );
    Ok(())
}
