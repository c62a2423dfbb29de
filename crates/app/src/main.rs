use std::{thread, time::Duration};

use clap::{Parser, ValueEnum};
use pulsecast_core::{
    list_input_devices, spawn_pipeline, AnalysisAdapter, AppConfig, CaptureStream,
    OverflowPolicy, PulsecastError, UdpSink,
};
use tracing_subscriber::EnvFilter;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> pulsecast_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    if cli.list_devices {
        for name in list_input_devices()? {
            println!("{name}");
        }
        return Ok(());
    }

    run(cli.into_config())
}

fn run(config: AppConfig) -> pulsecast_core::Result<()> {
    config.validate()?;
    let destination = config.network.destination()?;
    tracing::info!(
        %destination,
        sample_rate = config.audio.sample_rate,
        window = config.audio.window_size,
        hop = config.audio.hop_size,
        "starting feature stream"
    );

    let adapter = AnalysisAdapter::from_config(&config)?;
    let sink = UdpSink::connect(destination)?;
    let (dispatcher, pipeline) = spawn_pipeline(&config.dispatch, adapter, sink)?;
    let stats = pipeline.stats();

    let capture = CaptureStream::start(&config.audio, dispatcher)?;
    tracing::info!(device = capture.device_name(), "capturing");

    // Runs until the process is interrupted or the worker dies.
    loop {
        thread::sleep(STATS_INTERVAL);
        if pipeline.is_finished() {
            drop(capture);
            pipeline.join()?;
            return Err(PulsecastError::msg("analysis worker stopped unexpectedly"));
        }
        let snapshot = stats.snapshot();
        tracing::info!(
            captured = snapshot.captured,
            sent = snapshot.sent,
            dropped = snapshot.dropped,
            analysis_failures = snapshot.analysis_failures,
            send_failures = snapshot.send_failures,
            "pipeline stats"
        );
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Stream live onset, tempo and pitch features over UDP", long_about = None)]
struct Cli {
    /// IP or hostname of the receiver.
    #[arg(long, default_value = "127.0.0.1")]
    ip: String,
    /// Port of the receiver.
    #[arg(long, default_value_t = 9000)]
    port: u16,
    /// Input device name. Uses the host default when omitted.
    #[arg(long)]
    device: Option<String>,
    /// Frames that may wait for analysis before the overflow policy applies.
    #[arg(long, default_value_t = 64)]
    queue_capacity: usize,
    /// Which frame to discard when the analysis queue is full.
    #[arg(long, value_enum, default_value_t = Overflow::DropOldest)]
    overflow: Overflow,
    /// Print the available input devices and exit.
    #[arg(long)]
    list_devices: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Overflow {
    DropOldest,
    DropNewest,
}

impl Cli {
    fn into_config(self) -> AppConfig {
        let mut config = AppConfig::default();
        config.network.ip = self.ip;
        config.network.port = self.port;
        config.audio.device = self.device;
        config.dispatch.queue_capacity = self.queue_capacity;
        config.dispatch.overflow = match self.overflow {
            Overflow::DropOldest => OverflowPolicy::DropOldest,
            Overflow::DropNewest => OverflowPolicy::DropNewest,
        };
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_local_receiver() {
        let config = Cli::parse_from(["pulsecast"]).into_config();

        assert_eq!(config.network.ip, "127.0.0.1");
        assert_eq!(config.network.port, 9000);
        assert_eq!(config.dispatch.overflow, OverflowPolicy::DropOldest);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn flags_override_defaults() {
        let config = Cli::parse_from([
            "pulsecast",
            "--ip",
            "10.0.0.7",
            "--port",
            "7000",
            "--overflow",
            "drop-newest",
            "--queue-capacity",
            "4",
        ])
        .into_config();

        assert_eq!(config.network.ip, "10.0.0.7");
        assert_eq!(config.network.port, 7000);
        assert_eq!(config.dispatch.overflow, OverflowPolicy::DropNewest);
        assert_eq!(config.dispatch.queue_capacity, 4);
    }

    #[test]
    fn zero_port_fails_before_capture() {
        let config = Cli::parse_from(["pulsecast", "--port", "0"]).into_config();
        let err = run(config).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn rejects_out_of_range_port() {
        assert!(Cli::try_parse_from(["pulsecast", "--port", "70000"]).is_err());
    }
}
