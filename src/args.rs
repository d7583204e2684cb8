//! Argument parsing for running from the command line

use std::{net::SocketAddr, time::Duration};

use adaptive_sampler::{
    aggregate::Denominator,
    config::{Link, PipelineConfig},
    signal::Waveform,
    Pacing, BLOCK_SIZE, INIT_SAMPLE_RATE, MIN_SAMPLE_RATE, NOISE_THRESHOLD,
    NUM_OF_SAMPLES_AGGREGATE, NYQUIST_MULTIPLIER,
};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Calibrate the sampling rate, then sample, average and transmit
    Run(RunArgs),
    /// Acknowledge everything sent to us by sending it right back
    Echo {
        /// Address to listen on
        #[clap(short, long, default_value = "0.0.0.0:60000")]
        bind: SocketAddr,
    },
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Samples per analysis block (power of 2)
    #[clap(long, default_value_t = BLOCK_SIZE)]
    pub block_size: usize,
    /// Sampling rate before calibration (Hz)
    #[clap(long, default_value_t = INIT_SAMPLE_RATE)]
    #[clap(value_parser = clap::value_parser!(u32).range(1..))]
    pub initial_rate: u32,
    /// Calibration never goes below this rate (Hz)
    #[clap(long, default_value_t = MIN_SAMPLE_RATE)]
    #[clap(value_parser = clap::value_parser!(u32).range(1..))]
    pub min_rate: u32,
    /// Sample this many times faster than the highest frequency found
    #[clap(long, default_value_t = NYQUIST_MULTIPLIER)]
    pub multiplier: f32,
    /// Spectral magnitude a peak must exceed
    #[clap(long, default_value_t = NOISE_THRESHOLD)]
    pub noise_threshold: f32,
    /// Signal to sample
    #[clap(short, long, value_enum, default_value = "low-freq")]
    pub waveform: Waveform,
    /// Number of samples to produce and averages to emit
    #[clap(short = 'n', long, default_value_t = NUM_OF_SAMPLES_AGGREGATE)]
    pub count: usize,
    /// Queue capacity (defaults to the count)
    #[clap(short, long)]
    pub capacity: Option<usize>,
    /// What the moving average divides by
    #[clap(long, value_enum, default_value = "capacity")]
    pub denominator: Denominator,
    /// Don't sleep between samples
    #[clap(long)]
    pub no_pacing: bool,
    /// UDP peer to send averages to (in-process loopback if absent)
    #[clap(short, long)]
    pub peer: Option<SocketAddr>,
    /// Local address for the UDP socket
    #[clap(short, long, default_value = "0.0.0.0:0")]
    pub bind: SocketAddr,
    /// Stop waiting for acks after this long without one (ms)
    #[clap(long, default_value_t = 2000)]
    pub ack_timeout_ms: u64,
}

impl RunArgs {
    pub fn config(&self) -> PipelineConfig {
        PipelineConfig {
            block_size: self.block_size,
            initial_rate: self.initial_rate,
            min_rate: self.min_rate,
            multiplier: self.multiplier,
            noise_threshold: self.noise_threshold,
            waveform: self.waveform,
            count: self.count,
            queue_capacity: self.capacity.unwrap_or(self.count),
            denominator: self.denominator,
            pacing: if self.no_pacing {
                Pacing::Immediate
            } else {
                Pacing::Realtime
            },
            link: match self.peer {
                Some(peer) => Link::Udp {
                    bind: self.bind,
                    peer,
                },
                None => Link::Loopback,
            },
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            ..Default::default()
        }
    }
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}
