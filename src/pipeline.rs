//! Puts it all together: calibrate once, then run the producer, aggregator,
//! transmitter and ack tasks to completion.

use std::{fmt, thread::JoinHandle};

use crossbeam_channel::{bounded, Receiver};
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{error, info, warn};

use crate::{
    aggregate::{aggregator, AggregateReport},
    capture::{sample_producer, ProducerStats},
    config::{Link, PipelineConfig},
    error::Error,
    exfil::{transmit, Loopback, Transport, UdpTransport},
    f_engine::SpectralAnalyzer,
    monitoring::{collect_acks, CommMetrics, RttTable},
    rate::{RateController, SamplingRate},
    Result, WINDOW_SIZE,
};

/// Outcome of the one-off spectral analysis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub initial_rate: u32,
    /// Highest significant frequency, `None` if the block was all noise
    pub peak: Option<f32>,
    pub rate: SamplingRate,
}

/// Acquire one block at the initial rate and settle on the operating rate
pub fn calibrate(config: &PipelineConfig) -> Result<Calibration> {
    let bandwidth = config.waveform.bandwidth();
    info!(waveform = ?config.waveform, bandwidth, "Initializing frequency analysis");
    if (config.initial_rate as f32) < 2.0 * bandwidth {
        warn!(
            rate = config.initial_rate,
            bandwidth, "Initial rate is below Nyquist, the peak will alias"
        );
    }
    let mut analyzer = SpectralAnalyzer::new(config.block_size, config.noise_threshold)?;
    analyzer.acquire(config.waveform, config.initial_rate, config.pacing);
    analyzer.analyze();
    let peak = analyzer.dominant_frequency(config.initial_rate);
    match peak {
        Some(f) => info!("Peak frequency: {f:.2} Hz"),
        None => info!("No peak above the noise floor"),
    }
    let mut controller =
        RateController::new(config.initial_rate, config.multiplier, config.min_rate);
    controller.adjust(peak);
    let rate = controller.freeze();
    info!("Optimal sampling rate: {rate}");
    Ok(Calibration {
        initial_rate: config.initial_rate,
        peak,
        rate,
    })
}

pub fn sample_queue(capacity: usize) -> Result<(Producer<f32>, Consumer<f32>)> {
    if capacity == 0 {
        return Err(Error::QueueAllocation {
            queue: "sample",
            capacity,
        });
    }
    Ok(RingBuffer::new(capacity))
}

fn spawn<F, R>(task: &'static str, f: F) -> Result<JoinHandle<R>>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    std::thread::Builder::new()
        .name(task.into())
        .spawn(f)
        .map_err(|source| Error::Spawn { task, source })
}

fn join<R>(task: &'static str, handle: JoinHandle<R>) -> Result<R> {
    handle.join().map_err(|_| Error::TaskPanicked(task))
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub calibration: Calibration,
    pub producer: ProducerStats,
    pub aggregate: AggregateReport,
    pub comm: CommMetrics,
    /// `None` if the ack task aborted
    pub rtt: Option<RttTable>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cal = &self.calibration;
        writeln!(f, "*************")?;
        match cal.peak {
            Some(p) => writeln!(f, "Peak frequency: {p:.2} Hz")?,
            None => writeln!(f, "Peak frequency: none")?,
        }
        writeln!(f, "Sampling rate: {} Hz -> {}", cal.initial_rate, cal.rate)?;
        writeln!(
            f,
            "Samples produced: {} ({} dropped)",
            self.producer.produced, self.producer.dropped
        )?;
        writeln!(f, "{}", self.aggregate)?;
        match &self.rtt {
            Some(table) => writeln!(f, "{table}")?,
            None => writeln!(f, "No RTT data (ack task aborted)")?,
        }
        writeln!(f, "{}", self.comm)?;
        write!(f, "*************")
    }
}

/// Calibrate and run everything over the configured link
pub fn run(config: &PipelineConfig) -> Result<RunSummary> {
    config.validate()?;
    match config.link {
        Link::Loopback => {
            let (transport, acks) = Loopback::new(config.count)?;
            run_with(config, transport, acks)
        }
        Link::Udp { bind, peer } => {
            let (transport, acks, listener) = UdpTransport::connect(bind, peer, config.count)?;
            let summary = run_with(config, transport, acks);
            listener.stop()?;
            summary
        }
    }
}

/// Same as [`run`] with a transport of your own. `acks` carries the raw
/// acknowledgement payloads coming back from the peer.
pub fn run_with<T>(
    config: &PipelineConfig,
    transport: T,
    acks: Receiver<Vec<u8>>,
) -> Result<RunSummary>
where
    T: Transport + 'static,
{
    config.validate()?;
    // Queues come first, failing to get them is fatal
    let (sample_tx, sample_rx) = sample_queue(config.queue_capacity)?;
    let (avg_tx, avg_rx) = bounded(config.queue_capacity);

    let calibration = calibrate(config)?;
    let rate = calibration.rate;

    let count = config.count;
    let (waveform, pacing) = (config.waveform, config.pacing);
    let (denominator, poll) = (config.denominator, config.poll);
    let ack_timeout = config.ack_timeout;

    // Consumers first so nothing sits in a queue waiting for its reader to exist
    let acks_task = spawn("acks", move || collect_acks(acks, count, ack_timeout))?;
    let tx_task = spawn("transmitter", move || transmit(avg_rx, transport, count))?;
    let agg_task = spawn("aggregator", move || {
        aggregator::<WINDOW_SIZE>(sample_rx, avg_tx, count, denominator, poll)
    })?;
    let prod_task = spawn("producer", move || {
        sample_producer(waveform, rate, count, pacing, sample_tx)
    })?;

    let producer = join("producer", prod_task)?;
    let aggregate = join("aggregator", agg_task)?;
    let comm = join("transmitter", tx_task)?;
    let rtt = match join("acks", acks_task)? {
        Ok(table) => Some(table),
        Err(e) => {
            error!(%e, "Ack task aborted");
            None
        }
    };
    info!("Run completed");
    Ok(RunSummary {
        calibration,
        producer,
        aggregate,
        comm,
        rtt,
    })
}
