//! Moving average over the sample stream

use std::{fmt, time::Duration};

use crossbeam_channel::Sender;
use rtrb::Consumer;
use tracing::{debug, info, warn};

/// What the window sum gets divided by
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Denominator {
    /// Always the window capacity. Averages are biased low until the window fills up.
    #[default]
    Capacity,
    /// The number of samples actually in the window
    Filled,
}

/// Fixed size circular buffer of the `W` most recent samples
#[derive(Debug, Clone)]
pub struct SlidingWindow<const W: usize> {
    samples: [f32; W],
    pos: usize,
    valid: usize,
}

impl<const W: usize> Default for SlidingWindow<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const W: usize> SlidingWindow<W> {
    pub const fn new() -> Self {
        assert!(W > 0, "window must hold at least one sample");
        Self {
            samples: [0.0; W],
            pos: 0,
            valid: 0,
        }
    }

    /// Overwrite the oldest sample
    pub fn push(&mut self, value: f32) {
        self.samples[self.pos] = value;
        self.pos = (self.pos + 1) % W;
        if self.valid < W {
            self.valid += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.valid
    }

    pub fn is_empty(&self) -> bool {
        self.valid == 0
    }

    pub fn is_full(&self) -> bool {
        self.valid == W
    }

    pub const fn capacity(&self) -> usize {
        W
    }

    pub fn sum(&self) -> f32 {
        // Slots we haven't written yet are still zero
        self.samples.iter().sum()
    }

    pub fn average(&self, denominator: Denominator) -> f32 {
        match denominator {
            Denominator::Capacity => self.sum() / W as f32,
            Denominator::Filled if self.valid == 0 => 0.0,
            Denominator::Filled => self.sum() / self.valid as f32,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateReport {
    /// Every average, in emission order
    pub averages: Vec<f32>,
    /// How many we were supposed to emit
    pub target: usize,
}

impl AggregateReport {
    pub fn is_complete(&self) -> bool {
        self.averages.len() == self.target
    }
}

impl fmt::Display for AggregateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Averages List ---")?;
        for (i, avg) in self.averages.iter().enumerate() {
            writeln!(f, "Average [{}]: {:.2}", i + 1, avg)?;
        }
        write!(f, "---------------------")
    }
}

/// Pull samples, emit one moving average per sample until `target` averages went out.
///
/// Waiting on the sample queue is a bounded poll of `poll` so we never hang on a
/// queue whose producer is gone. Sending averages blocks, they're rare and we
/// don't want to lose them.
pub fn aggregator<const W: usize>(
    mut consumer: Consumer<f32>,
    averages: Sender<f32>,
    target: usize,
    denominator: Denominator,
    poll: Duration,
) -> AggregateReport {
    let mut window = SlidingWindow::<W>::new();
    let mut report = AggregateReport {
        averages: Vec::with_capacity(target),
        target,
    };
    info!(averages = target, window = W, ?denominator, "Starting aggregation");
    while report.averages.len() < target {
        let value = match consumer.pop() {
            Ok(v) => v,
            Err(_) => {
                if consumer.is_abandoned() {
                    // Checked again in case the last sample raced the producer going away
                    if consumer.is_empty() {
                        warn!(
                            emitted = report.averages.len(),
                            expected = target,
                            "Sample producer finished early, stopping"
                        );
                        break;
                    }
                    continue;
                }
                std::thread::sleep(poll);
                continue;
            }
        };
        window.push(value);
        let average = window.average(denominator);
        debug!(
            n = report.averages.len(),
            sample = value,
            average,
            "Window"
        );
        report.averages.push(average);
        if averages.send(average).is_err() {
            warn!("Averages receiver hung up, stopping");
            break;
        }
    }
    info!(emitted = report.averages.len(), "Average task finished");
    info!("\n{report}");
    report
}
