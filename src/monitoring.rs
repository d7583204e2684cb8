//! In this module, we implement all the monitoring logic for the transmission.
//! That's the round-trip times of every acknowledged average plus the volume and
//! rate of what we sent.

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::{
    exfil::{now_ms, Message},
    Result,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RttRecord {
    pub id: usize,
    pub value: f32,
    pub rtt_ms: f64,
}

/// One slot per expected average, indexed by message id
#[derive(Debug, Clone, Default)]
pub struct RttTable {
    records: Vec<Option<RttRecord>>,
}

impl RttTable {
    pub fn new(expected: usize) -> Self {
        Self {
            records: vec![None; expected],
        }
    }

    /// Record an acknowledgement received at `now` (ms). Returns false if it was ignored.
    pub fn record(&mut self, ack: &Message, now: i64) -> bool {
        let Some(slot) = self.records.get_mut(ack.id) else {
            warn!(id = ack.id, "Ack id out of range, ignoring");
            return false;
        };
        if slot.is_some() {
            warn!(id = ack.id, "Duplicate ack, ignoring");
            return false;
        }
        let rtt_ms = (now - ack.time) as f64;
        debug!(id = ack.id, value = ack.value, rtt_ms, "Ack");
        *slot = Some(RttRecord {
            id: ack.id,
            value: ack.value,
            rtt_ms,
        });
        true
    }

    pub fn expected(&self) -> usize {
        self.records.len()
    }

    pub fn received(&self) -> usize {
        self.records.iter().flatten().count()
    }

    pub fn is_complete(&self) -> bool {
        self.received() == self.expected()
    }

    pub fn records(&self) -> impl Iterator<Item = &RttRecord> {
        self.records.iter().flatten()
    }

    /// Mean and (population) standard deviation over everything received
    pub fn stats(&self) -> Option<RttStats> {
        let rtts: Vec<f64> = self.records().map(|r| r.rtt_ms).collect();
        if rtts.is_empty() {
            return None;
        }
        let n = rtts.len() as f64;
        let mean_ms = rtts.iter().sum::<f64>() / n;
        let var = rtts.iter().map(|x| (x - mean_ms).powi(2)).sum::<f64>() / n;
        Some(RttStats {
            count: rtts.len(),
            mean_ms,
            std_dev_ms: var.sqrt(),
            min_ms: rtts.iter().copied().fold(f64::INFINITY, f64::min),
            max_ms: rtts.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

impl fmt::Display for RttTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- RTT Values ---")?;
        for (id, slot) in self.records.iter().enumerate() {
            match slot {
                Some(r) => writeln!(f, "ID: {} | RTT: {:.1} ms", r.id, r.rtt_ms)?,
                None => writeln!(f, "ID: {id} | no ack")?,
            }
        }
        if let Some(stats) = self.stats() {
            writeln!(f, "{stats}")?;
        }
        write!(f, "------------------")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RttStats {
    pub count: usize,
    pub mean_ms: f64,
    pub std_dev_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl fmt::Display for RttStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RTT over {} acks: mean {:.2} ms, std dev {:.2} ms, min {:.1} ms, max {:.1} ms",
            self.count, self.mean_ms, self.std_dev_ms, self.min_ms, self.max_ms
        )
    }
}

/// Volume and timing of the outbound side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommMetrics {
    pub sent: usize,
    pub failed: usize,
    pub bytes: usize,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
}

impl CommMetrics {
    pub fn start() -> Self {
        let now = Utc::now();
        Self {
            sent: 0,
            failed: 0,
            bytes: 0,
            started: now,
            finished: now,
        }
    }

    pub fn finish(&mut self) {
        self.finished = Utc::now();
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished - self.started).num_milliseconds()
    }

    /// Bytes per millisecond, `None` if it all happened within the same millisecond
    pub fn throughput(&self) -> Option<f64> {
        let ms = self.duration_ms();
        (ms > 0).then(|| self.bytes as f64 / ms as f64)
    }
}

impl fmt::Display for CommMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Communication Metrics ---")?;
        writeln!(f, "  Messages sent: {} ({} failed)", self.sent, self.failed)?;
        writeln!(f, "     Bytes sent: {}", self.bytes)?;
        writeln!(f, "  Start time: {}", self.started.to_rfc3339())?;
        writeln!(f, " Finish time: {}", self.finished.to_rfc3339())?;
        match self.throughput() {
            Some(t) => writeln!(f, "  Communication rate: {t:.4} bytes/ms")?,
            None => writeln!(f, "  Communication rate: n/a")?,
        }
        write!(f, "-----------------------------")
    }
}

/// Turn acknowledgements into RTT records until all `expected` ids are in.
///
/// Also stops when the ack channel closes or nothing shows up for `timeout`.
/// A payload that doesn't parse aborts the task: we'd rather have no numbers
/// than numbers attributed to the wrong ids.
pub fn collect_acks(acks: Receiver<Vec<u8>>, expected: usize, timeout: Duration) -> Result<RttTable> {
    let mut table = RttTable::new(expected);
    while !table.is_complete() {
        let payload = match acks.recv_timeout(timeout) {
            Ok(p) => p,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    received = table.received(),
                    expected, "Timed out waiting for acks"
                );
                break;
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Ack channel closed");
                break;
            }
        };
        let ack = Message::decode(&payload)?;
        table.record(&ack, now_ms());
    }
    info!(received = table.received(), expected, "Ack task finished");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crossbeam_channel::bounded;

    fn ack(id: usize, time: i64) -> Message {
        Message {
            id,
            value: id as f32,
            time,
        }
    }

    #[test]
    fn test_stats() {
        let mut table = RttTable::new(4);
        for (id, rtt) in [2, 4, 4, 6].into_iter().enumerate() {
            assert!(table.record(&ack(id, 1000), 1000 + rtt));
        }
        let stats = table.stats().unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean_ms, 4.0);
        assert!((stats.std_dev_ms - 2f64.sqrt()).abs() < 1e-12);
        assert_eq!(stats.min_ms, 2.0);
        assert_eq!(stats.max_ms, 6.0);
    }

    #[test]
    fn test_no_acks_no_stats() {
        assert!(RttTable::new(3).stats().is_none());
    }

    #[test]
    fn test_ignores_bad_ids() {
        let mut table = RttTable::new(2);
        assert!(table.record(&ack(1, 0), 5));
        assert!(!table.record(&ack(1, 0), 9));
        assert!(!table.record(&ack(2, 0), 5));
        assert_eq!(table.received(), 1);
        assert_eq!(table.records().next().unwrap().rtt_ms, 5.0);
    }

    #[test]
    fn test_collect_all() {
        let (tx, rx) = bounded(8);
        for id in 0..3 {
            tx.send(ack(id, now_ms()).encode().unwrap()).unwrap();
        }
        let table = collect_acks(rx, 3, Duration::from_secs(1)).unwrap();
        assert!(table.is_complete());
        assert!(table.records().all(|r| r.rtt_ms >= 0.0));
    }

    #[test]
    fn test_collect_stops_on_close() {
        let (tx, rx) = bounded(8);
        tx.send(ack(0, now_ms()).encode().unwrap()).unwrap();
        drop(tx);
        let table = collect_acks(rx, 5, Duration::from_secs(10)).unwrap();
        assert_eq!(table.received(), 1);
    }

    #[test]
    fn test_collect_times_out() {
        let (_tx, rx) = bounded::<Vec<u8>>(8);
        let table = collect_acks(rx, 5, Duration::from_millis(20)).unwrap();
        assert_eq!(table.received(), 0);
    }

    #[test]
    fn test_malformed_aborts() {
        let (tx, rx) = bounded(8);
        tx.send(ack(0, now_ms()).encode().unwrap()).unwrap();
        tx.send(b"definitely not json".to_vec()).unwrap();
        tx.send(ack(1, now_ms()).encode().unwrap()).unwrap();
        assert!(matches!(
            collect_acks(rx, 2, Duration::from_secs(1)),
            Err(Error::MalformedAck(_))
        ));
    }

    #[test]
    fn test_throughput() {
        let mut m = CommMetrics::start();
        m.bytes = 500;
        m.finished = m.started + chrono::Duration::milliseconds(250);
        assert_eq!(m.throughput(), Some(2.0));
    }
}
