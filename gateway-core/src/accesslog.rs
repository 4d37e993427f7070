//! Access-log collaborator (§4.9, §1 ambient stack). `spec.md` treats the
//! real log shipping pipeline as an external collaborator; this module
//! defines the narrow trait the engine talks to and a bounded ring-buffer
//! default so the crate runs standalone.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AccessLogEntry {
    pub route_name: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub bytes_written: u64,
    pub duration: Duration,
    pub time_to_write_headers: Duration,
    pub user_agent: String,
    pub remote_addr: String,
}

/// Sink for finished access-log entries. Submission is non-blocking: a full
/// sink drops the entry rather than applying backpressure to the request
/// path (§5: "overflow drops the oldest in-flight entry").
pub trait AccessLogSink: Send + Sync {
    fn submit(&self, entry: AccessLogEntry);
}

/// Bounded ring buffer, oldest entry evicted on overflow. Default
/// implementation standing in for the out-of-scope shipping pipeline.
pub struct RingAccessLog {
    capacity: usize,
    entries: Mutex<VecDeque<AccessLogEntry>>,
}

impl RingAccessLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    pub fn drain(&self) -> Vec<AccessLogEntry> {
        self.entries.lock().unwrap().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AccessLogSink for RingAccessLog {
    fn submit(&self, entry: AccessLogEntry) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str) -> AccessLogEntry {
        AccessLogEntry {
            route_name: "r".into(),
            method: "GET".into(),
            path: path.into(),
            status: 200,
            bytes_written: 0,
            duration: Duration::from_millis(1),
            time_to_write_headers: Duration::from_micros(1),
            user_agent: String::new(),
            remote_addr: "127.0.0.1:1".into(),
        }
    }

    #[test]
    fn overflow_drops_oldest_entry() {
        let ring = RingAccessLog::new(2);
        ring.submit(entry("/a"));
        ring.submit(entry("/b"));
        ring.submit(entry("/c"));
        let drained = ring.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].path, "/b");
        assert_eq!(drained[1].path, "/c");
    }
}
