use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Tally of timers started or forked against it. Diagnostic only; one
/// counter is created per pipeline run and reported with the run.
#[derive(Debug, Clone, Default)]
pub struct TimerCounter {
    inner: Arc<AtomicU64>,
}

impl TimerCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }

    fn bump(&self) {
        self.inner.fetch_add(1, Ordering::Relaxed);
    }
}

/// Plain value view of a timer's interval. `ended_at` and `duration` stay
/// `None` until the first `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRecord {
    pub started_at: Instant,
    pub ended_at: Option<Instant>,
    pub duration: Option<Duration>,
}

#[derive(Debug)]
pub struct Timer {
    record: TimerRecord,
    counter: TimerCounter,
}

impl Timer {
    pub fn start(counter: &TimerCounter) -> Self {
        counter.bump();
        Self {
            record: TimerRecord {
                started_at: Instant::now(),
                ended_at: None,
                duration: None,
            },
            counter: counter.clone(),
        }
    }

    /// Records the end of the interval and returns it. Calling again replaces
    /// the previous measurement.
    pub fn stop(&mut self) -> Instant {
        let now = Instant::now();
        self.record.ended_at = Some(now);
        self.record.duration = Some(now.saturating_duration_since(self.record.started_at));
        now
    }

    pub fn lap(&self) -> Duration {
        self.record.started_at.elapsed()
    }

    /// Moves the start of the interval to now. The last recorded end and
    /// duration are kept until the next `stop`.
    pub fn restart(&mut self) -> Instant {
        let now = Instant::now();
        self.record.started_at = now;
        now
    }

    /// Independent copy of this timer's current values.
    pub fn fork(&self) -> Timer {
        self.counter.bump();
        Timer {
            record: self.record,
            counter: self.counter.clone(),
        }
    }

    pub fn record(&self) -> TimerRecord {
        self.record
    }

    pub fn started_at(&self) -> Instant {
        self.record.started_at
    }

    pub fn ended_at(&self) -> Option<Instant> {
        self.record.ended_at
    }

    pub fn duration(&self) -> Option<Duration> {
        self.record.duration
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.record.duration.map(|d| d.as_secs_f64())
    }
}
