use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::telemetry;

pub const EVENTS_LABEL: &str = "events";
pub const POSTS_LABEL: &str = "posts";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThroughputSample {
    pub label: &'static str,
    pub count: u64,
    pub window: Duration,
}

impl ThroughputSample {
    pub fn per_second(&self) -> f64 {
        let secs = self.window.as_secs_f64();
        if secs == 0.0 {
            return self.count as f64;
        }
        self.count as f64 / secs
    }
}

#[derive(Debug)]
struct Window {
    counts: BTreeMap<&'static str, u64>,
    started: Instant,
}

/// Per-label event counter shared by the dispatch path and every worker.
#[derive(Debug, Clone)]
pub struct ThroughputMeter {
    inner: Arc<Mutex<Window>>,
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl ThroughputMeter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Window {
                counts: BTreeMap::new(),
                started: Instant::now(),
            })),
        }
    }

    pub fn record_event(&self, label: &'static str) {
        let mut window = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *window.counts.entry(label).or_default() += 1;
    }

    /// Closes the current window and returns one sample per label seen in it.
    pub fn flush(&self) -> Vec<ThroughputSample> {
        let mut window = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let elapsed = now.duration_since(window.started);
        window.started = now;
        std::mem::take(&mut window.counts)
            .into_iter()
            .map(|(label, count)| ThroughputSample {
                label,
                count,
                window: elapsed,
            })
            .collect()
    }

    /// Flushes every `period`, logging each sample and updating the rate gauge.
    pub fn spawn_flusher(&self, period: Duration) -> JoinHandle<()> {
        let meter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                for sample in meter.flush() {
                    let rate = sample.per_second();
                    metrics::gauge!(telemetry::THROUGHPUT_PER_SECOND, "label" => sample.label)
                        .set(rate);
                    tracing::info!(label = sample.label, count = sample.count, rate, "throughput");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn flush_reports_and_resets_window() {
        let meter = ThroughputMeter::new();
        for _ in 0..3 {
            meter.record_event(EVENTS_LABEL);
        }
        meter.record_event(POSTS_LABEL);
        tokio::time::advance(Duration::from_secs(1)).await;

        let samples = meter.flush();
        assert_eq!(
            samples,
            vec![
                ThroughputSample {
                    label: EVENTS_LABEL,
                    count: 3,
                    window: Duration::from_secs(1),
                },
                ThroughputSample {
                    label: POSTS_LABEL,
                    count: 1,
                    window: Duration::from_secs(1),
                },
            ]
        );
        assert!(meter.flush().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn clones_share_counters_across_tasks() {
        let meter = ThroughputMeter::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let meter = meter.clone();
                tokio::spawn(async move {
                    for _ in 0..25 {
                        meter.record_event(POSTS_LABEL);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        tokio::time::advance(Duration::from_millis(500)).await;

        let samples = meter.flush();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].count, 100);
        assert_eq!(samples[0].per_second(), 200.0);
    }
}
