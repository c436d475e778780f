use std::sync::Mutex;

/// Counters accumulated over one batch scan.
pub struct MetricsRecorder {
    inner: Mutex<Metrics>,
}

#[derive(Default)]
struct Metrics {
    invocations: usize,
    frames_processed: usize,
    frames_failed: usize,
}

/// Point-in-time copy of the recorded counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub invocations: usize,
    pub frames_processed: usize,
    pub frames_failed: usize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Metrics::default()),
        }
    }

    pub fn record_invocation(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.invocations += 1;
        }
    }

    pub fn record_frame(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.frames_processed += 1;
        }
    }

    pub fn record_failed_frame(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.frames_failed += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        if let Ok(metrics) = self.inner.lock() {
            MetricsSnapshot {
                invocations: metrics.invocations,
                frames_processed: metrics.frames_processed,
                frames_failed: metrics.frames_failed,
            }
        } else {
            MetricsSnapshot::default()
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counts() {
        let recorder = MetricsRecorder::new();
        recorder.record_invocation();
        recorder.record_invocation();
        recorder.record_frame();
        recorder.record_failed_frame();

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.invocations, 2);
        assert_eq!(snapshot.frames_processed, 1);
        assert_eq!(snapshot.frames_failed, 1);
    }
}
