//! Append-only buffer of finalized spans

use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex, MutexGuard};

use super::record::Span;

static GLOBAL_RECORDER: Lazy<Arc<SpanRecorder>> = Lazy::new(|| Arc::new(SpanRecorder::new()));

/// Collects spans from every execution path until they are handed to storage.
///
/// Nothing is evicted automatically. Spans recorded outside any run carry no
/// run id and are never picked up by [`drain_run`](Self::drain_run); long-lived
/// processes should take them with [`drain_unscoped`](Self::drain_unscoped) or
/// [`clear`](Self::clear) the buffer.
#[derive(Debug, Default)]
pub struct SpanRecorder {
    spans: Mutex<Vec<Span>>,
}

impl SpanRecorder {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide recorder
    pub fn global() -> Arc<SpanRecorder> {
        GLOBAL_RECORDER.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Span>> {
        // A panic while holding the lock cannot leave a half-pushed span behind
        self.spans.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a finalized span
    pub fn record(&self, span: Span) {
        tracing::debug!(
            span_id = %span.id,
            kind = %span.kind,
            name = %span.name,
            run_id = ?span.run_id,
            node_id = ?span.node_id,
            "span recorded"
        );
        self.lock().push(span);
    }

    /// Copy of all buffered spans in append order
    pub fn snapshot(&self) -> Vec<Span> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove and return the spans of one run, in append order.
    ///
    /// Spans of other runs stay buffered.
    pub fn drain_run(&self, run_id: &str) -> Vec<Span> {
        let mut spans = self.lock();
        let (taken, kept): (Vec<Span>, Vec<Span>) = std::mem::take(&mut *spans)
            .into_iter()
            .partition(|span| span.run_id.as_deref() == Some(run_id));
        *spans = kept;
        taken
    }

    /// Remove and return the spans recorded outside any run, in append order
    pub fn drain_unscoped(&self) -> Vec<Span> {
        let mut spans = self.lock();
        let (taken, kept): (Vec<Span>, Vec<Span>) = std::mem::take(&mut *spans)
            .into_iter()
            .partition(|span| span.run_id.is_none());
        *spans = kept;
        taken
    }

    /// Drop everything
    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::span::record::{PendingSpan, SpanAttrs};

    fn span_for(run_id: Option<&str>, name: &str) -> Span {
        let ctx = ExecutionContext {
            run_id: run_id.map(str::to_string),
            ..Default::default()
        };
        PendingSpan::start("tool", name, "fp").finish(SpanAttrs::Other(Default::default()), &ctx, None)
    }

    #[test]
    fn test_record_and_snapshot() {
        let recorder = SpanRecorder::new();
        recorder.record(span_for(Some("a"), "one"));
        recorder.record(span_for(Some("a"), "two"));

        let spans = recorder.snapshot();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].name, "one");
        assert_eq!(spans[1].name, "two");
    }

    #[test]
    fn test_drain_run_keeps_other_runs() {
        let recorder = SpanRecorder::new();
        recorder.record(span_for(Some("a"), "a1"));
        recorder.record(span_for(Some("b"), "b1"));
        recorder.record(span_for(Some("a"), "a2"));
        recorder.record(span_for(None, "orphan"));

        let drained = recorder.drain_run("a");
        assert_eq!(
            drained.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            vec!["a1", "a2"]
        );
        assert_eq!(recorder.len(), 2);

        recorder.clear();
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_drain_unscoped_leaves_run_spans() {
        let recorder = SpanRecorder::new();
        recorder.record(span_for(None, "early"));
        recorder.record(span_for(Some("a"), "a1"));
        recorder.record(span_for(None, "late"));

        let orphans = recorder.drain_unscoped();
        assert_eq!(
            orphans.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            vec!["early", "late"]
        );
        assert_eq!(recorder.drain_run("a").len(), 1);
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_concurrent_append() {
        let recorder = Arc::new(SpanRecorder::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let recorder = recorder.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        recorder.record(span_for(Some("r"), &format!("{}-{}", t, i)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(recorder.len(), 400);
    }
}
