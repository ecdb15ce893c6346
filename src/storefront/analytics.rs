use rust_decimal::Decimal;
use std::sync::Mutex;
use tracing::debug;

/// Conversion events reported to the marketing pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyticsEvent {
    PageView,
    AddToCart {
        course_ids: Vec<String>,
        value: Decimal,
        currency: String,
    },
    InitiateCheckout {
        course_ids: Vec<String>,
        value: Decimal,
        currency: String,
    },
    Purchase {
        value: Decimal,
        currency: String,
    },
    Lead,
}

/// Destination for analytics events. Emission is fire-and-forget; analytics
/// must never fail or slow down the purchase flow.
pub trait AnalyticsSink: Send + Sync {
    fn emit(&self, event: AnalyticsEvent);
}

/// Sink that logs events; stands in for the real pixel in development.
#[derive(Debug, Default)]
pub struct LoggingAnalytics;

impl AnalyticsSink for LoggingAnalytics {
    fn emit(&self, event: AnalyticsEvent) {
        metrics::counter!("academy_analytics.events_emitted", 1);
        debug!(?event, "Analytics event");
    }
}

struct BufferState {
    ready: bool,
    queue: Vec<AnalyticsEvent>,
}

/// Wraps a sink that initializes asynchronously (the pixel script loads
/// after first render). Events emitted before `mark_ready` are queued and
/// flushed in order once the sink is up; events after it pass straight
/// through.
pub struct BufferingAnalytics<S: AnalyticsSink> {
    inner: S,
    state: Mutex<BufferState>,
}

impl<S: AnalyticsSink> BufferingAnalytics<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            state: Mutex::new(BufferState {
                ready: false,
                queue: Vec::new(),
            }),
        }
    }

    /// Flushes the queue and passes subsequent events straight through.
    pub fn mark_ready(&self) {
        let drained = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            state.ready = true;
            std::mem::take(&mut state.queue)
        };
        for event in drained {
            self.inner.emit(event);
        }
    }
}

impl<S: AnalyticsSink> AnalyticsSink for BufferingAnalytics<S> {
    fn emit(&self, event: AnalyticsEvent) {
        let queued = {
            match self.state.lock() {
                Ok(mut state) => {
                    if state.ready {
                        false
                    } else {
                        state.queue.push(event.clone());
                        true
                    }
                }
                Err(_) => false,
            }
        };
        if !queued {
            self.inner.emit(event);
        }
    }
}
