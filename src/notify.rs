//! Observability hooks.

use serde_json::Value;
use tracing::debug;

/// Fire-and-forget notification sink.
///
/// The limiter invokes this on every recorded hit and on every denied
/// admission. Implementations must not panic; delivery failures are the
/// sink's problem and never affect admission results.
pub trait Notifier: Send + Sync {
    /// Deliver `event` with its JSON `payload`.
    fn notify(&self, event: &str, payload: Value);
}

/// Sink that forwards events to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: &str, payload: Value) {
        debug!(event = event, payload = %payload, "Limiter event");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Records every delivered event for assertions.
    #[derive(Default)]
    pub struct RecordingNotifier {
        events: Mutex<Vec<(String, Value)>>,
    }

    impl RecordingNotifier {
        pub fn events(&self) -> Vec<(String, Value)> {
            self.events.lock().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, event: &str, payload: Value) {
            self.events.lock().push((event.to_string(), payload));
        }
    }
}
