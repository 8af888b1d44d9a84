//! Metrics sink used by the negotiation layer.
//!
//! Persistence of metrics is out of scope here; the default sink turns every
//! metric into a structured `tracing` event so it shows up wherever logs go.

use std::collections::BTreeMap;

/// Free-form properties attached to a metric or error.
pub type Properties = BTreeMap<String, String>;

pub trait MetricsSink: Send + Sync {
    fn track_metric(&self, name: &str, value: f64, props: &Properties);
    fn track_error(&self, name: &str, message: &str, props: &Properties);
}

/// Default sink: structured tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn track_metric(&self, name: &str, value: f64, props: &Properties) {
        tracing::info!(metric = name, value, props = ?props, "metric");
    }

    fn track_error(&self, name: &str, message: &str, props: &Properties) {
        tracing::warn!(metric = name, error = message, props = ?props, "error metric");
    }
}

/// Build a property map from string pairs.
pub fn props<const N: usize>(pairs: [(&str, String); N]) -> Properties {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Records every call for assertions.
    #[derive(Default)]
    pub struct RecordingMetrics {
        pub metrics: Mutex<Vec<(String, f64)>>,
        pub errors: Mutex<Vec<(String, String)>>,
    }

    impl MetricsSink for RecordingMetrics {
        fn track_metric(&self, name: &str, value: f64, _props: &Properties) {
            self.metrics.lock().push((name.to_string(), value));
        }

        fn track_error(&self, name: &str, message: &str, _props: &Properties) {
            self.errors.lock().push((name.to_string(), message.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_props_builds_map() {
        let p = props([("SDP", "v=0".to_string()), ("Errors", String::new())]);
        assert_eq!(p.len(), 2);
        assert_eq!(p["SDP"], "v=0");
    }

    #[test]
    fn test_recording_sink() {
        let sink = testing::RecordingMetrics::default();
        sink.track_metric("SDPProcessed", 1.0, &Properties::new());
        sink.track_error("SDPValidationFailed", "Version", &Properties::new());
        assert_eq!(sink.metrics.lock().len(), 1);
        assert_eq!(sink.errors.lock()[0].1, "Version");
    }
}
