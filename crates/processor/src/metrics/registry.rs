//! Prometheus exposition of engine metrics

use super::{EngineMetrics, MetricsError};
use parking_lot::RwLock;
use prometheus_client::registry::Registry;
use std::sync::Arc;

/// Registry holding one engine's counters
pub struct MetricsRegistry {
    registry: Arc<RwLock<Registry>>,
}

impl MetricsRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
        }
    }

    /// Registry with every counter of `metrics` registered under `stream_engine_`
    pub fn for_engine(metrics: &EngineMetrics) -> Self {
        let mut registry = Registry::with_prefix("stream_engine");
        for (name, help, counter) in metrics.counters() {
            registry.register(name, help, counter.clone());
        }

        Self {
            registry: Arc::new(RwLock::new(registry)),
        }
    }

    /// Get a reference to the internal registry
    pub fn registry(&self) -> Arc<RwLock<Registry>> {
        self.registry.clone()
    }

    /// Encode metrics in Prometheus text format
    pub fn encode(&self) -> Result<String, MetricsError> {
        let registry = self.registry.read();
        let mut buffer = String::new();

        prometheus_client::encoding::text::encode(&mut buffer, &registry)
            .map_err(|e| MetricsError::EncodingError(e.to_string()))?;

        Ok(buffer)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MetricsRegistry {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creation() {
        let registry = MetricsRegistry::new();
        assert!(registry.encode().is_ok());
    }

    #[test]
    fn test_engine_counters_exported() {
        let metrics = EngineMetrics::new();
        metrics.events_ingested.inc_by(3);
        let registry = MetricsRegistry::for_engine(&metrics);

        let text = registry.encode().unwrap();
        assert!(text.contains("stream_engine_events_ingested_total 3"));
        assert!(text.contains("stream_engine_checkpoints_created_total 0"));

        // Counters are shared with the engine, not copied.
        metrics.events_ingested.inc();
        assert!(registry.encode().unwrap().contains("stream_engine_events_ingested_total 4"));
    }

    #[test]
    fn test_registry_clone() {
        let registry1 = MetricsRegistry::new();
        let registry2 = registry1.clone();

        assert!(Arc::ptr_eq(&registry1.registry(), &registry2.registry()));
    }
}
