//! Output sinks and the dispatcher that fans results out to them
//!
//! Every registered sink receives every output. Sinks run concurrently and the
//! dispatcher waits for all of them before the emit is complete, so a slow
//! sink slows its partition worker down (and through the bounded queues, the
//! producers). A sink that fails or panics is counted in `sink_errors` and
//! logged; the other sinks and the worker carry on.

use crate::core::StreamOutput;
use crate::error::SinkError;
use crate::metrics::EngineMetrics;
use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{trace, warn};

/// Destination for engine outputs
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str {
        "sink"
    }

    async fn emit(&self, output: &StreamOutput) -> anyhow::Result<()>;
}

/// Sink backed by a synchronous closure
pub struct FnSink<F> {
    name: String,
    f: F,
}

impl<F> FnSink<F>
where
    F: Fn(&StreamOutput) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> OutputSink for FnSink<F>
where
    F: Fn(&StreamOutput) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn emit(&self, output: &StreamOutput) -> anyhow::Result<()> {
        (self.f)(output)
    }
}

/// Sink backed by a closure returning a future
pub struct AsyncFnSink {
    name: String,
    f: Box<dyn Fn(StreamOutput) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>,
}

impl AsyncFnSink {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(StreamOutput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(move |output| f(output).boxed()),
        }
    }
}

#[async_trait]
impl OutputSink for AsyncFnSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn emit(&self, output: &StreamOutput) -> anyhow::Result<()> {
        (self.f)(output.clone()).await
    }
}

/// Sink keeping every output in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    outputs: Mutex<Vec<StreamOutput>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything received so far
    pub fn outputs(&self) -> Vec<StreamOutput> {
        self.outputs.lock().clone()
    }

    /// Outputs produced by one source
    pub fn from_source(&self, source: &str) -> Vec<StreamOutput> {
        self.outputs
            .lock()
            .iter()
            .filter(|o| o.source == source)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.outputs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.lock().is_empty()
    }

    pub fn clear(&self) {
        self.outputs.lock().clear();
    }
}

#[async_trait]
impl OutputSink for CollectingSink {
    fn name(&self) -> &str {
        "collecting"
    }

    async fn emit(&self, output: &StreamOutput) -> anyhow::Result<()> {
        self.outputs.lock().push(output.clone());
        Ok(())
    }
}

/// Outcome of one emit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Fans outputs out to every registered sink
pub struct SinkDispatcher {
    sinks: Vec<Arc<dyn OutputSink>>,
    metrics: Arc<EngineMetrics>,
}

impl SinkDispatcher {
    pub fn new(metrics: Arc<EngineMetrics>) -> Self {
        Self {
            sinks: Vec::new(),
            metrics,
        }
    }

    pub fn register(&mut self, sink: Arc<dyn OutputSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Deliver an output to every sink and wait for all of them
    pub async fn emit(&self, output: &StreamOutput) -> DispatchReport {
        let deliveries = self.sinks.iter().map(|sink| async move {
            let result = AssertUnwindSafe(sink.emit(output)).catch_unwind().await;
            match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(SinkError::Failed {
                    sink: sink.name().to_string(),
                    reason: e.to_string(),
                }),
                Err(_) => Err(SinkError::Panicked {
                    sink: sink.name().to_string(),
                }),
            }
        });

        let mut report = DispatchReport::default();
        for result in join_all(deliveries).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(output_id = %output.output_id(), error = %e, "sink failed");
                    self.metrics.sink_errors.inc();
                    report.failed += 1;
                }
            }
        }

        trace!(
            output_id = %output.output_id(),
            delivered = report.delivered,
            failed = report.failed,
            "output dispatched"
        );

        report
    }
}
