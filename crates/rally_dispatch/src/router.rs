//! The `services` subsystem: inbound frame processing for every connection.

use std::sync::Arc;

use async_trait::async_trait;
use prometheus::{IntCounter, Registry};
use rally_kernel::{Kernel, Status, StatusFlag, Subsystem, SystemConfig, SystemError};
use tracing::{debug, info, warn};

use crate::codec::{Encoding, Envelope};
use crate::context::ConnectionContext;
use crate::dispatch::{DispatchOutcome, DispatchTable};
use crate::error::CodecError;
use crate::service::ServiceRegistry;

/// Name under which the router is registered with the kernel.
pub const SERVICES_SYSTEM: &str = "services";

/// Counts for one processed frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Messages delivered to at least one handler.
    pub dispatched: usize,
    /// Messages whose schema has no handler.
    pub unhandled: usize,
    /// Payloads that failed to decode.
    pub dropped: usize,
    /// Handler invocations that returned an error or panicked.
    pub handler_failures: usize,
}

/// Dispatch counters.
///
/// The counters live outside any registry so they work whether or not a
/// metrics registry is attached.
#[derive(Debug, Clone)]
pub struct DispatchStats {
    pub frames_received: IntCounter,
    pub frames_dropped: IntCounter,
    pub messages_dispatched: IntCounter,
    pub messages_unhandled: IntCounter,
    pub messages_dropped: IntCounter,
    pub handler_failures: IntCounter,
}

impl DispatchStats {
    fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            frames_received: IntCounter::new(
                "dispatch_frames_received_total",
                "Inbound envelopes received",
            )?,
            frames_dropped: IntCounter::new(
                "dispatch_frames_dropped_total",
                "Inbound envelopes that failed to decode",
            )?,
            messages_dispatched: IntCounter::new(
                "dispatch_messages_total",
                "Messages delivered to handlers",
            )?,
            messages_unhandled: IntCounter::new(
                "dispatch_messages_unhandled_total",
                "Messages with no registered handler",
            )?,
            messages_dropped: IntCounter::new(
                "dispatch_messages_dropped_total",
                "Payloads that failed to decode",
            )?,
            handler_failures: IntCounter::new(
                "dispatch_handler_failures_total",
                "Handler invocations that failed or panicked",
            )?,
        })
    }

    fn counters(&self) -> [&IntCounter; 6] {
        [
            &self.frames_received,
            &self.frames_dropped,
            &self.messages_dispatched,
            &self.messages_unhandled,
            &self.messages_dropped,
            &self.handler_failures,
        ]
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        for counter in self.counters() {
            registry.register(Box::new(counter.clone()))?;
        }
        Ok(())
    }

    fn unregister(&self, registry: &Registry) {
        for counter in self.counters() {
            let _ = registry.unregister(Box::new(counter.clone()));
        }
    }
}

/// Decodes inbound envelopes and dispatches their messages.
///
/// Transports call [`MessageRouter::process_json_messages`] or
/// [`MessageRouter::process_binary_messages`] once per inbound frame. The
/// service registry is fixed at construction, so dispatch never takes a
/// lock.
pub struct MessageRouter {
    registry: Arc<ServiceRegistry>,
    stats: DispatchStats,
    metrics: Option<Registry>,
    status: StatusFlag,
}

impl MessageRouter {
    pub fn new(registry: ServiceRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            stats: DispatchStats::new().expect("metric creation failed"),
            metrics: None,
            status: StatusFlag::new(),
        }
    }

    /// Exports dispatch counters through `metrics` while the router is up.
    pub fn with_metrics(mut self, metrics: Registry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn dispatch_table(&self) -> &DispatchTable {
        self.registry.dispatch_table()
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub async fn process_json_messages(
        &self,
        ctx: &ConnectionContext,
        raw: &[u8],
    ) -> Result<DispatchSummary, CodecError> {
        self.process_frame(ctx, Encoding::Json, raw).await
    }

    pub async fn process_binary_messages(
        &self,
        ctx: &ConnectionContext,
        raw: &[u8],
    ) -> Result<DispatchSummary, CodecError> {
        self.process_frame(ctx, Encoding::Binary, raw).await
    }

    /// Decodes one frame and processes its envelope.
    ///
    /// A frame whose envelope cannot be decoded is logged and dropped as a
    /// whole; the error is returned for the transport's benefit only and
    /// does not mean the connection should close.
    pub async fn process_frame(
        &self,
        ctx: &ConnectionContext,
        encoding: Encoding,
        raw: &[u8],
    ) -> Result<DispatchSummary, CodecError> {
        self.stats.frames_received.inc();
        match Envelope::decode(encoding, raw) {
            Ok(envelope) => Ok(self.process_messages(ctx, envelope).await),
            Err(e) => {
                self.stats.frames_dropped.inc();
                warn!(
                    connection = ctx.id(),
                    "⚠️ Dropping malformed {} envelope ({} bytes): {}",
                    encoding,
                    raw.len(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Decodes and dispatches every payload in batch order.
    ///
    /// A payload that fails to decode is skipped; the rest of the batch is
    /// still processed.
    pub async fn process_messages(
        &self,
        ctx: &ConnectionContext,
        envelope: Envelope,
    ) -> DispatchSummary {
        let table = self.registry.dispatch_table();
        let mut summary = DispatchSummary::default();

        for payload in envelope.payloads {
            let schema = payload.schema.clone();
            if !table.has_handlers(&schema) {
                summary.unhandled += 1;
                self.stats.messages_unhandled.inc();
                warn!(connection = ctx.id(), "⚠️ No handlers for message type {}", schema);
                continue;
            }

            let message = match table.decode(payload) {
                Ok(message) => message,
                Err(e) => {
                    summary.dropped += 1;
                    self.stats.messages_dropped.inc();
                    warn!(connection = ctx.id(), "⚠️ Failed to decode {}: {}", schema, e);
                    continue;
                }
            };

            self.record(&mut summary, table.dispatch(ctx, &schema, message).await);
        }

        debug!(connection = ctx.id(), ?summary, "Processed envelope");
        summary
    }

    fn record(&self, summary: &mut DispatchSummary, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Unhandled => {
                summary.unhandled += 1;
                self.stats.messages_unhandled.inc();
            }
            DispatchOutcome::Delivered { failed, .. } => {
                summary.dispatched += 1;
                summary.handler_failures += failed;
                self.stats.messages_dispatched.inc();
                self.stats.handler_failures.inc_by(failed as u64);
            }
        }
    }
}

#[async_trait]
impl Subsystem for MessageRouter {
    async fn setup(&self, _kernel: &Kernel, config: &SystemConfig) -> Result<(), SystemError> {
        for entry in self.registry.services() {
            let service_config = config.subconfig(entry.path());
            entry.service().setup(&service_config).await.map_err(|e| {
                SystemError::other(format!("service {} failed to set up", entry.path()), e)
            })?;
        }

        if let Some(metrics) = &self.metrics {
            self.stats
                .register(metrics)
                .map_err(|e| SystemError::other("failed to register dispatch metrics", e))?;
        }

        self.status.mark_up();
        info!(
            "📮 Message router up with {} services and {} handlers",
            self.registry.len(),
            self.dispatch_table().handler_count()
        );
        Ok(())
    }

    async fn teardown(&self, _kernel: &Kernel, _config: &SystemConfig) -> Result<(), SystemError> {
        let mut first_error = None;
        for entry in self.registry.services().iter().rev() {
            if let Err(e) = entry.service().teardown().await {
                warn!("⚠️ Service {} failed to tear down: {}", entry.path(), e);
                first_error.get_or_insert(SystemError::other(
                    format!("service {} failed to tear down", entry.path()),
                    e,
                ));
            }
        }

        if let Some(metrics) = &self.metrics {
            self.stats.unregister(metrics);
        }
        self.status.mark_down();

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn status(&self) -> Status {
        self.status.get()
    }
}
