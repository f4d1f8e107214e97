//! Lifecycle events published by the engine.
//!
//! Publication is synchronous and fire-and-forget: sinks get a reference to
//! the event and nothing they return is consumed. Sinks are injected, there
//! is no global subscriber list.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::{JobStatus, SourceRef};

/// Something that happened to a source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HarvestEvent {
    SourceCreated { source: SourceRef },
    SourceUpdated { source: SourceRef },
    SourceDeleted { source: SourceRef },
    SourceScheduled { source: SourceRef, trigger: String },
    SourceUnscheduled { source: SourceRef },
    SourceValidated { source: SourceRef },
    SourceRefused { source: SourceRef },
    BeforeHarvestJob { source: SourceRef, job_id: String },
    AfterHarvestJob { source: SourceRef, job_id: String, status: JobStatus },
}

impl HarvestEvent {
    /// Signal name, as seen by external consumers.
    pub fn name(&self) -> &'static str {
        match self {
            HarvestEvent::SourceCreated { .. } => "harvest_source_created",
            HarvestEvent::SourceUpdated { .. } => "harvest_source_updated",
            HarvestEvent::SourceDeleted { .. } => "harvest_source_deleted",
            HarvestEvent::SourceScheduled { .. } => "harvest_source_scheduled",
            HarvestEvent::SourceUnscheduled { .. } => "harvest_source_unscheduled",
            HarvestEvent::SourceValidated { .. } => "harvest_source_validated",
            HarvestEvent::SourceRefused { .. } => "harvest_source_refused",
            HarvestEvent::BeforeHarvestJob { .. } => "before_harvest_job",
            HarvestEvent::AfterHarvestJob { .. } => "after_harvest_job",
        }
    }

    pub fn source(&self) -> &SourceRef {
        match self {
            HarvestEvent::SourceCreated { source }
            | HarvestEvent::SourceUpdated { source }
            | HarvestEvent::SourceDeleted { source }
            | HarvestEvent::SourceScheduled { source, .. }
            | HarvestEvent::SourceUnscheduled { source }
            | HarvestEvent::SourceValidated { source }
            | HarvestEvent::SourceRefused { source }
            | HarvestEvent::BeforeHarvestJob { source, .. }
            | HarvestEvent::AfterHarvestJob { source, .. } => source,
        }
    }
}

/// Receiver of lifecycle events.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &HarvestEvent);
}

/// Fan-out to every registered sink, in registration order.
#[derive(Clone, Default)]
pub struct Signals {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.subscribe(Arc::new(sink));
        self
    }

    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn publish(&self, event: HarvestEvent) {
        for sink in &self.sinks {
            sink.publish(&event);
        }
    }
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: &HarvestEvent) {
        let source = event.source();
        match event {
            HarvestEvent::AfterHarvestJob { job_id, status, .. } => log::info!(
                "[{}] {} job {} finished: {}",
                event.name(),
                source.slug,
                job_id,
                status.as_str()
            ),
            HarvestEvent::BeforeHarvestJob { job_id, .. } => {
                log::info!("[{}] {} job {}", event.name(), source.slug, job_id)
            }
            HarvestEvent::SourceScheduled { trigger, .. } => {
                log::info!("[{}] {} ({})", event.name(), source.slug, trigger)
            }
            _ => log::info!("[{}] {}", event.name(), source.slug),
        }
    }
}

/// Forwards events into a tokio channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<HarvestEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HarvestEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: &HarvestEvent) {
        if self.tx.send(event.clone()).is_err() {
            log::debug!("Dropping {}: receiver closed", event.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceRef {
        SourceRef {
            id: "1".into(),
            slug: "portal".into(),
            name: "Portal".into(),
        }
    }

    #[test]
    fn fans_out_in_order() {
        let (first, mut rx1) = ChannelSink::new();
        let (second, mut rx2) = ChannelSink::new();
        let signals = Signals::new().with_sink(first).with_sink(LogSink).with_sink(second);

        signals.publish(HarvestEvent::SourceCreated { source: source() });
        signals.publish(HarvestEvent::SourceDeleted { source: source() });

        for rx in [&mut rx1, &mut rx2] {
            assert_eq!(rx.try_recv().unwrap().name(), "harvest_source_created");
            assert_eq!(rx.try_recv().unwrap().name(), "harvest_source_deleted");
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn closed_channel_is_ignored() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        Signals::new()
            .with_sink(sink)
            .publish(HarvestEvent::SourceRefused { source: source() });
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = HarvestEvent::AfterHarvestJob {
            source: source(),
            job_id: "j".into(),
            status: JobStatus::DoneErrors,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "after_harvest_job");
        assert_eq!(json["status"], "done-errors");
        assert_eq!(json["source"]["slug"], "portal");
    }
}
