use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::types::PipelineEvent;

const CHANNEL_CAPACITY: usize = 256;

/// Process-wide event publisher. The per-pipeline history ring lives in
/// `Pipeline.events`; this only fans out live events to subscribers, with
/// no replay guarantees (lagging receivers drop silently).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: &PipelineEvent) {
        let _ = self.tx.send(event.clone());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Live event stream, optionally restricted to one pipeline.
    pub fn subscribe_filtered(
        &self,
        pipeline_id: Option<String>,
    ) -> impl Stream<Item = PipelineEvent> + Unpin {
        BroadcastStream::new(self.tx.subscribe()).filter_map(move |item| match item {
            Ok(ev) if pipeline_id.as_deref().map_or(true, |id| ev.pipeline_id == id) => Some(ev),
            _ => None,
        })
    }
}
