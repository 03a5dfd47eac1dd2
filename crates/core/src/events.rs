//! One-way notifications from an indexing run to its caller.

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum IndexEvent {
    Stage(String),
    Metric { key: String, value: String },
    Progress { percent: u8, info: String },
    Warning(String),
    Error(String),
    Finished { ok: bool, message: String },
}

/// Sending half of the event stream. Never blocks; events sent after the
/// receiver is dropped are only logged.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<UnboundedSender<IndexEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, UnboundedReceiver<IndexEvent>) {
        let (sender, receiver) = unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// A sink that only logs.
    pub fn silent() -> Self {
        Self::default()
    }

    fn send(&self, event: IndexEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }

    pub fn stage(&self, name: &str) {
        info!(stage = name, "indexing stage");
        self.send(IndexEvent::Stage(name.to_string()));
    }

    pub fn metric(&self, key: &str, value: impl ToString) {
        let value = value.to_string();
        debug!(key, value = %value, "indexing metric");
        self.send(IndexEvent::Metric {
            key: key.to_string(),
            value,
        });
    }

    pub fn progress(&self, percent: u8, info: impl Into<String>) {
        let info = info.into();
        debug!(percent, info = %info, "indexing progress");
        self.send(IndexEvent::Progress {
            percent: percent.min(100),
            info,
        });
    }

    pub fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.send(IndexEvent::Warning(message));
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{message}");
        self.send(IndexEvent::Error(message));
    }

    pub fn finished(&self, ok: bool, message: impl Into<String>) {
        let message = message.into();
        info!(ok, message = %message, "indexing finished");
        self.send(IndexEvent::Finished { ok, message });
    }
}

/// Drains everything currently buffered in `receiver`.
#[cfg(test)]
pub(crate) fn drain(receiver: &mut UnboundedReceiver<IndexEvent>) -> Vec<IndexEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
