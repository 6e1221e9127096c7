//! Structured progress events from the compressor. The event set is part of
//! the public contract so collaborators (CLI, TUI) can render progress; the
//! sink is whatever the caller hands in.

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "ev")]
pub enum TraceEvent {
    PhaseBegin {
        phase: u8,
        total: usize,
    },
    PhaseEnd {
        phase: u8,
        completed: usize,
    },
    /// One streamed token landed for a symbol.
    SymbolStream {
        symbol: String,
        delta: String,
    },
    CacheHit {
        fingerprint: String,
    },
    KeyExtracted {
        level: u8,
    },
    Complete {
        symbols: usize,
    },
}

pub trait TraceSink: Send + Sync {
    fn send(&self, event: TraceEvent);
}

/// Renders events into the process log. The default sink for the CLI.
pub struct LogTraceSink;

impl TraceSink for LogTraceSink {
    fn send(&self, event: TraceEvent) {
        match &event {
            TraceEvent::PhaseBegin { phase, total } => {
                info!(phase, total, "phase begin");
            }
            TraceEvent::PhaseEnd { phase, completed } => {
                info!(phase, completed, "phase end");
            }
            TraceEvent::SymbolStream { symbol, .. } => {
                debug!(%symbol, "token");
            }
            TraceEvent::CacheHit { fingerprint } => {
                debug!(%fingerprint, "cache hit");
            }
            TraceEvent::KeyExtracted { level } => {
                info!(level, "key extracted");
            }
            TraceEvent::Complete { symbols } => {
                info!(symbols, "compression complete");
            }
        }
    }
}

/// Forwards events over a channel, for collaborators that render elsewhere.
pub struct ChannelTraceSink {
    sender: UnboundedSender<TraceEvent>,
}

impl ChannelTraceSink {
    pub fn new(sender: UnboundedSender<TraceEvent>) -> Self {
        Self { sender }
    }
}

impl TraceSink for ChannelTraceSink {
    fn send(&self, event: TraceEvent) {
        // a closed receiver just means nobody is watching anymore
        let _ = self.sender.send(event);
    }
}

/// Swallows everything.
pub struct NullTraceSink;

impl TraceSink for NullTraceSink {
    fn send(&self, _event: TraceEvent) {}
}

#[cfg(test)]
mod tests {
    use super::{ChannelTraceSink, TraceEvent, TraceSink};

    #[test]
    fn channel_sink_forwards_events() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ChannelTraceSink::new(tx);
        sink.send(TraceEvent::PhaseBegin { phase: 1, total: 3 });
        sink.send(TraceEvent::Complete { symbols: 3 });
        assert_eq!(
            rx.try_recv().unwrap(),
            TraceEvent::PhaseBegin { phase: 1, total: 3 }
        );
        assert_eq!(rx.try_recv().unwrap(), TraceEvent::Complete { symbols: 3 });
    }

    #[test]
    fn events_serialize_with_their_tag() {
        let rendered =
            serde_json::to_string(&TraceEvent::KeyExtracted { level: 2 }).unwrap();
        assert!(rendered.contains("key_extracted"));
    }
}
