//! SSE frame encoder for workflow events.
//!
//! The client only decodes, but mock servers and the scripted API need the
//! server-side framing to feed the decoder realistic bytes.

use crate::types::WorkflowEvent;
use std::sync::atomic::{AtomicU64, Ordering};

/// Frame encoder that numbers events the way the server does.
pub struct FrameEncoder {
    event_id: AtomicU64,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self {
            event_id: AtomicU64::new(0),
        }
    }

    /// Encode one event as an SSE frame.
    /// Returns (event_id, frame)
    pub fn encode(&self, event: &WorkflowEvent) -> Result<(u64, String), serde_json::Error> {
        let event_id = self.event_id.fetch_add(1, Ordering::SeqCst);
        let data = serde_json::to_string(event)?;

        // id: <event_id>
        // event: <event_type>
        // data: <json>
        // (empty line to end frame)
        let frame = format!(
            "id: {}\nevent: {}\ndata: {}\n\n",
            event_id, event.event_type, data
        );

        Ok((event_id, frame))
    }

    /// Next id to be assigned
    pub fn current_event_id(&self) -> u64 {
        self.event_id.load(Ordering::SeqCst)
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep-alive comment frame
pub fn encode_comment(comment: &str) -> String {
    format!(": {}\n\n", comment)
}
