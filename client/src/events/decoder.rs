//! Incremental SSE decoder.
//!
//! Bytes arrive in arbitrary chunks. Records are separated by a blank line
//! (`\n\n`, `\r\n\r\n` or a mix of both); a record's `data:` lines are joined
//! with `\n` and parsed as one [`WorkflowEvent`]. `event:`, `id:`, `retry:`
//! fields and `:` comments carry nothing the client needs and are skipped.

use crate::types::WorkflowEvent;

const PREVIEW_LEN: usize = 120;

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Buffer prefix already known to hold no separator
    scanned: usize,
    skipped: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the events of every record it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<WorkflowEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        loop {
            match find_record_end(&self.buffer, self.scanned) {
                Ok((end, delimiter_len)) => {
                    let record: Vec<u8> = self.buffer.drain(..end + delimiter_len).collect();
                    self.scanned = 0;
                    if let Some(event) = self.parse_record(&record[..end]) {
                        events.push(event);
                    }
                }
                Err(resume_at) => {
                    self.scanned = resume_at;
                    break;
                }
            }
        }
        events
    }

    /// Flush a trailing record the server did not terminate with a blank line.
    pub fn finish(&mut self) -> Vec<WorkflowEvent> {
        let record = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if record.iter().all(|b| b.is_ascii_whitespace()) {
            return Vec::new();
        }
        tracing::debug!("flushing unterminated SSE record ({} bytes)", record.len());
        self.parse_record(&record).into_iter().collect()
    }

    /// Bytes waiting for the rest of their record
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Records dropped because they could not be parsed
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn parse_record(&mut self, record: &[u8]) -> Option<WorkflowEvent> {
        let text = match std::str::from_utf8(record) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("skipping SSE record with invalid utf-8: {}", e);
                self.skipped += 1;
                return None;
            }
        };

        let mut data_lines = Vec::new();
        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(value) = line.strip_prefix("data:") {
                data_lines.push(value.strip_prefix(' ').unwrap_or(value));
            } else if !(line.starts_with("event:")
                || line.starts_with("id:")
                || line.starts_with("retry:"))
            {
                tracing::debug!("ignoring unknown SSE line: {}", preview(line));
            }
        }
        if data_lines.is_empty() {
            return None;
        }

        let data = data_lines.join("\n");
        match serde_json::from_str::<WorkflowEvent>(&data) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!("skipping malformed event record: {} ({})", e, preview(&data));
                self.skipped += 1;
                None
            }
        }
    }
}

/// Position of the first blank-line separator at or after `from`:
/// (end of record, separator length). Without one, the offset to resume the
/// next scan from; the last two bytes may open a separator still in flight.
fn find_record_end(buffer: &[u8], from: usize) -> Result<(usize, usize), usize> {
    for i in from..buffer.len() {
        if buffer[i] == b'\n' {
            match &buffer[i + 1..] {
                [b'\n', ..] => return Ok((i, 2)),
                [b'\r', b'\n', ..] => return Ok((i, 3)),
                _ => {}
            }
        }
    }
    Err(buffer.len().saturating_sub(2).max(from))
}

fn preview(text: &str) -> &str {
    if text.len() <= PREVIEW_LEN {
        return text;
    }
    let mut end = PREVIEW_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorkflowEventType;

    const STEP_START: &str = r#"{"event_type":"step_start","node_id":"A","node_name":"Fetch"}"#;

    #[test]
    fn test_single_record() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(format!("data: {}\n\n", STEP_START).as_bytes());
        assert_eq!(events, vec![WorkflowEvent::step_start("A", "Fetch")]);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_record_split_across_chunks() {
        let frame = format!("id: 3\nevent: step_start\ndata: {}\n\n", STEP_START);
        let bytes = frame.as_bytes();
        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        // every split point, including inside the separator
        for split in 1..bytes.len() {
            events.extend(decoder.push(&bytes[..split]));
            events.extend(decoder.push(&bytes[split..]));
        }
        assert_eq!(events.len(), bytes.len() - 1);
        assert!(events
            .iter()
            .all(|e| e.event_type == WorkflowEventType::StepStart));
    }

    #[test]
    fn test_crlf_and_mixed_separators() {
        let mut decoder = SseDecoder::new();
        let input = format!(
            "data: {}\r\n\r\ndata: {{\"event_type\":\"complete\"}}\n\r\n",
            STEP_START
        );
        let events = decoder.push(input.as_bytes());
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, WorkflowEventType::Complete);
    }

    #[test]
    fn test_multiple_data_lines_are_joined() {
        let mut decoder = SseDecoder::new();
        let input = "data: {\"event_type\":\ndata: \"checkpoint\",\"node_id\":\"B\"}\n\n";
        let events = decoder.push(input.as_bytes());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, WorkflowEventType::Checkpoint);
        assert_eq!(events[0].node_id.as_deref(), Some("B"));
    }

    #[test]
    fn test_data_without_space() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data:{\"event_type\":\"cancelled\"}\n\n");
        assert_eq!(events, vec![WorkflowEvent::cancelled()]);
    }

    #[test]
    fn test_malformed_record_is_skipped() {
        let mut decoder = SseDecoder::new();
        let input = format!(
            "data: {{not json\n\ndata: {{\"event_type\":\"heartbeat\"}}\n\ndata: {}\n\n",
            STEP_START
        );
        let events = decoder.push(input.as_bytes());
        assert_eq!(events.len(), 1);
        assert_eq!(decoder.skipped(), 2);
    }

    #[test]
    fn test_comments_and_empty_records_ignored() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\n\nevent: ping\nid: 4\n\n");
        assert!(events.is_empty());
        assert_eq!(decoder.skipped(), 0);
    }

    #[test]
    fn test_large_record_in_small_chunks() {
        let text = "x".repeat(64 * 1024);
        let frame = format!(
            "data: {{\"event_type\":\"step_progress\",\"node_id\":\"A\",\"data\":\"{}\"}}\r\n\r\n",
            text
        );
        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        for chunk in frame.as_bytes().chunks(3) {
            events.extend(decoder.push(chunk));
            if events.is_empty() {
                // only the tail is rescanned on the next push
                assert!(decoder.scanned + 2 >= decoder.buffered_len());
            }
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, WorkflowEventType::StepProgress);
        assert_eq!(events[0].data, Some(serde_json::json!(text)));
        assert_eq!(decoder.buffered_len(), 0);
        assert_eq!(decoder.scanned, 0);
    }

    #[test]
    fn test_separator_split_after_scan() {
        let mut decoder = SseDecoder::new();
        let head = format!("data: {}\n", STEP_START);
        assert!(decoder.push(head.as_bytes()).is_empty());
        assert!(decoder.push(b"\r").is_empty());
        assert_eq!(
            decoder.push(b"\ndata: {\"event_type\":\"complete\"}\n\n"),
            vec![WorkflowEvent::step_start("A", "Fetch"), WorkflowEvent::complete()]
        );
    }

    #[test]
    fn test_finish_flushes_trailing_record() {
        let mut decoder = SseDecoder::new();
        assert!(decoder
            .push(b"data: {\"event_type\":\"complete\"}")
            .is_empty());
        assert_eq!(decoder.finish(), vec![WorkflowEvent::complete()]);
        assert_eq!(decoder.buffered_len(), 0);

        decoder.push(b"\n");
        assert!(decoder.finish().is_empty());
    }
}
