//! Cancellable event stream over a response body.

use super::decoder::SseDecoder;
use super::signal::AbortSignal;
use crate::error::{ClientError, Result};
use crate::types::WorkflowEvent;
use async_stream::stream;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

/// Lazy, finite, ordered sequence of workflow events.
pub type EventStream = BoxStream<'static, Result<WorkflowEvent>>;

/// Decode an SSE byte stream into workflow events.
///
/// Ends when the body ends (after flushing a trailing unterminated record).
/// A body read error is yielded once and ends the stream. When `signal` fires,
/// one `ClientError::Aborted` carrying the abort reason is yielded and the
/// body is dropped without reading further.
pub fn decode_event_stream<S, E>(body: S, signal: AbortSignal) -> EventStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<ClientError> + Send + 'static,
{
    let stream = stream! {
        let mut decoder = SseDecoder::new();
        let mut body = Box::pin(body);

        loop {
            let chunk = tokio::select! {
                biased;
                _ = signal.cancelled() => {
                    tracing::debug!("event stream aborted: {}", signal.reason());
                    yield Err(ClientError::Aborted(signal.reason()));
                    return;
                }
                chunk = body.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    for event in decoder.push(&bytes) {
                        tracing::trace!("event: {}", event.event_type);
                        yield Ok(event);
                    }
                }
                Some(Err(e)) => {
                    let err: ClientError = e.into();
                    tracing::warn!("event stream read error: {}", err);
                    yield Err(err);
                    return;
                }
                None => {
                    for event in decoder.finish() {
                        yield Ok(event);
                    }
                    if decoder.skipped() > 0 {
                        tracing::info!("event stream ended, {} malformed records skipped", decoder.skipped());
                    }
                    return;
                }
            }
        }
    };
    stream.boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::AbortReason;
    use crate::types::WorkflowEventType;
    use futures::stream;
    use std::time::Duration;

    fn chunks(parts: &[&str]) -> Vec<std::result::Result<Bytes, ClientError>> {
        parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect()
    }

    #[tokio::test]
    async fn test_decodes_chunked_body() {
        let body = stream::iter(chunks(&[
            "data: {\"event_type\":\"step_st",
            "art\",\"node_id\":\"A\",\"node_name\":\"Fetch\"}\n",
            "\ndata: {\"event_type\":\"checkpoint\",\"node_id\":\"B\",\"node_name\":\"Review\"}\n\n",
        ]));
        let events: Vec<_> = decode_event_stream(body, AbortSignal::new())
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1].as_ref().unwrap().event_type,
            WorkflowEventType::Checkpoint
        );
    }

    #[tokio::test]
    async fn test_trailing_record_flushed() {
        let body = stream::iter(chunks(&["data: {\"event_type\":\"complete\"}"]));
        let events: Vec<_> = decode_event_stream(body, AbortSignal::new())
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Ok(e) if e.event_type == WorkflowEventType::Complete));
    }

    #[tokio::test]
    async fn test_body_error_ends_stream() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"event_type\":\"step_start\"}\n\n")),
            Err(ClientError::Protocol("connection reset".to_string())),
            Ok(Bytes::from_static(b"data: {\"event_type\":\"complete\"}\n\n")),
        ]);
        let events: Vec<_> = decode_event_stream(body, AbortSignal::new())
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Err(ClientError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_abort_yields_reason_and_ends() {
        let signal = AbortSignal::new();
        // never-ending body after one event
        let body = stream::iter(chunks(&["data: {\"event_type\":\"step_start\"}\n\n"]))
            .chain(stream::pending());
        let mut events = decode_event_stream(body, signal.clone());

        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first.event_type, WorkflowEventType::StepStart);

        let aborter = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            aborter.abort(AbortReason::Superseded);
        });
        let next = tokio::time::timeout(Duration::from_secs(1), events.next())
            .await
            .expect("abort must end the read");
        assert!(matches!(next, Some(Err(ClientError::Aborted(AbortReason::Superseded)))));
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_already_aborted_signal_reads_nothing() {
        let signal = AbortSignal::new();
        signal.abort(AbortReason::External("shutdown".to_string()));
        let body = stream::iter(chunks(&["data: {\"event_type\":\"complete\"}\n\n"]));
        let events: Vec<_> = decode_event_stream(body, signal).collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            Err(ClientError::Aborted(AbortReason::External(reason))) if reason == "shutdown"
        ));
    }
}
