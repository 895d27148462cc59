//! Envelope producer: oracle output -> canonical event sequence.
//!
//! Relays a streaming generation call into an event sink one event at a
//! time, preserving generation order exactly. Tool-call/tool-result pairs
//! are never reordered relative to each other or to surrounding text
//! deltas -- downstream rendering depends on faithful interleaving.

use tokio::sync::mpsc::Sender;

use super::StreamEvent;
use crate::error::OracleError;
use crate::oracle::{OracleEvent, OracleStream, UsageInfo};

use futures::StreamExt;

/// Why a relay stopped.
pub enum RelayEnd {
    /// The oracle signalled completion; its reported usage is attached.
    Finished(UsageInfo),
    /// The stream ended without a finish signal.
    Exhausted,
    /// The sink closed (client disconnected) before the stream ended.
    SinkClosed,
}

/// Forward every oracle event into the sink as a canonical [`StreamEvent`].
///
/// Does not emit `done`: terminal accounting belongs to the pipeline, which
/// may be aggregating usage across several calls. Oracle stream errors
/// propagate to the caller for boundary rendering.
pub async fn relay_oracle_stream(
    mut stream: OracleStream,
    tx: &Sender<StreamEvent>,
) -> Result<RelayEnd, OracleError> {
    while let Some(event) = stream.next().await {
        let mapped = match event? {
            OracleEvent::TextDelta(delta) => StreamEvent::TextDelta { delta },
            OracleEvent::ToolCall { name, arguments } => StreamEvent::ToolCall { name, arguments },
            OracleEvent::ToolResult { name, output } => StreamEvent::ToolResult { name, output },
            OracleEvent::Finish { usage } => return Ok(RelayEnd::Finished(usage)),
        };
        if tx.send(mapped).await.is_err() {
            return Ok(RelayEnd::SinkClosed);
        }
    }
    Ok(RelayEnd::Exhausted)
}

/// Relay one complete generation stream and close it out with `done`.
///
/// `base_usage` carries accounting from earlier calls in the same request
/// (plan + sub-tasks); the oracle's own usage is absorbed into it. Used by
/// endpoints whose whole response is a single streamed call.
pub async fn produce_into(
    stream: OracleStream,
    tx: &Sender<StreamEvent>,
    mut base_usage: UsageInfo,
    conversation_id: String,
) -> Result<(), OracleError> {
    match relay_oracle_stream(stream, tx).await? {
        RelayEnd::Finished(usage) => {
            base_usage.absorb(&usage);
            base_usage.duration_ms += usage.duration_ms;
        }
        RelayEnd::Exhausted => {}
        RelayEnd::SinkClosed => return Ok(()),
    }
    let _ = tx
        .send(StreamEvent::Done {
            usage: base_usage,
            conversation_id,
        })
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::testing::usage;
    use futures::stream;
    use serde_json::json;

    fn scripted(events: Vec<OracleEvent>) -> OracleStream {
        Box::pin(stream::iter(events.into_iter().map(Ok)))
    }

    async fn collect(rx: &mut tokio::sync::mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn relays_events_in_exact_generation_order() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let oracle_events = vec![
            OracleEvent::TextDelta("a".into()),
            OracleEvent::ToolCall {
                name: "T".into(),
                arguments: json!({"q": 1}),
            },
            OracleEvent::ToolResult {
                name: "T".into(),
                output: json!({"r": 2}),
            },
            OracleEvent::TextDelta("b".into()),
            OracleEvent::Finish { usage: usage(9) },
        ];

        produce_into(scripted(oracle_events), &tx, UsageInfo::default(), "c1".into())
            .await
            .unwrap();
        drop(tx);

        let events = collect(&mut rx).await;
        let names: Vec<_> = events.iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec!["text-delta", "tool-call", "tool-result", "text-delta", "done"]
        );
        assert_eq!(events[0], StreamEvent::TextDelta { delta: "a".into() });
        assert_eq!(events[3], StreamEvent::TextDelta { delta: "b".into() });
        match &events[4] {
            StreamEvent::Done {
                usage,
                conversation_id,
            } => {
                assert_eq!(usage.total_tokens, 9);
                assert_eq!(conversation_id, "c1");
            }
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn done_absorbs_base_usage() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        produce_into(
            scripted(vec![OracleEvent::Finish { usage: usage(5) }]),
            &tx,
            usage(20),
            "c2".into(),
        )
        .await
        .unwrap();
        drop(tx);

        let events = collect(&mut rx).await;
        match events.last().unwrap() {
            StreamEvent::Done { usage, .. } => assert_eq!(usage.total_tokens, 25),
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oracle_error_propagates_without_done() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let stream: OracleStream = Box::pin(stream::iter(vec![
            Ok(OracleEvent::TextDelta("partial".into())),
            Err(OracleError::GenerationFailed("provider down".into())),
        ]));

        let err = produce_into(stream, &tx, UsageInfo::default(), "c3".into())
            .await
            .unwrap_err();
        drop(tx);

        assert!(err.to_string().contains("provider down"));
        let events = collect(&mut rx).await;
        assert_eq!(events.len(), 1);
        assert!(!events[0].is_done());
    }

    #[tokio::test]
    async fn closed_sink_stops_the_relay_quietly() {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        drop(rx);
        let result = produce_into(
            scripted(vec![
                OracleEvent::TextDelta("a".into()),
                OracleEvent::Finish { usage: usage(1) },
            ]),
            &tx,
            UsageInfo::default(),
            "c4".into(),
        )
        .await;
        assert!(result.is_ok());
    }
}
