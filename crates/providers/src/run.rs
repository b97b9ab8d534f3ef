//! Engines run as spawned tasks that push events into a bounded channel;
//! the receiving half is the stream handed to the caller.

use std::future::Future;

use ny_domain::error::{Error, Result};
use ny_domain::event::GenerationEvent;
use ny_domain::stream::BoxStream;
use tokio::sync::mpsc;
use tracing::Instrument;

const EVENT_BUFFER: usize = 64;

pub(crate) struct EventSink {
    tx: mpsc::Sender<Result<GenerationEvent>>,
}

impl EventSink {
    /// Fails once the consumer has dropped the stream, which ends the run.
    pub(crate) async fn emit(&self, event: GenerationEvent) -> Result<()> {
        self.tx
            .send(Ok(event))
            .await
            .map_err(|_| Error::Other("event stream closed by consumer".into()))
    }
}

/// Spawn `run` and stream what it emits. An error returned by the run
/// becomes the final stream item.
pub(crate) fn spawn_run<F, Fut>(span: tracing::Span, run: F) -> BoxStream<'static, Result<GenerationEvent>>
where
    F: FnOnce(EventSink) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
    let fut = run(EventSink { tx: tx.clone() });

    tokio::spawn(
        async move {
            if let Err(e) = fut.await {
                if tx.is_closed() {
                    tracing::debug!(error = %e, "run ended after its consumer left");
                } else {
                    tracing::warn!(error = %e, "generation run failed");
                    let _ = tx.send(Err(e)).await;
                }
            }
        }
        .instrument(span),
    );

    Box::pin(async_stream::stream! {
        while let Some(item) = rx.recv().await {
            yield item;
        }
    })
}
