use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    Stream,
};
use tracing::warn;

/// Stream of events from an [`EventSender`](crate::EventSender).
///
/// Lagged receives are logged and skipped.
#[derive(Debug)]
pub struct EventStream<T> {
    inner: BroadcastStream<T>,
}

impl<T: Clone + Send + 'static> EventStream<T> {
    /// Creates a new `EventStream`.
    pub fn new(receiver: tokio::sync::broadcast::Receiver<T>) -> Self {
        Self { inner: BroadcastStream::new(receiver) }
    }
}

impl<T: Clone + Send + 'static> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(item))) => return Poll::Ready(Some(item)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    warn!(target: "sync::events", skipped, "event stream lagged");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
