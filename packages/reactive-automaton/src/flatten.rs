//! Flatten combinators over streams of input streams.
//!
//! Used by [`Feedback`](crate::Feedback) to turn "one producer per success"
//! into a single stream of inputs under a [`FlattenStrategy`].

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{BoxStream, Stream, StreamExt};

use crate::effect::InputStream;
use crate::queue::FlattenStrategy;

/// Flatten `streams` according to `strategy`.
///
/// - `Merge`: inner streams run concurrently, outputs interleave
/// - `Concat`: inner streams run one after another, in arrival order
/// - `Latest`: a new inner stream replaces (and drops) the previous one
pub fn flatten_with<I: Send + 'static>(
    streams: BoxStream<'static, InputStream<I>>,
    strategy: FlattenStrategy,
) -> InputStream<I> {
    match strategy {
        FlattenStrategy::Merge => streams.flatten_unordered(None).boxed(),
        FlattenStrategy::Concat => streams.flatten().boxed(),
        FlattenStrategy::Latest => SwitchLatest::new(streams).boxed(),
    }
}

/// Stream that only ever drains the most recently received inner stream.
struct SwitchLatest<I> {
    outer: Option<BoxStream<'static, InputStream<I>>>,
    inner: Option<InputStream<I>>,
}

impl<I> SwitchLatest<I> {
    fn new(outer: BoxStream<'static, InputStream<I>>) -> Self {
        Self {
            outer: Some(outer),
            inner: None,
        }
    }
}

impl<I> Stream for SwitchLatest<I> {
    type Item = I;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<I>> {
        let this = self.get_mut();

        // Pick up the newest inner stream, dropping anything it supersedes.
        if let Some(outer) = this.outer.as_mut() {
            loop {
                match outer.poll_next_unpin(cx) {
                    Poll::Ready(Some(next)) => this.inner = Some(next),
                    Poll::Ready(None) => {
                        this.outer = None;
                        break;
                    }
                    Poll::Pending => break,
                }
            }
        }

        if let Some(inner) = this.inner.as_mut() {
            match inner.poll_next_unpin(cx) {
                Poll::Ready(Some(item)) => return Poll::Ready(Some(item)),
                Poll::Ready(None) => this.inner = None,
                Poll::Pending => return Poll::Pending,
            }
        }

        if this.outer.is_none() && this.inner.is_none() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}
