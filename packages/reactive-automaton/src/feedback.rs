//! Feedback: follow-up inputs derived from successful transitions.
//!
//! Where an [`Effect`](crate::Effect) is attached to a single transition, a
//! [`Feedback`] watches the stream of every [`Success`] and decides on its own
//! which ones lead to more work. Its outputs enter the automaton through the
//! same feedback channel as effect outputs.
//!
//! ```ignore
//! let session = Feedback::filter(
//!     |success: &Success<Input, State>| success.to_state == State::LoggingIn,
//!     |_| stream::once(login_request()),
//! );
//! let audit = Feedback::extract(
//!     |success: &Success<Input, State>| success.to_state.session_id(),
//!     |id| stream::once(record_login(id)),
//! );
//!
//! let automaton = Automaton::builder(State::LoggedOut, mapping)
//!     .with_feedback(Feedback::reduce([session, audit]))
//!     .build(inputs);
//! ```

use std::sync::Arc;

use futures::future;
use futures::stream::{self, select_all, BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::effect::InputStream;
use crate::flatten::flatten_with;
use crate::queue::FlattenStrategy;
use crate::reply::Success;

/// Stream of successful transitions handed to a feedback transform.
pub type SuccessStream<I, S> = BoxStream<'static, Success<I, S>>;

type Transform<I, S> = Arc<dyn Fn(SuccessStream<I, S>) -> InputStream<I> + Send + Sync>;

/// A transform from successful transitions to new inputs.
///
/// Several feedbacks combine with [`Feedback::reduce`]; each one sees every
/// success and their outputs are merged.
pub struct Feedback<I, S> {
    transforms: Vec<Transform<I, S>>,
}

impl<I, S> Clone for Feedback<I, S> {
    fn clone(&self) -> Self {
        Self {
            transforms: self.transforms.clone(),
        }
    }
}

impl<I, S> std::fmt::Debug for Feedback<I, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feedback")
            .field("transforms", &self.transforms.len())
            .finish()
    }
}

impl<I, S> Feedback<I, S>
where
    I: Clone + Send + 'static,
    S: Clone + Send + 'static,
{
    /// Wrap a raw stream transform.
    pub fn new<F>(transform: F) -> Self
    where
        F: Fn(SuccessStream<I, S>) -> InputStream<I> + Send + Sync + 'static,
    {
        Self {
            transforms: vec![Arc::new(transform)],
        }
    }

    /// Run `produce` for every success. A newer success supersedes the
    /// production started by an older one.
    pub fn produce<F, St>(produce: F) -> Self
    where
        F: Fn(Success<I, S>) -> St + Send + Sync + 'static,
        St: Stream<Item = I> + Send + 'static,
    {
        Self::with_strategy(FlattenStrategy::Latest, produce)
    }

    /// Run `produce` for every success, combining productions with `strategy`.
    pub fn with_strategy<F, St>(strategy: FlattenStrategy, produce: F) -> Self
    where
        F: Fn(Success<I, S>) -> St + Send + Sync + 'static,
        St: Stream<Item = I> + Send + 'static,
    {
        Self::select(strategy, move |success| Some(produce(success).boxed()))
    }

    /// Run `produce` only for successes matching `predicate`. Other successes
    /// are ignored and do not supersede anything.
    pub fn filter<P, F, St>(predicate: P, produce: F) -> Self
    where
        P: Fn(&Success<I, S>) -> bool + Send + Sync + 'static,
        F: Fn(Success<I, S>) -> St + Send + Sync + 'static,
        St: Stream<Item = I> + Send + 'static,
    {
        Self::select(FlattenStrategy::Latest, move |success| {
            predicate(&success).then(|| produce(success).boxed())
        })
    }

    /// Run `produce` with whatever `try_get` extracts from a success.
    ///
    /// A success that yields nothing counts as an empty production, so it
    /// still supersedes the previous one.
    pub fn extract<T, G, F, St>(try_get: G, produce: F) -> Self
    where
        G: Fn(&Success<I, S>) -> Option<T> + Send + Sync + 'static,
        F: Fn(T) -> St + Send + Sync + 'static,
        St: Stream<Item = I> + Send + 'static,
    {
        Self::select(FlattenStrategy::Latest, move |success| {
            Some(match try_get(&success) {
                Some(value) => produce(value).boxed(),
                None => stream::empty().boxed(),
            })
        })
    }

    /// Combine feedbacks. Every one of them sees every success.
    pub fn reduce<F>(feedbacks: F) -> Self
    where
        F: IntoIterator<Item = Feedback<I, S>>,
    {
        Self {
            transforms: feedbacks
                .into_iter()
                .flat_map(|feedback| feedback.transforms)
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    fn select<F>(strategy: FlattenStrategy, produce: F) -> Self
    where
        F: Fn(Success<I, S>) -> Option<InputStream<I>> + Send + Sync + 'static,
    {
        let produce = Arc::new(produce);
        Self::new(move |successes| {
            let produce = produce.clone();
            let productions = successes
                .filter_map(move |success| future::ready(produce(success)))
                .boxed();
            flatten_with(productions, strategy)
        })
    }

    /// Instantiate every transform. Successes pushed into the returned sink
    /// come out of the returned stream as inputs.
    pub(crate) fn connect(&self) -> (SuccessSink<I, S>, InputStream<I>) {
        let mut senders = Vec::with_capacity(self.transforms.len());
        let mut outputs = Vec::with_capacity(self.transforms.len());
        for transform in &self.transforms {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            outputs.push(transform(UnboundedReceiverStream::new(rx).boxed()));
        }
        (SuccessSink { senders }, select_all(outputs).boxed())
    }
}

/// Entry point of connected feedback transforms.
pub(crate) struct SuccessSink<I, S> {
    senders: Vec<mpsc::UnboundedSender<Success<I, S>>>,
}

impl<I: Clone, S: Clone> SuccessSink<I, S> {
    pub fn send(&self, success: &Success<I, S>) {
        for sender in &self.senders {
            let _ = sender.send(success.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    type TestFeedback = Feedback<&'static str, u32>;

    fn success(input: &'static str, to_state: u32) -> Success<&'static str, u32> {
        Success {
            input,
            from_state: 0,
            to_state,
        }
    }

    fn after(input: &'static str, delay_ms: u64) -> InputStream<&'static str> {
        stream::once(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            input
        })
        .boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_produce_supersedes_older_production() {
        let feedback = TestFeedback::produce(|success| after(success.input, 50));
        let (sink, outputs) = feedback.connect();

        sink.send(&success("first", 1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        sink.send(&success("second", 2));
        drop(sink);

        let values: Vec<_> = outputs.collect().await;
        assert_eq!(values, vec!["second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_ignores_non_matching() {
        let feedback = TestFeedback::filter(
            |success| success.to_state == 1,
            |success| after(success.input, 50),
        );
        let (sink, outputs) = feedback.connect();

        sink.send(&success("kept", 1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        sink.send(&success("ignored", 2));
        drop(sink);

        let values: Vec<_> = outputs.collect().await;
        assert_eq!(values, vec!["kept"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extract_none_supersedes() {
        let feedback = TestFeedback::extract(
            |success| (success.to_state == 1).then_some("extracted"),
            |value| after(value, 50),
        );
        let (sink, outputs) = feedback.connect();

        sink.send(&success("a", 1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        sink.send(&success("b", 2));
        drop(sink);

        let values: Vec<_> = outputs.collect().await;
        assert!(values.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reduce_feeds_every_transform() {
        let feedback = TestFeedback::reduce([
            TestFeedback::produce(|_| after("left", 20)),
            TestFeedback::with_strategy(FlattenStrategy::Merge, |_| after("right", 10)),
        ]);
        let (sink, outputs) = feedback.connect();

        sink.send(&success("go", 1));
        drop(sink);

        let values: Vec<_> = outputs.collect().await;
        assert_eq!(values, vec!["right", "left"]);
    }

    #[test]
    fn test_reduce_of_nothing_is_empty() {
        assert!(TestFeedback::reduce(Vec::new()).is_empty());
    }
}
