//! External input sources.
//!
//! An automaton consumes exactly one [`InputSource`]. The source ends in one
//! of two ways: it completes (the stream finishes, or every sender is
//! dropped or calls [`InputSender::complete`]) or it is interrupted through
//! [`InputSender::interrupt`]. Either way the automaton terminates.

use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::{AutomatonError, Result};

/// One item from an input source.
pub(crate) enum InputSignal<I> {
    Value(I),
    Interrupted,
}

/// The external input stream of an automaton.
pub struct InputSource<I> {
    pub(crate) signals: BoxStream<'static, InputSignal<I>>,
}

impl<I: Send + 'static> InputSource<I> {
    /// Use an existing stream. Its end is treated as completion.
    pub fn from_stream<St>(inputs: St) -> Self
    where
        St: Stream<Item = I> + Send + 'static,
    {
        Self {
            signals: inputs.map(InputSignal::Value).boxed(),
        }
    }

    /// A sender/source pair for pushing inputs by hand.
    pub fn pipe() -> (InputSender<I>, InputSource<I>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            signals: UnboundedReceiverStream::new(rx).boxed(),
        };
        (InputSender { tx }, source)
    }
}

impl<I: Send + 'static> From<BoxStream<'static, I>> for InputSource<I> {
    fn from(inputs: BoxStream<'static, I>) -> Self {
        Self::from_stream(inputs)
    }
}

/// Pushes inputs into an [`InputSource`] created by [`InputSource::pipe`].
pub struct InputSender<I> {
    tx: mpsc::UnboundedSender<InputSignal<I>>,
}

impl<I> Clone for InputSender<I> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<I> InputSender<I> {
    /// Send an input. Fails once the automaton has terminated.
    pub fn send(&self, input: I) -> Result<()> {
        self.tx
            .send(InputSignal::Value(input))
            .map_err(|_| AutomatonError::InputClosed)
    }

    /// Interrupt the source. The automaton terminates with
    /// [`Termination::Interrupted`](crate::Termination::Interrupted).
    pub fn interrupt(self) {
        let _ = self.tx.send(InputSignal::Interrupted);
    }

    /// Stop sending from this handle. The source completes once every sender
    /// is gone.
    pub fn complete(self) {
        drop(self);
    }

    /// Whether the receiving automaton has terminated.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
