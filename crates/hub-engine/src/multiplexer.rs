//! Keyed fan-in of live streams plus a control channel
//!
//! Runners and sessions wait on many broker outlets at once while still
//! reacting to commands. The set of sources can change between waits without
//! rebuilding anything.

use futures::stream::{self, BoxStream, StreamExt};
use std::hash::Hash;
use tokio::sync::mpsc;
use tokio_stream::StreamMap;

/// What the multiplexer woke up for
#[derive(Debug, Clone, PartialEq)]
pub enum MuxEvent<K, V, C> {
    /// An item from the source registered under `K`
    Source(K, V),
    /// The source under `K` ended and has been dropped from the set
    SourceClosed(K),
    /// A command from the control channel
    Control(C),
    /// Every control sender is gone
    ControlClosed,
}

/// Waits on a keyed set of streams and one control channel
///
/// Among sources that are ready at the same time the pick is unspecified.
/// Control commands are checked first.
pub struct Multiplexer<K, V, C> {
    sources: StreamMap<K, BoxStream<'static, Option<V>>>,
    control: mpsc::UnboundedReceiver<C>,
    control_open: bool,
}

impl<K, V, C> Multiplexer<K, V, C>
where
    K: Clone + Hash + Eq + Unpin,
    V: Send + 'static,
{
    pub fn new(control: mpsc::UnboundedReceiver<C>) -> Self {
        Self {
            sources: StreamMap::new(),
            control,
            control_open: true,
        }
    }

    /// Add a source, replacing any previous one under the same key
    pub fn insert<S>(&mut self, key: K, source: S)
    where
        S: futures::Stream<Item = V> + Send + 'static,
    {
        // A trailing `None` marks the end so callers can tell a closed
        // source from one that is merely quiet.
        let tagged = source.map(Some).chain(stream::once(async { None }));
        self.sources.insert(key, tagged.boxed());
    }

    /// Drop a source; returns whether it was present
    pub fn remove(&mut self, key: &K) -> bool {
        self.sources.remove(key).is_some()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.sources.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.sources.keys()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Wait for the next event
    ///
    /// Once the control channel has closed and no sources remain, this keeps
    /// returning [`MuxEvent::ControlClosed`].
    pub async fn next(&mut self) -> MuxEvent<K, V, C> {
        tokio::select! {
            biased;

            command = self.control.recv(), if self.control_open => match command {
                Some(command) => MuxEvent::Control(command),
                None => {
                    self.control_open = false;
                    MuxEvent::ControlClosed
                }
            },
            Some((key, item)) = self.sources.next(), if !self.sources.is_empty() => match item {
                Some(item) => MuxEvent::Source(key, item),
                None => MuxEvent::SourceClosed(key),
            },
            else => MuxEvent::ControlClosed,
        }
    }
}
