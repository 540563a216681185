//! A named, join-checked wrapper around [`tokio::task::JoinHandle`].

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, Instrument};

/// A thin wrapper around [`tokio::task::JoinHandle`] that adds the
/// `#[must_use]` lint (so spawned tasks aren't silently dropped) and a name,
/// logged when the task is spawned, for diagnosability when several
/// long-lived tasks (scheduler, indexer, persister) are running at once.
#[must_use]
pub struct Task<T> {
    handle: JoinHandle<T>,
    name: Cow<'static, str>,
}

impl<T> Task<T> {
    /// Spawns a named task which inherits the current tracing span.
    #[allow(clippy::disallowed_methods)]
    pub fn spawn<F>(name: impl Into<Cow<'static, str>>, future: F) -> Task<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let name = name.into();
        let span = tracing::Span::current();
        debug!(%name, "spawning task");
        Task {
            handle: tokio::spawn(future.instrument(span)),
            name,
        }
    }

    /// Spawns a task without a name, for fire-and-forget work the caller
    /// never joins (e.g. a single note-decryption callback).
    #[allow(clippy::disallowed_methods)]
    pub fn spawn_unnamed<F>(future: F) -> Task<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Self::spawn(String::new(), future)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, JoinError>;
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn spawn_and_join() {
        let task = Task::spawn("add-one", async { 1 + 1 });
        assert_eq!(task.name(), "add-one");
        let result = task.await.unwrap();
        assert_eq!(result, 2);
    }

    #[tokio::test]
    async fn unnamed_task_runs() {
        let task = Task::spawn_unnamed(async { "done" });
        assert_eq!(task.await.unwrap(), "done");
    }
}
