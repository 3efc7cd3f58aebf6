//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::pin::Pin;

use tokio::task;
use tracing::Instrument;

/// Handle to a spawned tokio task.
///
/// Dropping the handle aborts the task, so dropping a set of watch handles
/// stops every outstanding watch.
#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
}

// ===== impl Task =====

impl<T> Task<T> {
    /// Spawns a new asynchronous task inside the current tracing span.
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future.in_current_span()),
        }
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, task::JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.join_handle).poll(cx)
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        self.join_handle.abort();
    }
}

// ===== global functions =====

/// Waits for every task to finish and returns their outputs in spawn order.
///
/// The tasks run concurrently; the output order only reflects the order of
/// the input handles.
pub async fn join_all<T>(
    tasks: Vec<Task<T>>,
) -> Vec<Result<T, task::JoinError>> {
    futures::future::join_all(tasks).await
}
