//! # Named background tasks
//!
//! Cache preload and the missing-embedding sweep run beside interactive work.
//! [`spawn_named`] gives each one a name, logs how it ended, and returns a
//! [`TaskHandle`] that tests (and the CLI) can await instead of guessing when
//! the task is done.

use std::future::Future;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{LoreError, Result};

pub struct TaskHandle<T> {
    name: &'static str,
    handle: JoinHandle<Result<T>>,
}

impl<T> TaskHandle<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task and return its result.
    ///
    /// # Errors
    /// The task's own error, or [`LoreError::TaskFailed`] if it panicked or
    /// was cancelled.
    pub async fn join(self) -> Result<T> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(LoreError::TaskFailed(format!("{}: {}", self.name, e))),
        }
    }
}

/// Spawn `future` on the current runtime as the task called `name`.
pub fn spawn_named<T, F>(name: &'static str, future: F) -> TaskHandle<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    info!("Background task {} started", name);
    let handle = tokio::spawn(async move {
        let started = Instant::now();
        let result = future.await;
        match &result {
            Ok(_) => info!(
                "Background task {} completed in {:?}",
                name,
                started.elapsed()
            ),
            Err(e) => error!("Background task {} failed: {}", name, e),
        }
        result
    });
    TaskHandle { name, handle }
}
