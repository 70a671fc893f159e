//! Cooperative async tasks
//!
//! An [`AsyncTask`] owns a future and polls it once per [`AsyncTask::step`]
//! with a no-op waker. Workflows are written as ordinary `async` code and
//! suspend at [`yield_now`] points, so a plain outer loop can interleave any
//! number of them on one thread with no executor.

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use futures::task::noop_waker_ref;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future that is pending exactly once
#[derive(Debug, Default)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

/// Give control back to whoever steps the enclosing task
pub fn yield_now() -> YieldNow {
    YieldNow::default()
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// A resumable unit of work advanced one step at a time
pub struct AsyncTask<'a, T> {
    future: Option<LocalBoxFuture<'a, T>>,
    result: Option<T>,
    steps: u64,
}

impl<'a, T> AsyncTask<'a, T> {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = T> + 'a,
    {
        Self {
            future: Some(future.boxed_local()),
            result: None,
            steps: 0,
        }
    }

    /// Run the task until its next suspension point
    ///
    /// # Returns
    /// `true` once the task has completed; further calls do nothing
    pub fn step(&mut self) -> bool {
        let Some(future) = self.future.as_mut() else {
            return true;
        };
        self.steps += 1;
        let mut cx = Context::from_waker(noop_waker_ref());
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(value) => {
                self.result = Some(value);
                self.future = None;
                true
            }
            Poll::Pending => false,
        }
    }

    pub fn completed(&self) -> bool {
        self.future.is_none()
    }

    /// Number of times the task has been stepped while running
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// The result, once completed
    pub fn result(&self) -> Option<&T> {
        self.result.as_ref()
    }

    pub fn take_result(&mut self) -> Option<T> {
        self.result.take()
    }

    /// Step until done, blocking the caller
    ///
    /// Returns `None` only if the result was already taken.
    pub fn run_to_completion(mut self) -> Option<T> {
        while !self.step() {}
        self.result.take()
    }
}

impl<T> fmt::Debug for AsyncTask<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncTask")
            .field("completed", &self.completed())
            .field("steps", &self.steps)
            .finish()
    }
}

/// Tasks run one after another, one step per call
pub struct TaskQueue<'a, T> {
    pending: VecDeque<AsyncTask<'a, T>>,
    results: Vec<T>,
}

impl<'a, T> TaskQueue<'a, T> {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            results: Vec::new(),
        }
    }

    pub fn push(&mut self, task: AsyncTask<'a, T>) {
        self.pending.push_back(task);
    }

    pub fn push_future<F>(&mut self, future: F)
    where
        F: Future<Output = T> + 'a,
    {
        self.push(AsyncTask::new(future));
    }

    /// Tasks not yet completed
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Step the task at the front of the queue
    ///
    /// # Returns
    /// `true` once every queued task has completed
    pub fn step(&mut self) -> bool {
        if let Some(task) = self.pending.front_mut() {
            if task.step() {
                if let Some(mut done) = self.pending.pop_front() {
                    if let Some(value) = done.take_result() {
                        self.results.push(value);
                    }
                }
            }
        }
        self.pending.is_empty()
    }

    /// Results of completed tasks, in completion order
    pub fn results(&self) -> &[T] {
        &self.results
    }

    pub fn take_results(&mut self) -> Vec<T> {
        std::mem::take(&mut self.results)
    }
}

impl<T> Default for TaskQueue<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TaskQueue<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("pending", &self.pending.len())
            .field("completed", &self.results.len())
            .finish()
    }
}
