//! Blocking Task Queue
//!
//! Unbounded FIFO handoff between arbitrarily many producers and the one
//! worker thread. `push` never blocks; `pop` suspends the calling thread
//! until an item is available. The mutex protects exactly the pending
//! task list, and the condvar signals the queue-not-empty transition.

use crate::task::Task;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Thread-safe blocking FIFO of tasks
#[derive(Debug)]
pub struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
    not_empty: Condvar,
}

impl TaskQueue {
    /// Create empty queue
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        }
    }

    /// Append a task to the tail and wake one blocked popper
    ///
    /// Never blocks and never fails due to capacity.
    pub fn push(&self, task: Task) {
        let mut tasks = self.tasks.lock();
        tasks.push_back(task);
        self.not_empty.notify_one();
    }

    /// Remove and return the head, blocking while the queue is empty
    pub fn pop(&self) -> Task {
        let mut tasks = self.tasks.lock();
        loop {
            if let Some(task) = tasks.pop_front() {
                return task;
            }
            self.not_empty.wait(&mut tasks);
        }
    }

    /// Number of pending tasks
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether no tasks are pending
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
