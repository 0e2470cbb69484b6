//! Ordered task queue with a single forward cursor.
//!
//! Tasks are never removed or cancelled. New tasks may be spliced in at an
//! explicit position, which is clamped so nothing lands behind the cursor.

/// Position-addressable queue drained strictly in order
#[derive(Debug, Clone)]
pub struct TaskQueue<T> {
    tasks: Vec<T>,
    next: usize,
}

impl<T: Clone> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            next: 0,
        }
    }

    /// Insert `task` at `position` (default: the end) and return the index
    /// it landed at
    pub fn submit(&mut self, task: T, position: Option<usize>) -> usize {
        let index = position
            .unwrap_or(self.tasks.len())
            .clamp(self.next, self.tasks.len());
        self.tasks.insert(index, task);
        index
    }

    /// Move the cursor forward and hand out the task it passed over, with
    /// its sequence number. `None` once the queue is exhausted.
    ///
    /// The cursor moves before the caller runs the task, so a completion
    /// callback that fires while the task is still on the stack cannot make
    /// the same task run twice.
    pub fn advance(&mut self) -> Option<(usize, T)> {
        let task = self.tasks.get(self.next)?.clone();
        let seq = self.next;
        self.next += 1;
        Some((seq, task))
    }

    /// Index of the next task to run
    pub fn cursor(&self) -> usize {
        self.next
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Whether every submitted task has been handed out
    pub fn is_exhausted(&self) -> bool {
        self.next >= self.tasks.len()
    }
}

impl<T: Clone> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
