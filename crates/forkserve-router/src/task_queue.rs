use std::collections::HashMap;

use forkserve_protocol::TaskId;

/// Why a task id could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The id was issued but its task already completed. Late answers land here.
    #[error("task {0} was already resolved")]
    Retired(TaskId),
    /// The id was never handed out by this queue.
    #[error("task {0} was never issued")]
    NeverIssued(TaskId),
}

/// Outstanding requests keyed by a monotonically increasing [`TaskId`].
///
/// Ids start at 1 and are never reused, so an id below the next one to be
/// minted that is no longer present can only be a finished task.
#[derive(Debug)]
pub struct TaskQueue<T> {
    items: HashMap<TaskId, T>,
    next_id: u64,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
            next_id: 1,
        }
    }
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `item` under a freshly minted id.
    pub fn add(&mut self, item: T) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.items.insert(id, item);
        id
    }

    /// Remove and return the task.
    pub fn pop(&mut self, id: TaskId) -> Result<T, TaskError> {
        match self.items.remove(&id) {
            Some(item) => Ok(item),
            None => Err(self.missing(id)),
        }
    }

    pub fn get_mut(&mut self, id: TaskId) -> Result<&mut T, TaskError> {
        let missing = self.missing(id);
        self.items.get_mut(&id).ok_or(missing)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove every outstanding task.
    pub fn drain(&mut self) -> impl Iterator<Item = (TaskId, T)> + '_ {
        self.items.drain()
    }

    fn missing(&self, id: TaskId) -> TaskError {
        if id.0 >= 1 && id.0 < self.next_id {
            TaskError::Retired(id)
        } else {
            TaskError::NeverIssued(id)
        }
    }
}
