//! Thread batches whose membership is fixed at creation.

use std::sync::Arc;

use crate::error::Result;
use crate::thread::array::ThreadArray;
use crate::thread::ThreadTask;

/// A batch of threads with per-thread context and task pairs decided at
/// creation time.
///
/// Where [`ThreadArray`](crate::ThreadArray) is configured range by range
/// after creation, a group is handed its full membership up front and only
/// ever launched and joined. Launching runs left to right and stops at the
/// first failure, leaving a joinable prefix; joining runs right to left.
/// A partially launched group is handled like a partially launched array:
/// treat it as fatal, or write tasks that wait for a go/stop decision so
/// the launched prefix can always be joined.
pub struct ThreadGroup<C> {
    batch: ThreadArray<C>,
}

impl<C: Send + Sync + 'static> ThreadGroup<C> {
    /// Create a group running `task` on `context` for every listed member.
    ///
    /// # Errors
    /// [`SyncError::Invalid`](crate::SyncError::Invalid) for an empty
    /// member list.
    pub fn create(members: &[(Arc<C>, ThreadTask<C>)]) -> Result<ThreadGroup<C>> {
        let mut batch = ThreadArray::create(members.len())?;
        for (index, (context, task)) in members.iter().enumerate() {
            batch.configure(index, 1, context, task)?;
        }
        Ok(ThreadGroup { batch })
    }

    /// Create a group running one shared task over per-thread contexts.
    pub fn create_with_single_task(
        contexts: &[Arc<C>],
        task: &ThreadTask<C>,
    ) -> Result<ThreadGroup<C>> {
        let mut batch = ThreadArray::create(contexts.len())?;
        batch.configure_tasks(0, contexts.len(), task)?;
        for (index, context) in contexts.iter().enumerate() {
            batch.configure_contexts(index, 1, context)?;
        }
        Ok(ThreadGroup { batch })
    }

    /// Number of threads in the group.
    pub fn thread_count(&self) -> usize {
        self.batch.thread_count()
    }

    /// Number of launched, not yet joined threads.
    pub fn joinable_count(&self) -> usize {
        self.batch.joinable_count()
    }

    /// Launch every member in index order, stopping at the first failure.
    pub fn launch_all(&mut self) -> Result<()> {
        self.batch.launch_all()
    }

    /// Join launched members in reverse index order, stopping at the first
    /// failure.
    pub fn join_all(&mut self) -> Result<()> {
        self.batch.join_all()
    }

    /// Consume the group, exposing the underlying array.
    ///
    /// Useful when a caller wants to reconfigure the batch after joining
    /// everything; the group abstraction itself stays fixed-membership.
    pub fn into_array(self) -> ThreadArray<C> {
        self.batch
    }
}

impl<C: Send + Sync + 'static> std::fmt::Debug for ThreadGroup<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadGroup")
            .field("thread_count", &self.thread_count())
            .field("joinable_count", &self.joinable_count())
            .finish()
    }
}
