//! Fixed-size batch of threads sharing one configure, launch, join cycle.

use std::sync::Arc;

use crate::error::{Result, SyncError};
use crate::thread::{Thread, ThreadTask};

/// A fixed-size batch of [`Thread`] objects driven through a common life
/// cycle.
///
/// Ranges of threads are configured with a shared context and task, then the
/// whole batch is launched in index order and joined in reverse index order.
/// The array exclusively owns its threads; `joinable_count` tracks how many
/// are launched and not yet joined.
///
/// The array is driven by a single owner: configure, launch, and join calls
/// must not be interleaved across threads for the same array.
pub struct ThreadArray<C> {
    threads: Vec<Thread<C>>,
    joinable_count: usize,
}

impl<C: Send + Sync + 'static> ThreadArray<C> {
    /// Create an array of `thread_count` threads, all in pre-launch state
    /// with no task or context.
    ///
    /// # Errors
    /// [`SyncError::Invalid`](crate::SyncError::Invalid) for a zero count.
    pub fn create(thread_count: usize) -> Result<ThreadArray<C>> {
        if thread_count == 0 {
            return Err(SyncError::Invalid);
        }

        let mut threads = Vec::with_capacity(thread_count);
        for index in 0..thread_count {
            let mut thread = Thread::new();
            // Label errors cannot occur in pre-launch.
            let _ = thread.set_label(&format!("strand-worker-{index}"));
            threads.push(thread);
        }

        Ok(ThreadArray {
            threads,
            joinable_count: 0,
        })
    }

    /// Number of threads in the array.
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Number of launched, not yet joined threads.
    pub fn joinable_count(&self) -> usize {
        self.joinable_count
    }

    /// Share `context` with every thread in
    /// `[range_begin, range_begin + range_length)`.
    ///
    /// Re-configuring with the same arguments is idempotent.
    ///
    /// # Errors
    /// [`SyncError::Invalid`](crate::SyncError::Invalid) for an empty or
    /// out-of-bounds range; [`SyncError::Busy`](crate::SyncError::Busy)
    /// while any thread in the array is joinable.
    pub fn configure_contexts(
        &mut self,
        range_begin: usize,
        range_length: usize,
        context: &Arc<C>,
    ) -> Result<()> {
        self.check_range(range_begin, range_length)?;
        for thread in &mut self.threads[range_begin..range_begin + range_length] {
            thread.configure_context(Arc::clone(context))?;
        }
        Ok(())
    }

    /// Share `task` with every thread in the range.
    pub fn configure_tasks(
        &mut self,
        range_begin: usize,
        range_length: usize,
        task: &ThreadTask<C>,
    ) -> Result<()> {
        self.check_range(range_begin, range_length)?;
        for thread in &mut self.threads[range_begin..range_begin + range_length] {
            thread.configure_task(Arc::clone(task))?;
        }
        Ok(())
    }

    /// Share `context` and `task` with every thread in the range.
    pub fn configure(
        &mut self,
        range_begin: usize,
        range_length: usize,
        context: &Arc<C>,
        task: &ThreadTask<C>,
    ) -> Result<()> {
        self.check_range(range_begin, range_length)?;
        for thread in &mut self.threads[range_begin..range_begin + range_length] {
            thread.configure(Arc::clone(context), Arc::clone(task))?;
        }
        Ok(())
    }

    /// Launch every thread in index order.
    ///
    /// Stops at the first failure: the launched prefix stays joinable and is
    /// reported by [`ThreadArray::joinable_count`]. The caller either treats
    /// a partial launch as fatal or coordinates with its tasks so the
    /// already launched threads shut down and can be joined.
    pub fn launch_all(&mut self) -> Result<()> {
        while self.joinable_count < self.threads.len() {
            self.threads[self.joinable_count].launch()?;
            self.joinable_count += 1;
        }
        Ok(())
    }

    /// Join launched threads in reverse index order.
    ///
    /// Stops at the first failure; threads launched earlier than the failed
    /// one stay joinable and counted.
    pub fn join_all(&mut self) -> Result<()> {
        while self.joinable_count > 0 {
            let result = self.threads[self.joinable_count - 1].join();
            // A panicked task still transitions to joined; only count
            // threads whose exit was actually observed.
            if !self.threads[self.joinable_count - 1].is_joinable() {
                self.joinable_count -= 1;
            }
            result?;
        }
        Ok(())
    }

    fn check_range(&self, range_begin: usize, range_length: usize) -> Result<()> {
        let thread_count = self.threads.len();
        if range_begin >= thread_count
            || range_length == 0
            || range_length > thread_count
            || range_begin > thread_count - range_length
        {
            return Err(SyncError::Invalid);
        }
        if self.joinable_count != 0 {
            return Err(SyncError::Busy);
        }
        Ok(())
    }
}

impl<C> Drop for ThreadArray<C> {
    fn drop(&mut self) {
        if self.joinable_count != 0 {
            log::error!(
                "thread array dropped with {} joinable threads, detaching them",
                self.joinable_count
            );
        }
    }
}
