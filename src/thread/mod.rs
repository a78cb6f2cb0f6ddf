//! Thread objects with an explicit configure, launch, join life cycle.

pub mod array;
pub mod group;
pub mod local;


pub use array::ThreadArray;
pub use group::ThreadGroup;
pub use local::{LocalSlot, LOCAL_SLOT_MIN_AVAILABLE};

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::{Result, SyncError};
use crate::host;

/// Work shared between threads: invoked with the thread's context.
pub type ThreadTask<C> = Arc<dyn Fn(&C) + Send + Sync + 'static>;

/// Life cycle position of a [`Thread`].
///
/// Transitions are monotonic: pre-launch, then joinable after a successful
/// launch, then joined after a successful join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Configurable; no native thread exists yet.
    Prelaunch,
    /// Launched and not yet joined.
    Joinable,
    /// Exit observed; the object is inert.
    Joined,
}

/// An object owning at most one native thread.
///
/// In pre-launch the task and context can be set independently and
/// repeatedly; both are required to launch. Launching hands a clone of the
/// context to the task on a new native thread. Joining blocks until the task
/// returns; the launch happens-before the task's first step, and the task's
/// return happens-before a successful join returns.
///
/// Dropping a joinable thread is a contract violation: the native thread is
/// detached and the violation logged. Join first.
pub struct Thread<C> {
    task: Option<ThreadTask<C>>,
    context: Option<Arc<C>>,
    label: Option<String>,
    state: ThreadState,
    native: Option<JoinHandle<()>>,
}

impl<C: Send + Sync + 'static> Thread<C> {
    /// A thread object in pre-launch state with no task or context.
    pub fn new() -> Thread<C> {
        Thread {
            task: None,
            context: None,
            label: None,
            state: ThreadState::Prelaunch,
            native: None,
        }
    }

    /// Create and immediately launch a thread running `task` on `context`.
    ///
    /// On failure nothing keeps running and the error is returned.
    pub fn spawn(context: Arc<C>, task: ThreadTask<C>) -> Result<Thread<C>> {
        let mut thread = Thread::new();
        thread.configure(context, task)?;
        thread.launch()?;
        Ok(thread)
    }

    /// Set the context handed to the task.
    ///
    /// # Errors
    /// [`SyncError::Busy`](crate::SyncError::Busy) while the thread is
    /// joinable.
    pub fn configure_context(&mut self, context: Arc<C>) -> Result<()> {
        self.ensure_configurable()?;
        self.context = Some(context);
        Ok(())
    }

    /// Set the task to run.
    ///
    /// # Errors
    /// [`SyncError::Busy`](crate::SyncError::Busy) while the thread is
    /// joinable.
    pub fn configure_task(&mut self, task: ThreadTask<C>) -> Result<()> {
        self.ensure_configurable()?;
        self.task = Some(task);
        Ok(())
    }

    /// Set context and task together.
    pub fn configure(&mut self, context: Arc<C>, task: ThreadTask<C>) -> Result<()> {
        self.ensure_configurable()?;
        self.context = Some(context);
        self.task = Some(task);
        Ok(())
    }

    /// Label the native thread for debuggers.
    pub fn set_label(&mut self, label: &str) -> Result<()> {
        self.ensure_configurable()?;
        self.label = Some(label.to_owned());
        Ok(())
    }

    /// Start the native thread.
    ///
    /// # Errors
    /// [`SyncError::Busy`](crate::SyncError::Busy) if already joinable;
    /// [`SyncError::Invalid`](crate::SyncError::Invalid) if already joined or
    /// not fully configured. A launch failure leaves the object in
    /// pre-launch with its configuration intact.
    pub fn launch(&mut self) -> Result<()> {
        match self.state {
            ThreadState::Joinable => return Err(SyncError::Busy),
            ThreadState::Joined => return Err(SyncError::Invalid),
            ThreadState::Prelaunch => {}
        }

        let task = self.task.clone().ok_or(SyncError::Invalid)?;
        let context = self.context.clone().ok_or(SyncError::Invalid)?;

        let handle = host::spawn_thread(self.label.clone(), move || task.as_ref()(context.as_ref()))?;
        self.native = Some(handle);
        self.state = ThreadState::Joinable;
        Ok(())
    }

    /// Wait for the task to return.
    ///
    /// # Errors
    /// [`SyncError::Invalid`](crate::SyncError::Invalid) when the thread is
    /// not joinable, or when the task panicked; the panic is contained and
    /// the thread still transitions to joined.
    pub fn join(&mut self) -> Result<()> {
        if self.state != ThreadState::Joinable {
            return Err(SyncError::Invalid);
        }
        let handle = self.native.take().ok_or(SyncError::Invalid)?;

        let result = handle.join();
        self.state = ThreadState::Joined;
        match result {
            Ok(()) => Ok(()),
            Err(_) => {
                log::warn!("joined a thread whose task panicked");
                Err(SyncError::Invalid)
            }
        }
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    fn ensure_configurable(&self) -> Result<()> {
        if self.state == ThreadState::Joinable {
            Err(SyncError::Busy)
        } else {
            Ok(())
        }
    }

    pub fn is_joinable(&self) -> bool {
        self.state == ThreadState::Joinable
    }
}

impl<C: Send + Sync + 'static> Default for Thread<C> {
    fn default() -> Self {
        Thread::new()
    }
}

impl<C> Drop for Thread<C> {
    fn drop(&mut self) {
        if self.state == ThreadState::Joinable {
            log::error!("thread dropped while joinable, detaching the native thread");
        }
    }
}

/// Offer the rest of the current time slice to the scheduler.
pub fn yield_now() {
    host::yield_now();
}

/// Identifier of the calling thread, stable for the thread's lifetime and
/// never reused within the process.
pub fn current_thread_id() -> u64 {
    host::current_thread_id()
}
