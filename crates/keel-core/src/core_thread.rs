//! The core thread: a dedicated OS thread with a FIFO command queue.
//!
//! Every mutation of core-thread state crosses the thread boundary as a
//! command. Commands are executed one at a time, in the order they were
//! queued, on a single thread. The state they operate on (`S`) is built on
//! the core thread itself by an init closure and never leaves it, so it does
//! not need to be `Send`.
//!
//! # Example
//!
//! ```
//! use keel_core::core_thread::CoreThread;
//!
//! // The core thread owns a counter; commands mutate it in order.
//! let core = CoreThread::new(|| 0u32).unwrap();
//!
//! core.queue_command(|count| *count += 1).unwrap();
//! core.queue_command(|count| *count += 1).unwrap();
//!
//! // Round-trip a value back to the calling thread.
//! let value = core.execute_sync(|count| *count).unwrap();
//! assert_eq!(value, 2);
//!
//! core.stop_and_join();
//! ```
//!
//! # Related
//!
//! - [`crate::latch::AsyncOp`] - Value returned by [`CoreThread::queue_return_command`]
//! - [`crate::thread_check::ThreadAffinity`] - Obtained from [`CoreThread::affinity`]

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::{Condvar, Mutex};

use crate::error::{CoreThreadError, Result};
use crate::latch::{AsyncOp, async_op_pair};
use crate::logging::targets;
use crate::thread_check::{ThreadAffinity, ThreadRole};

/// Default capacity for the core thread's command queue.
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// A command executed on the core thread against its state.
pub type Command<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Configuration for spawning a core thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreThreadConfig {
    /// Name for the core thread.
    pub name: String,
    /// Stack size for the core thread in bytes. `None` uses the default.
    pub stack_size: Option<usize>,
    /// Capacity of the command queue. Producers block while it is full.
    pub queue_capacity: usize,
}

impl Default for CoreThreadConfig {
    fn default() -> Self {
        Self {
            name: "keel-core".to_string(),
            stack_size: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl CoreThreadConfig {
    /// Create a new configuration with the given thread name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Builder for spawning core threads with custom configuration.
#[derive(Debug, Default)]
pub struct CoreThreadBuilder {
    config: CoreThreadConfig,
}

impl CoreThreadBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the thread name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the stack size for the core thread.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    /// Set the command queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Spawn the core thread. `init` runs on the new thread to build its state.
    pub fn build<S, F>(self, init: F) -> Result<CoreThread<S>>
    where
        S: 'static,
        F: FnOnce() -> S + Send + 'static,
    {
        CoreThread::with_config(self.config, init)
    }
}

/// State shared between the handle and the running thread.
struct CoreThreadState {
    /// Whether the thread accepts new commands.
    running: AtomicBool,
    /// Commands queued but not yet executed.
    pending: AtomicUsize,
    /// Commands executed since the thread started.
    executed: AtomicU64,
    /// Set once the thread has left its loop.
    exited: AtomicBool,
    /// Condvar for waiting on shutdown.
    shutdown_condvar: Condvar,
    /// Mutex for the condvar.
    shutdown_mutex: Mutex<()>,
}

impl CoreThreadState {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            pending: AtomicUsize::new(0),
            executed: AtomicU64::new(0),
            exited: AtomicBool::new(false),
            shutdown_condvar: Condvar::new(),
            shutdown_mutex: Mutex::new(()),
        }
    }

    fn signal_exit(&self) {
        let _guard = self.shutdown_mutex.lock();
        self.running.store(false, Ordering::Release);
        self.exited.store(true, Ordering::Release);
        self.shutdown_condvar.notify_all();
    }
}

/// Marks the thread as stopped when the loop exits, including by panic.
struct ExitGuard(Arc<CoreThreadState>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.signal_exit();
        if thread::panicking() {
            tracing::error!(target: targets::CORE_THREAD, "core thread terminated by a panic");
        } else {
            tracing::debug!(target: targets::CORE_THREAD, "core thread exited");
        }
    }
}

enum CoreTask<S> {
    Execute(Command<S>),
    Shutdown,
}

/// A dedicated thread executing queued commands against thread-owned state.
///
/// # Thread Safety
///
/// `CoreThread<S>` is `Send + Sync`; any thread may queue commands. The state
/// `S` is only ever touched by the core thread.
pub struct CoreThread<S: 'static> {
    sender: Sender<CoreTask<S>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    state: Arc<CoreThreadState>,
    affinity: ThreadAffinity,
}

impl<S: 'static> CoreThread<S> {
    /// Spawn a core thread with the default configuration.
    pub fn new<F>(init: F) -> Result<Self>
    where
        F: FnOnce() -> S + Send + 'static,
    {
        Self::with_config(CoreThreadConfig::default(), init)
    }

    /// Spawn a core thread with a custom configuration.
    pub fn with_config<F>(config: CoreThreadConfig, init: F) -> Result<Self>
    where
        F: FnOnce() -> S + Send + 'static,
    {
        let (sender, receiver) = bounded(config.queue_capacity.max(1));
        let state = Arc::new(CoreThreadState::new());
        let thread_state = state.clone();

        let mut builder = thread::Builder::new().name(config.name.clone());
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let handle = builder.spawn(move || {
            let _exit = ExitGuard(thread_state.clone());
            let mut context = init();
            core_loop(receiver, &thread_state, &mut context);
        })?;

        let affinity = ThreadAffinity::for_thread(handle.thread().id(), ThreadRole::Core);
        tracing::debug!(
            target: targets::CORE_THREAD,
            name = %config.name,
            queue_capacity = config.queue_capacity,
            "core thread started"
        );

        Ok(Self {
            sender,
            handle: Mutex::new(Some(handle)),
            state,
            affinity,
        })
    }

    /// Check if the core thread still accepts commands.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Check if the calling thread is the core thread.
    pub fn is_core_thread(&self) -> bool {
        self.affinity.is_same_thread()
    }

    /// Affinity bound to the core thread, for assertions elsewhere.
    pub fn affinity(&self) -> ThreadAffinity {
        self.affinity
    }

    /// Number of queued commands not yet executed.
    pub fn pending_commands(&self) -> usize {
        self.state.pending.load(Ordering::Acquire)
    }

    /// Number of commands executed since the thread started.
    pub fn executed_commands(&self) -> u64 {
        self.state.executed.load(Ordering::Acquire)
    }

    /// Queue a command for execution on the core thread.
    ///
    /// Commands run in FIFO order. When the queue is full the caller blocks,
    /// except on the core thread itself where [`CoreThreadError::QueueFull`]
    /// is returned instead.
    pub fn queue_command<F>(&self, command: F) -> Result<()>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        if !self.is_running() {
            return Err(CoreThreadError::Stopped);
        }

        self.state.pending.fetch_add(1, Ordering::AcqRel);
        let task = CoreTask::Execute(Box::new(command));

        let sent = if self.is_core_thread() {
            self.sender.try_send(task).map_err(|err| match err {
                TrySendError::Full(_) => CoreThreadError::QueueFull,
                TrySendError::Disconnected(_) => CoreThreadError::Stopped,
            })
        } else {
            self.sender.send(task).map_err(|_| CoreThreadError::Stopped)
        };

        match sent {
            Ok(()) => {
                tracing::trace!(target: targets::CORE_THREAD, "command queued");
                Ok(())
            }
            Err(err) => {
                self.state.pending.fetch_sub(1, Ordering::AcqRel);
                Err(err)
            }
        }
    }

    /// Queue a command whose return value is delivered through an [`AsyncOp`].
    pub fn queue_return_command<R, F>(&self, command: F) -> Result<AsyncOp<R>>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let (completer, op) = async_op_pair();
        self.queue_command(move |context| completer.complete(command(context)))?;
        Ok(op)
    }

    /// Queue a command and block until it has run, returning its value.
    ///
    /// Fails with [`CoreThreadError::WouldDeadlock`] on the core thread.
    pub fn execute_sync<R, F>(&self, command: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        if self.is_core_thread() {
            return Err(CoreThreadError::WouldDeadlock);
        }
        self.queue_return_command(command)?
            .wait()
            .ok_or(CoreThreadError::Stopped)
    }

    /// Block until every command queued before this call has executed.
    pub fn flush(&self) -> Result<()> {
        self.execute_sync(|_| ())
    }

    /// Request the core thread to stop after draining the queue.
    ///
    /// New commands are rejected immediately. Use [`join`](Self::join) to wait
    /// for the thread to exit.
    pub fn stop(&self) {
        if !self.state.running.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(target: targets::CORE_THREAD, "core thread stop requested");
        if self.is_core_thread() {
            let _ = self.sender.try_send(CoreTask::Shutdown);
        } else {
            let _ = self.sender.send(CoreTask::Shutdown);
        }
    }

    /// Wait for the core thread to exit.
    ///
    /// Returns `true` if the thread was joined successfully, `false` if it was
    /// already joined, panicked, or this is the core thread itself.
    pub fn join(&self) -> bool {
        if self.is_core_thread() {
            return false;
        }
        let mut handle = self.handle.lock();
        match handle.take() {
            Some(h) => h.join().is_ok(),
            None => false,
        }
    }

    /// Stop the core thread and wait for it to exit.
    pub fn stop_and_join(&self) -> bool {
        self.stop();
        self.join()
    }

    /// Check if the core thread has left its command loop.
    pub fn has_exited(&self) -> bool {
        self.state.exited.load(Ordering::Acquire)
    }

    /// Wait for the core thread to exit with a timeout.
    ///
    /// Returns `true` if the thread exited within the timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut guard = self.state.shutdown_mutex.lock();
        let _ = self.state.shutdown_condvar.wait_while_for(
            &mut guard,
            |_| !self.state.exited.load(Ordering::Acquire),
            timeout,
        );
        self.has_exited()
    }
}

impl<S: 'static> fmt::Debug for CoreThread<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreThread")
            .field("thread_id", &self.affinity.thread_id())
            .field("running", &self.is_running())
            .field("pending", &self.pending_commands())
            .finish()
    }
}

impl<S: 'static> Drop for CoreThread<S> {
    fn drop(&mut self) {
        // Don't block in drop. Dropping the sender disconnects the channel,
        // so the loop still exits after draining.
        self.state.running.store(false, Ordering::Release);
        let _ = self.sender.try_send(CoreTask::Shutdown);
    }
}

static_assertions::assert_impl_all!(CoreThread<std::rc::Rc<()>>: Send, Sync);

fn core_loop<S>(receiver: Receiver<CoreTask<S>>, state: &CoreThreadState, context: &mut S) {
    while let Ok(task) = receiver.recv() {
        match task {
            CoreTask::Execute(command) => execute(command, state, context),
            CoreTask::Shutdown => {
                // Commands that raced the shutdown request still run.
                while let Ok(task) = receiver.try_recv() {
                    if let CoreTask::Execute(command) = task {
                        execute(command, state, context);
                    }
                }
                break;
            }
        }
    }
}

fn execute<S>(command: Command<S>, state: &CoreThreadState, context: &mut S) {
    command(context);
    state.pending.fetch_sub(1, Ordering::AcqRel);
    state.executed.fetch_add(1, Ordering::AcqRel);
}
