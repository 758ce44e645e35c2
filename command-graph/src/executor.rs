//! The boundary between command buffers and whatever actually runs their commands.
//!
//! Enqueuing a command buffer hands a [`Submission`] to the [`Executor`] of the device. The
//! submission carries everything the executor needs: the frozen [`CommandGraph`], a snapshot of
//! the current parameters of every mutable dispatch, the queues to run on and the signals to wait
//! on first. The executor reports the outcome through [`Submission::complete`].
//!
//! Until the submission is completed (or dropped) it counts as in flight, and it keeps the
//! command buffer alive.

use crate::{
    command::{CommandId, CommandKind, CommandRecord, DispatchParams},
    command_buffer::CommandBuffer,
    device::Queue,
    graph::CommandGraph,
    sync::{CompletionSignal, ExecutionError, WaitError},
};
use smallvec::SmallVec;
use std::{fmt, sync::Arc};

/// Runs the commands of submitted command buffers.
///
/// `submit` is called synchronously from [`CommandBuffer::enqueue`] and should return quickly;
/// the actual work is expected to happen asynchronously. The executor must respect the
/// dependencies of the graph, and must not start a submission before every signal in its wait
/// list has resolved.
pub trait Executor: Send + Sync {
    /// Takes ownership of `submission`.
    fn submit(&self, submission: Submission);
}

/// One enqueue of a command buffer, as handed to an [`Executor`].
pub struct Submission {
    command_buffer: Arc<CommandBuffer>,
    graph: Arc<CommandGraph>,
    dispatches: Vec<DispatchParams>,
    queues: SmallVec<[Arc<Queue>; 2]>,
    wait_list: SmallVec<[CompletionSignal; 4]>,
    signal: CompletionSignal,
    finished: bool,
}

impl Submission {
    pub(crate) fn new(
        command_buffer: Arc<CommandBuffer>,
        graph: Arc<CommandGraph>,
        dispatches: Vec<DispatchParams>,
        queues: SmallVec<[Arc<Queue>; 2]>,
        wait_list: &[CompletionSignal],
        signal: CompletionSignal,
    ) -> Self {
        Submission {
            command_buffer,
            graph,
            dispatches,
            queues,
            wait_list: wait_list.iter().cloned().collect(),
            signal,
            finished: false,
        }
    }

    /// Returns the command buffer that was enqueued.
    #[inline]
    pub fn command_buffer(&self) -> &Arc<CommandBuffer> {
        &self.command_buffer
    }

    /// Returns the frozen graph of the command buffer.
    #[inline]
    pub fn graph(&self) -> &CommandGraph {
        &self.graph
    }

    /// Returns the queues to execute on. These are either the queues the command buffer was
    /// created with, or the compatible replacements passed to `enqueue`.
    #[inline]
    pub fn queues(&self) -> &[Arc<Queue>] {
        &self.queues
    }

    /// Returns the queue that `command` should execute on.
    #[inline]
    pub fn queue(&self, command: &CommandRecord) -> &Arc<Queue> {
        // Queue indices are checked when the graph is frozen, and replacement lists must have the
        // same length.
        &self.queues[command.queue_index()]
    }

    /// Returns the signals that must resolve before any command of this submission may begin.
    #[inline]
    pub fn wait_list(&self) -> &[CompletionSignal] {
        &self.wait_list
    }

    /// Returns the parameters that the dispatch `command` must use in this submission.
    ///
    /// For mutable dispatches these are the parameters that were current when the command buffer
    /// was enqueued, which may differ from [`CommandRecord::kind`]. Returns `None` if `command` is
    /// not a dispatch.
    pub fn dispatch(&self, command: CommandId) -> Option<&DispatchParams> {
        let record = self.graph.command(command)?;

        match (&record.kind, record.mutable_slot) {
            (CommandKind::Dispatch(_), Some(slot)) => self.dispatches.get(slot as usize),
            (CommandKind::Dispatch(params), None) => Some(params),
            _ => None,
        }
    }

    /// Blocks until every signal in the wait list has resolved.
    ///
    /// Returns [`ExecutionError::DependencyFailed`] if any of them failed, in which case the
    /// submission should be completed with that error without running anything.
    pub fn wait_for_dependencies(&self) -> Result<(), ExecutionError> {
        match CompletionSignal::wait_all(&self.wait_list, None) {
            Ok(()) => Ok(()),
            Err(WaitError::Failed(_) | WaitError::Timeout) => Err(ExecutionError::DependencyFailed),
        }
    }

    /// Returns the signal that resolves when the submission is completed.
    #[inline]
    pub fn signal(&self) -> &CompletionSignal {
        &self.signal
    }

    /// Reports the outcome of the submission. The command buffer is no longer in flight for this
    /// submission by the time the signal resolves.
    #[inline]
    pub fn complete(mut self, result: Result<(), ExecutionError>) {
        self.finish(result);
    }

    fn finish(&mut self, result: Result<(), ExecutionError>) {
        if self.finished {
            return;
        }

        self.finished = true;
        self.command_buffer.release_in_flight();

        if let Err(err) = &result {
            tracing::debug!(
                buffer = self.command_buffer.id().get(),
                error = %err,
                "submission failed"
            );
        }

        self.signal.resolve(result);
    }
}

impl Drop for Submission {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                buffer = self.command_buffer.id().get(),
                "submission dropped without being completed"
            );
            self.finish(Err(ExecutionError::Abandoned));
        }
    }
}

impl fmt::Debug for Submission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submission")
            .field("command_buffer", &self.command_buffer.id())
            .field("commands", &self.graph.len())
            .field("queues", &self.queues.len())
            .field("wait_list", &self.wait_list)
            .field("signal", &self.signal)
            .finish_non_exhaustive()
    }
}
