//! Command buffers: recording, finalization and enqueue.
//!
//! A [`CommandBuffer`] goes through two phases. While *recording*, commands are appended with
//! [`CommandBuffer::record`] or one of the `record_*` shorthands. [`CommandBuffer::finalize`]
//! then validates the dependency graph and freezes it. From then on the structure of the command
//! buffer never changes, and [`CommandBuffer::enqueue`] may be called any number of times.
//!
//! Without [`CommandBufferFlags::SIMULTANEOUS_USE`], at most one enqueue may be in flight at a
//! time. With it, enqueues are independent of each other unless the caller orders them through
//! wait lists.
//!
//! # Examples
//!
//! ```
//! use command_graph::{
//!     command::{DispatchParams, FillBufferInfo},
//!     CommandBuffer, CommandBufferCreateInfo, Id,
//! };
//! # use command_graph::{Device, Executor, Queue, Submission};
//! # use std::sync::Arc;
//! # struct Immediate;
//! # impl Executor for Immediate {
//! #     fn submit(&self, submission: Submission) { submission.complete(Ok(())); }
//! # }
//! # let device = Device::new(Default::default(), Arc::new(Immediate));
//! # let queue = Queue::new(&device, Default::default());
//!
//! let command_buffer = CommandBuffer::new(CommandBufferCreateInfo::queue(queue))?;
//! let buffer = Id::new();
//!
//! let fill = command_buffer.record_fill(
//!     FillBufferInfo {
//!         dst: buffer,
//!         pattern: [0u8; 4].into_iter().collect(),
//!         offset: 0,
//!         size: 1024,
//!     },
//!     &[],
//! )?;
//! command_buffer.record_dispatch(DispatchParams::new(Id::new(), [256]), &[fill.sync_point], None)?;
//! command_buffer.finalize()?;
//!
//! let signal = command_buffer.enqueue(None, &[])?;
//! signal.wait(None).unwrap();
//! # Ok::<_, command_graph::CommandBufferError>(())
//! ```

use crate::{
    command::{CommandId, CommandKind, CommandRecord, DispatchParams},
    device::{CommandBufferCapabilities, Device, Queue, QueueFlags},
    executor::Submission,
    graph::{CommandGraph, GraphProblem},
    macros::{flags, impl_id_counter},
    mutable::{MutableCommand, MutableDispatchAsserts, MutableDispatchFields, MutableDispatchInfo},
    sync::{CompletionSignal, SyncPoint},
    NonExhaustive,
};
use foldhash::HashSet;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use std::{
    error::Error,
    fmt,
    num::NonZeroU64,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, OnceLock,
    },
};

/// Shorthand for the results of command buffer operations.
pub type Result<T = (), E = CommandBufferError> = ::std::result::Result<T, E>;

flags! {
    /// Properties of a command buffer, fixed when it is created.
    CommandBufferFlags = u32;

    /// The command buffer may be pending execution more than once at the same time.
    SIMULTANEOUS_USE = 1 << 0,

    /// Dispatches may be recorded with a [`MutableCommand`] handle.
    MUTABLE = 1 << 1,

    /// Commands may execute in any order consistent with their sync points. Without this flag
    /// every command also waits on the command recorded before it.
    OUT_OF_ORDER = 1 << 2,
}

/// Parameters to create a new [`CommandBuffer`].
#[derive(Clone, Debug)]
pub struct CommandBufferCreateInfo {
    /// The queues the command buffer is recorded against. Must not be empty, must not contain
    /// the same queue twice, and all queues must belong to the same device. More than one queue
    /// requires [`CommandBufferCapabilities::MULTI_QUEUE`].
    ///
    /// The default value is empty, which must be overridden.
    pub queues: Vec<Arc<Queue>>,

    /// The properties of the command buffer.
    ///
    /// The default value is empty.
    pub flags: CommandBufferFlags,

    /// Assertions that apply to every mutable dispatch recorded into the command buffer. Requires
    /// [`CommandBufferFlags::MUTABLE`].
    ///
    /// The default value is empty.
    pub mutable_dispatch_asserts: MutableDispatchAsserts,

    pub _ne: NonExhaustive,
}

impl Default for CommandBufferCreateInfo {
    #[inline]
    fn default() -> Self {
        CommandBufferCreateInfo {
            queues: Vec::new(),
            flags: CommandBufferFlags::empty(),
            mutable_dispatch_asserts: MutableDispatchAsserts::empty(),
            _ne: crate::NE,
        }
    }
}

impl CommandBufferCreateInfo {
    /// Returns a `CommandBufferCreateInfo` with the specified single `queue`.
    #[inline]
    pub fn queue(queue: Arc<Queue>) -> Self {
        CommandBufferCreateInfo {
            queues: vec![queue],
            ..Default::default()
        }
    }
}

/// Parameters to record a command into a [`CommandBuffer`].
#[derive(Clone, Debug)]
pub struct RecordInfo {
    /// The command to record.
    pub kind: CommandKind,

    /// The queue the command executes on, which must be one of the queues of the command buffer.
    /// `None` means the first queue.
    ///
    /// The default value is `None`.
    pub queue: Option<Arc<Queue>>,

    /// The sync points the command waits on. Each must have been produced by a command that was
    /// already recorded into the same command buffer.
    ///
    /// The default value is empty.
    pub waits: Vec<SyncPoint>,

    /// If `Some`, the command must be a dispatch and a [`MutableCommand`] handle is returned for
    /// it. Requires [`CommandBufferFlags::MUTABLE`].
    ///
    /// The default value is `None`.
    pub mutable: Option<MutableDispatchInfo>,

    pub _ne: NonExhaustive,
}

impl RecordInfo {
    /// Returns a `RecordInfo` with the specified `kind`.
    #[inline]
    pub fn new(kind: impl Into<CommandKind>) -> Self {
        RecordInfo {
            kind: kind.into(),
            queue: None,
            waits: Vec::new(),
            mutable: None,
            _ne: crate::NE,
        }
    }
}

/// What recording a command produced.
#[derive(Clone, Debug)]
pub struct Recorded {
    /// The ID of the command within the command buffer.
    pub command: CommandId,

    /// The sync point later commands can wait on.
    pub sync_point: SyncPoint,

    /// The handle to update the command with, if one was requested.
    pub mutable: Option<MutableCommand>,
}

/// The lifecycle state of a [`CommandBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandBufferState {
    /// Commands can be recorded.
    Recording,

    /// The command buffer is finalized and no enqueue of it is in flight.
    Executable,

    /// The command buffer is finalized and at least one enqueue of it is in flight.
    Pending,
}

/// A recorded graph of device commands that can be enqueued many times.
pub struct CommandBuffer {
    id: NonZeroU64,
    device: Arc<Device>,
    queues: SmallVec<[Arc<Queue>; 2]>,
    flags: CommandBufferFlags,
    mutable_dispatch_asserts: MutableDispatchAsserts,

    // Holding this lock orders recording against finalization.
    recording: Mutex<Vec<CommandRecord>>,
    graph: OnceLock<Arc<CommandGraph>>,

    // Current parameters of the mutable dispatches, indexed by slot.
    dispatch_table: RwLock<Vec<DispatchParams>>,
    in_flight: AtomicU32,
}

impl CommandBuffer {
    /// Creates a new `CommandBuffer` in the recording state.
    pub fn new(create_info: CommandBufferCreateInfo) -> Result<Arc<CommandBuffer>> {
        Self::validate_new(&create_info)?;

        let CommandBufferCreateInfo {
            queues,
            flags,
            mutable_dispatch_asserts,
            _ne: _,
        } = create_info;

        let Some(device) = queues.first().map(|queue| queue.device().clone()) else {
            return Err(CommandBufferError::InvalidValue {
                problem: "`queues` is empty",
            });
        };

        let command_buffer = CommandBuffer {
            id: Self::next_id(),
            device,
            queues: queues.into_iter().collect(),
            flags,
            mutable_dispatch_asserts,
            recording: Mutex::new(Vec::new()),
            graph: OnceLock::new(),
            dispatch_table: RwLock::new(Vec::new()),
            in_flight: AtomicU32::new(0),
        };

        tracing::debug!(
            buffer = command_buffer.id.get(),
            queues = command_buffer.queues.len(),
            flags = ?command_buffer.flags,
            "created command buffer"
        );

        Ok(Arc::new(command_buffer))
    }

    fn validate_new(create_info: &CommandBufferCreateInfo) -> Result {
        let &CommandBufferCreateInfo {
            ref queues,
            flags,
            mutable_dispatch_asserts,
            _ne: _,
        } = create_info;

        let Some(first_queue) = queues.first() else {
            return Err(CommandBufferError::InvalidValue {
                problem: "`queues` is empty",
            });
        };

        let device = first_queue.device();
        let capabilities = device.capabilities();
        let mut seen = HashSet::default();

        for (queue_index, queue) in queues.iter().enumerate() {
            if queue.device() != device {
                return Err(CommandBufferError::InvalidValue {
                    problem: "the queues do not all belong to the same device",
                });
            }

            if !seen.insert(queue.id()) {
                return Err(CommandBufferError::InvalidValue {
                    problem: "`queues` contains the same queue more than once",
                });
            }

            let unsupported = queue.unsupported_flags();

            if !unsupported.is_empty() {
                return Err(CommandBufferError::UnsupportedProperties(
                    Unsupported::QueueFlags {
                        queue_index,
                        flags: unsupported,
                    },
                ));
            }
        }

        if queues.len() > 1
            && !capabilities
                .command_buffer
                .contains(CommandBufferCapabilities::MULTI_QUEUE)
        {
            return Err(CommandBufferError::UnsupportedProperties(
                Unsupported::MultiQueue,
            ));
        }

        let mut unsupported = CommandBufferFlags::empty();

        if !capabilities
            .command_buffer
            .contains(CommandBufferCapabilities::SIMULTANEOUS_USE)
        {
            unsupported |= CommandBufferFlags::SIMULTANEOUS_USE;
        }

        if !capabilities
            .command_buffer
            .contains(CommandBufferCapabilities::OUT_OF_ORDER)
        {
            unsupported |= CommandBufferFlags::OUT_OF_ORDER;
        }

        if capabilities.mutable_dispatch.is_empty() {
            unsupported |= CommandBufferFlags::MUTABLE;
        }

        if flags.intersects(unsupported) {
            return Err(CommandBufferError::UnsupportedProperties(
                Unsupported::Flags(flags & unsupported),
            ));
        }

        if !mutable_dispatch_asserts.is_empty() {
            if !flags.contains(CommandBufferFlags::MUTABLE) {
                return Err(CommandBufferError::MutationNotEnabled);
            }

            let unsupported = mutable_dispatch_asserts - capabilities.mutable_dispatch_asserts;

            if !unsupported.is_empty() {
                return Err(CommandBufferError::UnsupportedProperties(
                    Unsupported::MutableAsserts(unsupported),
                ));
            }
        }

        Ok(())
    }

    /// Returns the device the command buffer belongs to.
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Returns the queues the command buffer was created with.
    #[inline]
    pub fn queues(&self) -> &[Arc<Queue>] {
        &self.queues
    }

    /// Returns the flags the command buffer was created with.
    #[inline]
    pub fn flags(&self) -> CommandBufferFlags {
        self.flags
    }

    /// Returns the assertions that apply to every mutable dispatch of the command buffer.
    #[inline]
    pub fn mutable_dispatch_asserts(&self) -> MutableDispatchAsserts {
        self.mutable_dispatch_asserts
    }

    /// Returns the frozen graph, or `None` if the command buffer is not finalized yet.
    #[inline]
    pub fn graph(&self) -> Option<&Arc<CommandGraph>> {
        self.graph.get()
    }

    pub(crate) fn dispatch_table(&self) -> &RwLock<Vec<DispatchParams>> {
        &self.dispatch_table
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> CommandBufferState {
        if self.graph.get().is_none() {
            CommandBufferState::Recording
        } else if self.in_flight.load(Ordering::Acquire) != 0 {
            CommandBufferState::Pending
        } else {
            CommandBufferState::Executable
        }
    }

    /// Returns the number of recorded commands.
    pub fn command_count(&self) -> usize {
        let commands = self.recording.lock();

        match self.graph.get() {
            Some(graph) => graph.len(),
            None => commands.len(),
        }
    }

    /// Returns the number of handles to the command buffer, including those held by in-flight
    /// submissions.
    #[inline]
    pub fn reference_count(self: &Arc<Self>) -> usize {
        Arc::strong_count(self)
    }

    /// Returns the queue that `command` executes on.
    pub(crate) fn command_queue(&self, command: CommandId) -> Option<Arc<Queue>> {
        let commands = self.recording.lock();
        let queue_index = match self.graph.get() {
            Some(graph) => graph.command(command)?.queue_index(),
            None => commands.get(command.index())?.queue_index(),
        };

        self.queues.get(queue_index).cloned()
    }

    /// Records a command.
    ///
    /// Fails with [`CommandBufferError::InvalidSyncPoint`] if a sync point in `waits` was not
    /// produced by a command already recorded into this command buffer, and with
    /// [`CommandBufferError::MutationNotEnabled`] if a mutable handle is requested from a command
    /// buffer without [`CommandBufferFlags::MUTABLE`]. A failed call records nothing.
    pub fn record(self: &Arc<Self>, record_info: RecordInfo) -> Result<Recorded> {
        let RecordInfo {
            kind,
            queue,
            waits,
            mutable,
            _ne: _,
        } = record_info;

        let mut commands = self.recording.lock();

        if self.graph.get().is_some() {
            return Err(CommandBufferError::InvalidState {
                problem: "commands cannot be recorded after the command buffer is finalized",
            });
        }

        kind.validate()
            .map_err(|problem| CommandBufferError::InvalidValue { problem })?;

        let queue_index = match &queue {
            Some(queue) => self
                .queues
                .iter()
                .position(|q| q == queue)
                .ok_or(CommandBufferError::QueueMismatch { queue_index: None })?,
            None => 0,
        };

        let index = commands.len();

        for &sync_point in &waits {
            if sync_point.buffer() != self.id || sync_point.index() >= index {
                return Err(CommandBufferError::InvalidSyncPoint { sync_point });
            }
        }

        let mut waits: SmallVec<[SyncPoint; 4]> = waits.into_iter().collect();
        waits.sort_unstable();
        waits.dedup();

        let command = CommandId::new(index);
        let sync_point = SyncPoint::new(self.id, index);
        let mut mutable_slot = None;
        let mut handle = None;

        if let Some(mutable) = mutable {
            let (slot, asserts) = self.record_mutable(&kind, &mutable)?;
            mutable_slot = Some(slot);
            handle = Some(MutableCommand::new(
                Arc::downgrade(self),
                self.id,
                command,
                slot,
                mutable.updatable_fields,
                asserts,
            ));
        }

        tracing::trace!(
            buffer = self.id.get(),
            command = index,
            kind = ?kind.command_type(),
            waits = waits.len(),
            mutable = mutable_slot.is_some(),
            "recorded command"
        );

        commands.push(CommandRecord {
            kind,
            queue_index: queue_index as u32,
            waits,
            sync_point,
            mutable_slot,
        });

        Ok(Recorded {
            command,
            sync_point,
            mutable: handle,
        })
    }

    /// Validates a request for a mutable handle and reserves a slot in the dispatch table.
    /// Returns the slot and the effective assertions.
    fn record_mutable(
        &self,
        kind: &CommandKind,
        mutable: &MutableDispatchInfo,
    ) -> Result<(u32, MutableDispatchAsserts)> {
        let &MutableDispatchInfo {
            updatable_fields,
            asserts,
            _ne: _,
        } = mutable;

        if !self.flags.contains(CommandBufferFlags::MUTABLE) {
            return Err(CommandBufferError::MutationNotEnabled);
        }

        let CommandKind::Dispatch(params) = kind else {
            return Err(CommandBufferError::InvalidValue {
                problem: "only dispatches can be recorded with a mutable handle",
            });
        };

        let capabilities = self.device.capabilities();
        let unsupported_fields = updatable_fields - capabilities.mutable_dispatch;

        if !unsupported_fields.is_empty() {
            return Err(CommandBufferError::UnsupportedProperties(
                Unsupported::MutableFields(unsupported_fields),
            ));
        }

        let unsupported_asserts = asserts - capabilities.mutable_dispatch_asserts;

        if !unsupported_asserts.is_empty() {
            return Err(CommandBufferError::UnsupportedProperties(
                Unsupported::MutableAsserts(unsupported_asserts),
            ));
        }

        let mut table = self.dispatch_table.write();
        let slot = table.len() as u32;
        table.push(params.clone());

        Ok((slot, asserts | self.mutable_dispatch_asserts))
    }

    /// Records a dispatch. See [`record`](Self::record).
    #[inline]
    pub fn record_dispatch(
        self: &Arc<Self>,
        params: DispatchParams,
        waits: &[SyncPoint],
        mutable: Option<MutableDispatchInfo>,
    ) -> Result<Recorded> {
        self.record(RecordInfo {
            waits: waits.to_vec(),
            mutable,
            ..RecordInfo::new(params)
        })
    }

    /// Records a copy. See [`record`](Self::record).
    pub fn record_copy(
        self: &Arc<Self>,
        copy: impl Into<CommandKind>,
        waits: &[SyncPoint],
    ) -> Result<Recorded> {
        let kind = copy.into();

        if !kind.command_type().is_copy() {
            return Err(CommandBufferError::InvalidValue {
                problem: "`record_copy` was given a command that is not a copy",
            });
        }

        self.record(RecordInfo {
            waits: waits.to_vec(),
            ..RecordInfo::new(kind)
        })
    }

    /// Records a fill. See [`record`](Self::record).
    pub fn record_fill(
        self: &Arc<Self>,
        fill: impl Into<CommandKind>,
        waits: &[SyncPoint],
    ) -> Result<Recorded> {
        let kind = fill.into();

        if !kind.command_type().is_fill() {
            return Err(CommandBufferError::InvalidValue {
                problem: "`record_fill` was given a command that is not a fill",
            });
        }

        self.record(RecordInfo {
            waits: waits.to_vec(),
            ..RecordInfo::new(kind)
        })
    }

    /// Records a barrier that waits on `waits`. See [`record`](Self::record).
    #[inline]
    pub fn record_barrier(self: &Arc<Self>, waits: &[SyncPoint]) -> Result<Recorded> {
        self.record(RecordInfo {
            waits: waits.to_vec(),
            ..RecordInfo::new(CommandKind::Barrier)
        })
    }

    /// Validates the dependency graph and freezes the command buffer.
    ///
    /// On failure the command buffer stays in the recording state, so that more commands can be
    /// recorded and finalization retried. Finalizing twice is an error.
    pub fn finalize(&self) -> Result {
        let mut commands = self.recording.lock();

        if self.graph.get().is_some() {
            return Err(CommandBufferError::EmptyOrInvalidGraph(
                GraphProblem::AlreadyFinalized,
            ));
        }

        let graph = CommandGraph::new(
            self.id,
            &mut commands,
            self.flags.contains(CommandBufferFlags::OUT_OF_ORDER),
            self.queues.len(),
        )
        .map_err(CommandBufferError::EmptyOrInvalidGraph)?;

        tracing::debug!(
            buffer = self.id.get(),
            commands = graph.len(),
            "finalized command buffer"
        );

        // Cannot fail: the lock is held and the cell was checked to be empty.
        let _ = self.graph.set(Arc::new(graph));

        Ok(())
    }

    /// Hands the command buffer to the executor of its device and returns the signal that
    /// resolves when execution finishes.
    ///
    /// `queues` optionally replaces the queues of the command buffer for this enqueue only. It
    /// must have the same length, and each queue must be compatible with the one it replaces.
    /// Execution does not begin before every signal in `wait_list` has resolved.
    ///
    /// The call never blocks on the device. Without [`CommandBufferFlags::SIMULTANEOUS_USE`] it
    /// fails with [`CommandBufferError::BufferBusy`] while a previous enqueue is in flight.
    pub fn enqueue(
        self: &Arc<Self>,
        queues: Option<&[Arc<Queue>]>,
        wait_list: &[CompletionSignal],
    ) -> Result<CompletionSignal> {
        let Some(graph) = self.graph.get() else {
            return Err(CommandBufferError::InvalidState {
                problem: "the command buffer must be finalized before it can be enqueued",
            });
        };

        let queues = match queues {
            Some(queues) => {
                self.validate_queue_substitution(queues)?;

                queues.iter().cloned().collect()
            }
            None => self.queues.clone(),
        };

        self.acquire_in_flight()?;

        let dispatches = self.dispatch_table.read().clone();
        let signal = CompletionSignal::pending();
        let submission = Submission::new(
            self.clone(),
            graph.clone(),
            dispatches,
            queues,
            wait_list,
            signal.clone(),
        );

        tracing::debug!(
            buffer = self.id.get(),
            in_flight = self.in_flight.load(Ordering::Relaxed),
            wait_list = wait_list.len(),
            "enqueued command buffer"
        );

        self.device.executor().submit(submission);

        Ok(signal)
    }

    fn validate_queue_substitution(&self, queues: &[Arc<Queue>]) -> Result {
        if queues.len() != self.queues.len() {
            return Err(CommandBufferError::QueueMismatch { queue_index: None });
        }

        for (queue_index, (recorded, replacement)) in self.queues.iter().zip(queues).enumerate() {
            if !recorded.is_compatible_with(replacement) {
                return Err(CommandBufferError::QueueMismatch {
                    queue_index: Some(queue_index),
                });
            }
        }

        Ok(())
    }

    fn acquire_in_flight(&self) -> Result {
        if self.flags.contains(CommandBufferFlags::SIMULTANEOUS_USE) {
            self.in_flight.fetch_add(1, Ordering::AcqRel);

            Ok(())
        } else {
            self.in_flight
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                .map(|_| ())
                .map_err(|_| CommandBufferError::BufferBusy)
        }
    }

    pub(crate) fn release_in_flight(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Queries information about the command buffer.
    pub fn info(self: &Arc<Self>, query: CommandBufferInfoQuery) -> CommandBufferInfo {
        match query {
            CommandBufferInfoQuery::Queues => CommandBufferInfo::Queues(self.queues.to_vec()),
            CommandBufferInfoQuery::NumQueues => CommandBufferInfo::NumQueues(self.queues.len()),
            CommandBufferInfoQuery::ReferenceCount => {
                CommandBufferInfo::ReferenceCount(self.reference_count())
            }
            CommandBufferInfoQuery::State => CommandBufferInfo::State(self.state()),
            CommandBufferInfoQuery::Flags => CommandBufferInfo::Flags(self.flags),
            CommandBufferInfoQuery::CommandCount => {
                CommandBufferInfo::CommandCount(self.command_count())
            }
        }
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        tracing::trace!(buffer = self.id.get(), "destroyed command buffer");
    }
}

impl fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("id", &self.id)
            .field("queues", &self.queues)
            .field("flags", &self.flags)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl_id_counter!(CommandBuffer);

/// The kinds of information that can be queried from a [`CommandBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandBufferInfoQuery {
    Queues,
    NumQueues,
    ReferenceCount,
    State,
    Flags,
    CommandCount,
}

/// The answer to a [`CommandBufferInfoQuery`].
#[derive(Clone, Debug)]
pub enum CommandBufferInfo {
    Queues(Vec<Arc<Queue>>),
    NumQueues(usize),
    ReferenceCount(usize),
    State(CommandBufferState),
    Flags(CommandBufferFlags),
    CommandCount(usize),
}

/// Error that can happen when creating, recording, finalizing, enqueuing or updating a command
/// buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandBufferError {
    /// A requested property is not supported by the device.
    UnsupportedProperties(Unsupported),

    /// A sync point was not produced by an earlier command of this command buffer.
    InvalidSyncPoint { sync_point: SyncPoint },

    /// A mutable handle or mutable assertions were requested, but the command buffer was not
    /// created with [`CommandBufferFlags::MUTABLE`].
    MutationNotEnabled,

    /// The command buffer could not be finalized.
    EmptyOrInvalidGraph(GraphProblem),

    /// The command buffer does not allow simultaneous use and an enqueue of it is still in
    /// flight.
    BufferBusy,

    /// A queue does not match the queues of the command buffer. `queue_index` is the index of
    /// the offending queue in a replacement list, if that is where it came from.
    QueueMismatch { queue_index: Option<usize> },

    /// An update changes fields that the handle does not allow to be updated.
    FieldNotUpdatable {
        command: CommandId,
        fields: MutableDispatchFields,
    },

    /// The command buffer of a mutable handle no longer exists.
    StaleHandle,

    /// The operation is not allowed in the current state of the command buffer.
    InvalidState { problem: &'static str },

    /// A parameter has an invalid value.
    InvalidValue { problem: &'static str },

    /// An update would increase the number of work groups of a dispatch recorded under
    /// [`MutableDispatchAsserts::NO_ADDITIONAL_WORK_GROUPS`].
    NoAdditionalWorkGroups { command: CommandId },
}

impl fmt::Display for CommandBufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedProperties(unsupported) => {
                write!(f, "the device does not support {unsupported}")
            }
            Self::InvalidSyncPoint { sync_point } => write!(
                f,
                "sync point {} was not produced by an earlier command of this command buffer",
                sync_point.value(),
            ),
            Self::MutationNotEnabled => {
                f.write_str("the command buffer was not created with mutable dispatch enabled")
            }
            Self::EmptyOrInvalidGraph(_) => f.write_str("the command buffer could not be finalized"),
            Self::BufferBusy => f.write_str(
                "the command buffer is already in flight and does not allow simultaneous use",
            ),
            Self::QueueMismatch {
                queue_index: Some(queue_index),
            } => write!(
                f,
                "the queue at index {queue_index} is not compatible with the recorded queue",
            ),
            Self::QueueMismatch { queue_index: None } => {
                f.write_str("the queues do not match the queues of the command buffer")
            }
            Self::FieldNotUpdatable { command, fields } => write!(
                f,
                "the fields {fields:?} of command {} are not updatable",
                command.index(),
            ),
            Self::StaleHandle => f.write_str("the command buffer of the handle no longer exists"),
            Self::InvalidState { problem } | Self::InvalidValue { problem } => f.write_str(problem),
            Self::NoAdditionalWorkGroups { command } => write!(
                f,
                "the update would increase the number of work groups of command {}",
                command.index(),
            ),
        }
    }
}

impl Error for CommandBufferError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::EmptyOrInvalidGraph(problem) => Some(problem),
            _ => None,
        }
    }
}

/// A property that the device does not support.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unsupported {
    /// Command buffer flags.
    Flags(CommandBufferFlags),

    /// More than one queue.
    MultiQueue,

    /// Flags of the queue at `queue_index`.
    QueueFlags {
        queue_index: usize,
        flags: QueueFlags,
    },

    /// Updatable fields of mutable dispatches.
    MutableFields(MutableDispatchFields),

    /// Mutable dispatch assertions.
    MutableAsserts(MutableDispatchAsserts),
}

impl fmt::Display for Unsupported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flags(flags) => write!(f, "the command buffer flags {flags:?}"),
            Self::MultiQueue => f.write_str("command buffers with more than one queue"),
            Self::QueueFlags { queue_index, flags } => {
                write!(f, "the flags {flags:?} of the queue at index {queue_index}")
            }
            Self::MutableFields(fields) => write!(f, "updating the dispatch fields {fields:?}"),
            Self::MutableAsserts(asserts) => {
                write!(f, "the mutable dispatch assertions {asserts:?}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command::{CopyBufferInfo, FillBufferInfo, KernelArg},
        device::{DeviceCapabilities, QueueCreateInfo},
        mutable::DispatchUpdate,
        sync::{ExecutionError, SignalStatus, UserSignal},
        tests::{host_queue, manual_queue, test_device},
        Id, MemoryObject,
    };
    use smallvec::smallvec;
    use std::sync::Weak;

    fn capabilities(command_buffer: CommandBufferCapabilities) -> DeviceCapabilities {
        DeviceCapabilities {
            command_buffer,
            ..Default::default()
        }
    }

    fn fill(dst: Id<MemoryObject>, value: u8, size: u64) -> FillBufferInfo {
        FillBufferInfo {
            dst,
            pattern: smallvec![value],
            offset: 0,
            size,
        }
    }

    #[test]
    fn create_validation() {
        let (_, queue) = manual_queue(Default::default());

        assert!(matches!(
            CommandBuffer::new(Default::default()),
            Err(CommandBufferError::InvalidValue { .. }),
        ));
        assert!(matches!(
            CommandBuffer::new(CommandBufferCreateInfo {
                queues: vec![queue.clone(), queue.clone()],
                ..Default::default()
            }),
            Err(CommandBufferError::InvalidValue { .. }),
        ));
        assert_eq!(
            CommandBuffer::new(CommandBufferCreateInfo {
                flags: CommandBufferFlags::SIMULTANEOUS_USE | CommandBufferFlags::MUTABLE,
                ..CommandBufferCreateInfo::queue(queue.clone())
            })
            .unwrap_err(),
            CommandBufferError::UnsupportedProperties(Unsupported::Flags(
                CommandBufferFlags::SIMULTANEOUS_USE | CommandBufferFlags::MUTABLE,
            )),
        );
        assert_eq!(
            CommandBuffer::new(CommandBufferCreateInfo {
                mutable_dispatch_asserts: MutableDispatchAsserts::NO_ADDITIONAL_WORK_GROUPS,
                ..CommandBufferCreateInfo::queue(queue)
            })
            .unwrap_err(),
            CommandBufferError::MutationNotEnabled,
        );
    }

    #[test]
    fn create_multi_queue() {
        let device = test_device(Default::default());
        let queues = vec![
            Queue::new(&device, Default::default()),
            Queue::new(&device, Default::default()),
        ];

        assert_eq!(
            CommandBuffer::new(CommandBufferCreateInfo {
                queues: queues.clone(),
                ..Default::default()
            })
            .unwrap_err(),
            CommandBufferError::UnsupportedProperties(Unsupported::MultiQueue),
        );

        let device = test_device(capabilities(CommandBufferCapabilities::MULTI_QUEUE));
        let other_device = test_device(capabilities(CommandBufferCapabilities::MULTI_QUEUE));
        let command_buffer = CommandBuffer::new(CommandBufferCreateInfo {
            queues: vec![
                Queue::new(&device, Default::default()),
                Queue::new(&device, Default::default()),
            ],
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(
            command_buffer.info(CommandBufferInfoQuery::NumQueues),
            CommandBufferInfo::NumQueues(2),
        ));

        assert!(matches!(
            CommandBuffer::new(CommandBufferCreateInfo {
                queues: vec![
                    Queue::new(&device, Default::default()),
                    Queue::new(&other_device, Default::default()),
                ],
                ..Default::default()
            }),
            Err(CommandBufferError::InvalidValue { .. }),
        ));
    }

    #[test]
    fn create_unsupported_queue() {
        let device = test_device(Default::default());
        let queue = Queue::new(
            &device,
            QueueCreateInfo {
                flags: QueueFlags::OUT_OF_ORDER_EXEC,
                ..Default::default()
            },
        );

        assert_eq!(
            CommandBuffer::new(CommandBufferCreateInfo::queue(queue)).unwrap_err(),
            CommandBufferError::UnsupportedProperties(Unsupported::QueueFlags {
                queue_index: 0,
                flags: QueueFlags::OUT_OF_ORDER_EXEC,
            }),
        );
    }

    #[test]
    fn no_forward_references() {
        let (_, queue) = manual_queue(Default::default());
        let command_buffer = CommandBuffer::new(CommandBufferCreateInfo::queue(queue)).unwrap();
        let first = command_buffer.record_barrier(&[]).unwrap();
        assert_eq!(first.sync_point.value(), 1);

        let future = SyncPoint::new(command_buffer.id(), 1);
        assert_eq!(
            command_buffer.record_barrier(&[future]).unwrap_err(),
            CommandBufferError::InvalidSyncPoint { sync_point: future },
        );

        let (_, other_queue) = manual_queue(Default::default());
        let other = CommandBuffer::new(CommandBufferCreateInfo::queue(other_queue)).unwrap();
        let foreign = other.record_barrier(&[]).unwrap().sync_point;
        assert_eq!(
            command_buffer.record_barrier(&[foreign]).unwrap_err(),
            CommandBufferError::InvalidSyncPoint {
                sync_point: foreign,
            },
        );

        // Failed calls record nothing.
        assert_eq!(command_buffer.command_count(), 1);

        let second = command_buffer.record_barrier(&[first.sync_point]).unwrap();
        assert_eq!(second.sync_point.value(), 2);
        assert_eq!(second.command.index(), 1);
    }

    #[test]
    fn record_validation() {
        let (_, queue) = manual_queue(Default::default());
        let command_buffer = CommandBuffer::new(CommandBufferCreateInfo::queue(queue)).unwrap();
        let a = Id::new();

        assert_eq!(
            command_buffer
                .record_dispatch(
                    DispatchParams::new(Id::new(), [16]),
                    &[],
                    Some(Default::default()),
                )
                .unwrap_err(),
            CommandBufferError::MutationNotEnabled,
        );
        assert!(matches!(
            command_buffer.record_fill(fill(a, 0, 0), &[]),
            Err(CommandBufferError::InvalidValue { .. }),
        ));
        assert!(matches!(
            command_buffer.record_copy(fill(a, 0, 4), &[]),
            Err(CommandBufferError::InvalidValue { .. }),
        ));
        assert!(matches!(
            command_buffer.record_copy(
                CopyBufferInfo {
                    src: a,
                    dst: a,
                    src_offset: 0,
                    dst_offset: u64::MAX,
                    size: 16,
                },
                &[],
            ),
            Err(CommandBufferError::InvalidValue { .. }),
        ));

        let (_, foreign) = manual_queue(Default::default());
        assert_eq!(
            command_buffer
                .record(RecordInfo {
                    queue: Some(foreign),
                    ..RecordInfo::new(CommandKind::Barrier)
                })
                .unwrap_err(),
            CommandBufferError::QueueMismatch { queue_index: None },
        );
        assert_eq!(command_buffer.command_count(), 0);
    }

    #[test]
    fn mutable_requires_dispatch_and_capability() {
        let (_, queue) = manual_queue(DeviceCapabilities {
            mutable_dispatch: MutableDispatchFields::ARGUMENTS,
            ..Default::default()
        });
        let command_buffer = CommandBuffer::new(CommandBufferCreateInfo {
            flags: CommandBufferFlags::MUTABLE,
            ..CommandBufferCreateInfo::queue(queue)
        })
        .unwrap();

        assert!(matches!(
            command_buffer.record(RecordInfo {
                mutable: Some(Default::default()),
                ..RecordInfo::new(CommandKind::Barrier)
            }),
            Err(CommandBufferError::InvalidValue { .. }),
        ));
        assert_eq!(
            command_buffer
                .record_dispatch(
                    DispatchParams::new(Id::new(), [16]),
                    &[],
                    Some(MutableDispatchInfo::fields(
                        MutableDispatchFields::ARGUMENTS | MutableDispatchFields::KERNEL,
                    )),
                )
                .unwrap_err(),
            CommandBufferError::UnsupportedProperties(Unsupported::MutableFields(
                MutableDispatchFields::KERNEL,
            )),
        );

        let recorded = command_buffer
            .record_dispatch(
                DispatchParams::new(Id::new(), [16]),
                &[],
                Some(MutableDispatchInfo::fields(MutableDispatchFields::ARGUMENTS)),
            )
            .unwrap();
        let handle = recorded.mutable.unwrap();
        assert_eq!(handle.command(), recorded.command);
        assert_eq!(handle.updatable_fields(), MutableDispatchFields::ARGUMENTS);
    }

    #[test]
    fn finalize_lifecycle() {
        let (_, queue) = manual_queue(Default::default());
        let command_buffer = CommandBuffer::new(CommandBufferCreateInfo::queue(queue)).unwrap();
        assert_eq!(command_buffer.state(), CommandBufferState::Recording);

        assert_eq!(
            command_buffer.finalize(),
            Err(CommandBufferError::EmptyOrInvalidGraph(GraphProblem::Empty)),
        );
        assert_eq!(command_buffer.state(), CommandBufferState::Recording);
        assert!(matches!(
            command_buffer.enqueue(None, &[]),
            Err(CommandBufferError::InvalidState { .. }),
        ));

        command_buffer.record_barrier(&[]).unwrap();
        command_buffer.finalize().unwrap();
        assert_eq!(command_buffer.state(), CommandBufferState::Executable);
        assert_eq!(command_buffer.command_count(), 1);

        assert_eq!(
            command_buffer.finalize(),
            Err(CommandBufferError::EmptyOrInvalidGraph(
                GraphProblem::AlreadyFinalized,
            )),
        );
        assert!(matches!(
            command_buffer.record_barrier(&[]),
            Err(CommandBufferError::InvalidState { .. }),
        ));
        assert_eq!(command_buffer.graph().unwrap().len(), 1);
    }

    #[test]
    fn busy_exclusivity() {
        let (executor, queue) = manual_queue(Default::default());
        let command_buffer = CommandBuffer::new(CommandBufferCreateInfo::queue(queue)).unwrap();
        command_buffer.record_barrier(&[]).unwrap();
        command_buffer.finalize().unwrap();

        let signal = command_buffer.enqueue(None, &[]).unwrap();
        assert_eq!(command_buffer.state(), CommandBufferState::Pending);
        assert_eq!(
            command_buffer.enqueue(None, &[]).unwrap_err(),
            CommandBufferError::BufferBusy,
        );
        assert_eq!(executor.len(), 1);

        executor.pop().unwrap().complete(Ok(()));
        assert_eq!(signal.status(), SignalStatus::Complete);
        assert_eq!(command_buffer.state(), CommandBufferState::Executable);

        command_buffer.enqueue(None, &[]).unwrap();
        assert_eq!(executor.len(), 1);
    }

    #[test]
    fn simultaneous_use() {
        let (executor, queue) =
            manual_queue(capabilities(CommandBufferCapabilities::SIMULTANEOUS_USE));
        let command_buffer = CommandBuffer::new(CommandBufferCreateInfo {
            flags: CommandBufferFlags::SIMULTANEOUS_USE,
            ..CommandBufferCreateInfo::queue(queue)
        })
        .unwrap();
        command_buffer.record_barrier(&[]).unwrap();
        command_buffer.finalize().unwrap();

        let first = command_buffer.enqueue(None, &[]).unwrap();
        let second = command_buffer.enqueue(None, &[first.clone()]).unwrap();
        assert_eq!(executor.len(), 2);

        let first_submission = executor.pop().unwrap();
        let second_submission = executor.pop().unwrap();
        assert!(second_submission.wait_list()[0].ptr_eq(&first));
        assert!(second_submission.signal().ptr_eq(&second));

        first_submission.complete(Ok(()));
        assert_eq!(command_buffer.state(), CommandBufferState::Pending);
        second_submission.complete(Err(ExecutionError::Device("lost".into())));
        assert_eq!(command_buffer.state(), CommandBufferState::Executable);
        assert_eq!(
            second.status(),
            SignalStatus::Failed(ExecutionError::Device("lost".into())),
        );
    }

    #[test]
    fn abandoned_submission() {
        let (executor, queue) = manual_queue(Default::default());
        let command_buffer = CommandBuffer::new(CommandBufferCreateInfo::queue(queue)).unwrap();
        command_buffer.record_barrier(&[]).unwrap();
        command_buffer.finalize().unwrap();

        let signal = command_buffer.enqueue(None, &[]).unwrap();
        drop(executor.pop());

        assert_eq!(
            signal.status(),
            SignalStatus::Failed(ExecutionError::Abandoned),
        );
        assert!(command_buffer.enqueue(None, &[]).is_ok());
    }

    #[test]
    fn release_while_in_flight() {
        let (executor, queue) = manual_queue(Default::default());
        let command_buffer = CommandBuffer::new(CommandBufferCreateInfo::queue(queue)).unwrap();
        command_buffer.record_barrier(&[]).unwrap();
        command_buffer.finalize().unwrap();
        assert_eq!(command_buffer.reference_count(), 1);

        let signal = command_buffer.enqueue(None, &[]).unwrap();
        assert!(matches!(
            command_buffer.info(CommandBufferInfoQuery::ReferenceCount),
            CommandBufferInfo::ReferenceCount(2),
        ));

        let weak: Weak<CommandBuffer> = Arc::downgrade(&command_buffer);
        drop(command_buffer);
        assert!(weak.upgrade().is_some());

        executor.pop().unwrap().complete(Ok(()));
        assert!(weak.upgrade().is_none());
        assert_eq!(signal.wait(None), Ok(()));
    }

    #[test]
    fn wait_list_is_forwarded() {
        let (executor, queue) = manual_queue(Default::default());
        let command_buffer = CommandBuffer::new(CommandBufferCreateInfo::queue(queue)).unwrap();
        command_buffer.record_barrier(&[]).unwrap();
        command_buffer.finalize().unwrap();

        let user = UserSignal::new();
        let signal = command_buffer.enqueue(None, &[user.signal()]).unwrap();
        let submission = executor.pop().unwrap();
        assert!(!signal.is_resolved());

        user.set_failed(ExecutionError::Abandoned);
        let result = submission.wait_for_dependencies();
        assert_eq!(result, Err(ExecutionError::DependencyFailed));
        submission.complete(result);

        assert_eq!(
            signal.status(),
            SignalStatus::Failed(ExecutionError::DependencyFailed),
        );
    }

    #[test]
    fn queue_substitution() {
        let (executor, queue) = manual_queue(Default::default());
        let device = queue.device().clone();
        let command_buffer =
            CommandBuffer::new(CommandBufferCreateInfo::queue(queue.clone())).unwrap();
        command_buffer.record_barrier(&[]).unwrap();
        command_buffer.finalize().unwrap();

        let compatible = Queue::new(&device, Default::default());
        let incompatible = Queue::new(
            &device,
            QueueCreateInfo {
                flags: QueueFlags::PROFILING,
                ..Default::default()
            },
        );

        assert_eq!(
            command_buffer
                .enqueue(Some(&[incompatible]), &[])
                .unwrap_err(),
            CommandBufferError::QueueMismatch {
                queue_index: Some(0),
            },
        );
        assert_eq!(
            command_buffer
                .enqueue(Some(&[compatible.clone(), queue]), &[])
                .unwrap_err(),
            CommandBufferError::QueueMismatch { queue_index: None },
        );
        assert_eq!(command_buffer.state(), CommandBufferState::Executable);

        command_buffer
            .enqueue(Some(&[compatible.clone()]), &[])
            .unwrap();
        let submission = executor.pop().unwrap();
        let record = &submission.graph().commands()[0];
        assert_eq!(submission.queue(record), &compatible);
        submission.complete(Ok(()));
    }

    #[test]
    fn info_queries() {
        let (_, queue) = manual_queue(Default::default());
        let command_buffer =
            CommandBuffer::new(CommandBufferCreateInfo::queue(queue.clone())).unwrap();
        command_buffer.record_barrier(&[]).unwrap();
        command_buffer.record_barrier(&[]).unwrap();

        assert!(matches!(
            command_buffer.info(CommandBufferInfoQuery::Queues),
            CommandBufferInfo::Queues(queues) if queues.len() == 1 && queues[0] == queue,
        ));
        assert!(matches!(
            command_buffer.info(CommandBufferInfoQuery::State),
            CommandBufferInfo::State(CommandBufferState::Recording),
        ));
        assert!(matches!(
            command_buffer.info(CommandBufferInfoQuery::Flags),
            CommandBufferInfo::Flags(flags) if flags.is_empty(),
        ));
        assert!(matches!(
            command_buffer.info(CommandBufferInfoQuery::CommandCount),
            CommandBufferInfo::CommandCount(2),
        ));
    }

    #[test]
    fn fill_dispatch_fill() {
        let (executor, queue) = host_queue(Default::default());
        let copy_kernel = executor.copy_kernel();
        let a = executor.allocate(16);
        let b = executor.allocate(16);

        let command_buffer = CommandBuffer::new(CommandBufferCreateInfo::queue(queue)).unwrap();
        let fill_a = command_buffer.record_fill(fill(a, 1, 16), &[]).unwrap();
        let params = DispatchParams::new(copy_kernel, [16])
            .arg(0, KernelArg::Memory(a))
            .arg(1, KernelArg::Memory(b));
        let copy = command_buffer
            .record_dispatch(params, &[fill_a.sync_point], None)
            .unwrap();
        command_buffer
            .record_fill(fill(a, 2, 16), &[copy.sync_point])
            .unwrap();
        command_buffer.finalize().unwrap();

        let signal = command_buffer.enqueue(None, &[]).unwrap();
        assert_eq!(signal.wait(None), Ok(()));

        assert_eq!(executor.read(b), [1; 16]);
        assert_eq!(executor.read(a), [2; 16]);
        assert_eq!(executor.execution_order(), [0, 1, 2]);
    }

    #[test]
    fn in_order_fallback() {
        let (executor, queue) = host_queue(capabilities(CommandBufferCapabilities::OUT_OF_ORDER));
        let a = executor.allocate(4);
        let b = executor.allocate(4);

        let record = |flags| {
            let command_buffer = CommandBuffer::new(CommandBufferCreateInfo {
                flags,
                ..CommandBufferCreateInfo::queue(queue.clone())
            })
            .unwrap();
            let first = command_buffer.record_fill(fill(a, 1, 4), &[]).unwrap();
            command_buffer
                .record_fill(fill(b, 2, 4), &[first.sync_point])
                .unwrap();
            command_buffer
                .record_copy(
                    CopyBufferInfo {
                        src: a,
                        dst: b,
                        src_offset: 0,
                        dst_offset: 0,
                        size: 4,
                    },
                    &[first.sync_point],
                )
                .unwrap();
            command_buffer.finalize().unwrap();

            command_buffer
        };

        // The host executor runs independent commands latest-recorded first, so only the
        // implicit chain keeps the copy after the second fill.
        let in_order = record(CommandBufferFlags::empty());
        in_order.enqueue(None, &[]).unwrap().wait(None).unwrap();
        assert_eq!(executor.execution_order(), [0, 1, 2]);
        assert_eq!(executor.read(b), [1; 4]);

        let out_of_order = record(CommandBufferFlags::OUT_OF_ORDER);
        out_of_order.enqueue(None, &[]).unwrap().wait(None).unwrap();
        assert_eq!(executor.execution_order(), [0, 2, 1]);
        assert_eq!(executor.read(b), [2; 4]);
    }

    #[test]
    fn concurrent_enqueue_and_update() {
        let (executor, queue) = host_queue(DeviceCapabilities {
            command_buffer: CommandBufferCapabilities::SIMULTANEOUS_USE,
            mutable_dispatch: MutableDispatchFields::ARGUMENTS,
            ..Default::default()
        });
        let copy_kernel = executor.copy_kernel();
        let src = executor.allocate(8);
        let dst = executor.allocate(8);
        let command_buffer = CommandBuffer::new(CommandBufferCreateInfo {
            flags: CommandBufferFlags::SIMULTANEOUS_USE | CommandBufferFlags::MUTABLE,
            ..CommandBufferCreateInfo::queue(queue)
        })
        .unwrap();
        let fill_src = command_buffer.record_fill(fill(src, 7, 8), &[]).unwrap();
        let handle = command_buffer
            .record_dispatch(
                DispatchParams::new(copy_kernel, [8])
                    .arg(0, KernelArg::Memory(src))
                    .arg(1, KernelArg::Memory(dst)),
                &[fill_src.sync_point],
                Some(MutableDispatchInfo::fields(MutableDispatchFields::ARGUMENTS)),
            )
            .unwrap()
            .mutable
            .unwrap();
        command_buffer.finalize().unwrap();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..16 {
                        command_buffer.enqueue(None, &[]).unwrap().wait(None).unwrap();
                    }
                });
            }

            scope.spawn(|| {
                for _ in 0..16 {
                    let mut update = DispatchUpdate::default();
                    update.arguments.insert(1, KernelArg::Memory(dst));
                    handle.update(&update).unwrap();
                }
            });
        });

        assert_eq!(command_buffer.state(), CommandBufferState::Executable);
        assert_eq!(command_buffer.reference_count(), 1);
        assert_eq!(executor.read(dst), [7; 8]);
    }
}
