//! Dispatches whose parameters can be changed after the command buffer is finalized.
//!
//! A dispatch recorded with [`MutableDispatchInfo`] gets a [`MutableCommand`] handle. The handle
//! fixes, at record time, which fields may later be updated. Updates are applied with
//! [`MutableCommand::update`] or, for several commands at once, [`update_mutable_commands`].
//!
//! The current parameters of all mutable dispatches of a command buffer live in one table behind
//! a reader-writer lock. Every enqueue takes a snapshot of the table under the read lock, and every
//! batch of updates is validated and then applied under the write lock. An enqueue therefore
//! observes either none or all of a batch, and never a partially written parameter set.

use crate::{
    command::{CommandId, CommandKind, CommandType, DispatchParams, KernelArg, WorkSize},
    command_buffer::{CommandBuffer, CommandBufferError, Result},
    device::Queue,
    linear_map::LinearMap,
    macros::flags,
    Id, Kernel, NonExhaustive,
};
use foldhash::HashMap;
use std::{
    fmt,
    num::NonZeroU64,
    sync::{Arc, Weak},
};

flags! {
    /// The fields of a dispatch that can be updated after finalization.
    MutableDispatchFields = u32;

    /// The kernel that is dispatched.
    KERNEL = 1 << 0,

    /// The values bound to kernel arguments.
    ARGUMENTS = 1 << 1,

    /// The global work offset.
    GLOBAL_OFFSET = 1 << 2,

    /// The global work size.
    GLOBAL_SIZE = 1 << 3,

    /// The local work size.
    LOCAL_SIZE = 1 << 4,
}

flags! {
    /// Promises about future updates of mutable dispatches, which a device may use to optimize
    /// the command buffer.
    MutableDispatchAsserts = u32;

    /// No update will increase the number of work groups in any dimension beyond the number the
    /// dispatch was recorded with.
    NO_ADDITIONAL_WORK_GROUPS = 1 << 0,
}

/// Requests a [`MutableCommand`] handle when recording a dispatch.
#[derive(Clone, Debug)]
pub struct MutableDispatchInfo {
    /// The fields that may be updated. Must be supported by the device.
    ///
    /// The default value is empty.
    pub updatable_fields: MutableDispatchFields,

    /// Assertions that apply to this dispatch, in addition to those of the command buffer.
    ///
    /// The default value is empty.
    pub asserts: MutableDispatchAsserts,

    pub _ne: NonExhaustive,
}

impl Default for MutableDispatchInfo {
    #[inline]
    fn default() -> Self {
        MutableDispatchInfo {
            updatable_fields: MutableDispatchFields::empty(),
            asserts: MutableDispatchAsserts::empty(),
            _ne: crate::NE,
        }
    }
}

impl MutableDispatchInfo {
    /// Returns a `MutableDispatchInfo` with the given updatable fields and no assertions.
    #[inline]
    pub fn fields(updatable_fields: MutableDispatchFields) -> Self {
        MutableDispatchInfo {
            updatable_fields,
            ..Default::default()
        }
    }
}

/// New values for some of the fields of a mutable dispatch. Fields left as `None` (or empty, for
/// `arguments`) keep their current value.
#[derive(Clone, Debug)]
pub struct DispatchUpdate {
    pub kernel: Option<Id<Kernel>>,

    /// Arguments to bind. These are merged into the current bindings: arguments that are not
    /// named here keep their current value.
    pub arguments: LinearMap<u32, KernelArg>,

    /// The number of entries must match the number of work dimensions of the dispatch.
    pub global_offset: Option<WorkSize>,

    /// The number of entries must match the number of work dimensions of the dispatch.
    pub global_size: Option<WorkSize>,

    /// The number of entries must match the number of work dimensions of the dispatch.
    pub local_size: Option<WorkSize>,

    pub _ne: NonExhaustive,
}

impl Default for DispatchUpdate {
    #[inline]
    fn default() -> Self {
        DispatchUpdate {
            kernel: None,
            arguments: LinearMap::new(),
            global_offset: None,
            global_size: None,
            local_size: None,
            _ne: crate::NE,
        }
    }
}

impl DispatchUpdate {
    /// Returns the set of fields this update changes.
    pub fn fields(&self) -> MutableDispatchFields {
        let mut fields = MutableDispatchFields::empty();

        if self.kernel.is_some() {
            fields |= MutableDispatchFields::KERNEL;
        }

        if !self.arguments.is_empty() {
            fields |= MutableDispatchFields::ARGUMENTS;
        }

        if self.global_offset.is_some() {
            fields |= MutableDispatchFields::GLOBAL_OFFSET;
        }

        if self.global_size.is_some() {
            fields |= MutableDispatchFields::GLOBAL_SIZE;
        }

        if self.local_size.is_some() {
            fields |= MutableDispatchFields::LOCAL_SIZE;
        }

        fields
    }

    fn apply_to(&self, params: &mut DispatchParams) {
        if let Some(kernel) = self.kernel {
            params.kernel = kernel;
        }

        params.arguments.extend(
            self.arguments
                .iter()
                .map(|(&index, value)| (index, value.clone())),
        );

        if let Some(global_offset) = &self.global_offset {
            params.global_offset = global_offset.clone();
        }

        if let Some(global_size) = &self.global_size {
            params.global_size = global_size.clone();
        }

        if let Some(local_size) = &self.local_size {
            params.local_size = Some(local_size.clone());
        }
    }
}

/// A handle to a dispatch whose parameters can be updated after its command buffer is finalized.
///
/// The handle does not keep the command buffer alive. Once the command buffer is destroyed, every
/// operation on the handle fails with [`CommandBufferError::StaleHandle`].
#[derive(Clone)]
pub struct MutableCommand {
    command_buffer: Weak<CommandBuffer>,
    buffer_id: NonZeroU64,
    command: CommandId,
    slot: u32,
    updatable_fields: MutableDispatchFields,
    asserts: MutableDispatchAsserts,
}

impl MutableCommand {
    pub(crate) fn new(
        command_buffer: Weak<CommandBuffer>,
        buffer_id: NonZeroU64,
        command: CommandId,
        slot: u32,
        updatable_fields: MutableDispatchFields,
        asserts: MutableDispatchAsserts,
    ) -> Self {
        MutableCommand {
            command_buffer,
            buffer_id,
            command,
            slot,
            updatable_fields,
            asserts,
        }
    }

    /// Returns the command buffer the command was recorded into.
    pub fn command_buffer(&self) -> Result<Arc<CommandBuffer>> {
        self.command_buffer
            .upgrade()
            .ok_or(CommandBufferError::StaleHandle)
    }

    /// Returns the ID of the command within its command buffer.
    #[inline]
    pub fn command(&self) -> CommandId {
        self.command
    }

    /// Returns the fields that can be updated.
    #[inline]
    pub fn updatable_fields(&self) -> MutableDispatchFields {
        self.updatable_fields
    }

    /// Returns the assertions that apply to the command, including those of the command buffer.
    #[inline]
    pub fn asserts(&self) -> MutableDispatchAsserts {
        self.asserts
    }

    /// Returns the current parameters of the dispatch.
    pub fn params(&self) -> Result<DispatchParams> {
        let command_buffer = self.command_buffer()?;
        let params = command_buffer
            .dispatch_table()
            .read()
            .get(self.slot as usize)
            .cloned()
            .ok_or(CommandBufferError::StaleHandle)?;

        Ok(params)
    }

    /// Applies `update` to the dispatch. The update is visible to every enqueue issued after this
    /// returns, and to none issued before it was called.
    #[inline]
    pub fn update(&self, update: &DispatchUpdate) -> Result {
        update_mutable_commands(&[(self, update)])
    }

    /// Queries information about the command.
    pub fn info(&self, query: MutableCommandInfoQuery) -> Result<MutableCommandInfo> {
        let info = match query {
            MutableCommandInfoQuery::CommandBuffer => {
                MutableCommandInfo::CommandBuffer(self.command_buffer()?)
            }
            MutableCommandInfoQuery::Queue => {
                let command_buffer = self.command_buffer()?;
                let queue = command_buffer
                    .command_queue(self.command)
                    .ok_or(CommandBufferError::StaleHandle)?;

                MutableCommandInfo::Queue(queue)
            }
            MutableCommandInfoQuery::CommandType => {
                self.command_buffer()?;

                MutableCommandInfo::CommandType(CommandType::Dispatch)
            }
            MutableCommandInfoQuery::UpdatableFields => {
                self.command_buffer()?;

                MutableCommandInfo::UpdatableFields(self.updatable_fields)
            }
            MutableCommandInfoQuery::Asserts => {
                self.command_buffer()?;

                MutableCommandInfo::Asserts(self.asserts)
            }
            MutableCommandInfoQuery::Kernel => MutableCommandInfo::Kernel(self.params()?.kernel),
            MutableCommandInfoQuery::Dimensions => {
                MutableCommandInfo::Dimensions(self.params()?.dimensions())
            }
            MutableCommandInfoQuery::GlobalOffset => {
                MutableCommandInfo::GlobalOffset(self.params()?.global_offset)
            }
            MutableCommandInfoQuery::GlobalSize => {
                MutableCommandInfo::GlobalSize(self.params()?.global_size)
            }
            MutableCommandInfoQuery::LocalSize => {
                MutableCommandInfo::LocalSize(self.params()?.local_size)
            }
            MutableCommandInfoQuery::Arguments => {
                MutableCommandInfo::Arguments(self.params()?.arguments)
            }
        };

        Ok(info)
    }
}

impl fmt::Debug for MutableCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutableCommand")
            .field("command_buffer", &self.buffer_id)
            .field("command", &self.command)
            .field("updatable_fields", &self.updatable_fields)
            .field("asserts", &self.asserts)
            .finish()
    }
}

impl PartialEq for MutableCommand {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.buffer_id == other.buffer_id && self.command == other.command
    }
}

impl Eq for MutableCommand {}

/// Applies several updates atomically as a set.
///
/// All handles must belong to the same command buffer, which must be finalized. Every update is
/// validated before any is applied; if one fails, none take effect. A handle may appear more than
/// once, in which case its updates are applied in order.
pub fn update_mutable_commands(updates: &[(&MutableCommand, &DispatchUpdate)]) -> Result {
    let Some(&(first, _)) = updates.first() else {
        return Ok(());
    };

    if updates
        .iter()
        .any(|(handle, _)| handle.buffer_id != first.buffer_id)
    {
        return Err(CommandBufferError::InvalidValue {
            problem: "the updated commands belong to different command buffers",
        });
    }

    let command_buffer = first.command_buffer()?;

    let Some(graph) = command_buffer.graph() else {
        return Err(CommandBufferError::InvalidState {
            problem: "mutable commands can only be updated after the command buffer is finalized",
        });
    };

    let buffer_asserts = command_buffer.mutable_dispatch_asserts();
    let mut table = command_buffer.dispatch_table().write();
    let mut staged: HashMap<u32, DispatchParams> = HashMap::default();

    for &(handle, update) in updates {
        let fields = update.fields();
        let not_updatable = fields - handle.updatable_fields;

        if !not_updatable.is_empty() {
            return Err(CommandBufferError::FieldNotUpdatable {
                command: handle.command,
                fields: not_updatable,
            });
        }

        let Some(current) = table.get(handle.slot as usize) else {
            return Err(CommandBufferError::StaleHandle);
        };
        let params = staged
            .entry(handle.slot)
            .or_insert_with(|| current.clone());
        let dimensions = params.global_size.len();

        update.apply_to(params);

        if params.global_size.len() != dimensions
            || params
                .local_size
                .as_ref()
                .is_some_and(|local_size| local_size.len() != dimensions)
        {
            return Err(CommandBufferError::InvalidValue {
                problem: "an update cannot change the number of work dimensions",
            });
        }

        params
            .validate()
            .map_err(|problem| CommandBufferError::InvalidValue { problem })?;

        if (handle.asserts | buffer_asserts)
            .contains(MutableDispatchAsserts::NO_ADDITIONAL_WORK_GROUPS)
        {
            let Some(CommandKind::Dispatch(recorded)) =
                graph.command(handle.command).map(|record| &record.kind)
            else {
                return Err(CommandBufferError::StaleHandle);
            };

            let exceeds = params
                .work_group_count()
                .iter()
                .zip(&recorded.work_group_count())
                .any(|(new, old)| new > old);

            if exceeds {
                return Err(CommandBufferError::NoAdditionalWorkGroups {
                    command: handle.command,
                });
            }
        }
    }

    for (slot, params) in staged {
        tracing::trace!(
            buffer = command_buffer.id().get(),
            slot,
            params = ?params,
            "updated mutable dispatch"
        );
        table[slot as usize] = params;
    }

    Ok(())
}

/// The kinds of information that can be queried from a [`MutableCommand`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutableCommandInfoQuery {
    CommandBuffer,
    Queue,
    CommandType,
    UpdatableFields,
    Asserts,
    Kernel,
    Dimensions,
    GlobalOffset,
    GlobalSize,
    LocalSize,
    Arguments,
}

/// The answer to a [`MutableCommandInfoQuery`].
#[derive(Clone, Debug)]
pub enum MutableCommandInfo {
    CommandBuffer(Arc<CommandBuffer>),
    Queue(Arc<Queue>),
    CommandType(CommandType),
    UpdatableFields(MutableDispatchFields),
    Asserts(MutableDispatchAsserts),
    Kernel(Id<Kernel>),
    Dimensions(u32),
    GlobalOffset(WorkSize),
    GlobalSize(WorkSize),
    LocalSize(Option<WorkSize>),
    Arguments(LinearMap<u32, KernelArg>),
}
