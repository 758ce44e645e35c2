//! Recording, finalization and replay of reusable device command graphs.
//!
//! # Brief summary
//!
//! - A [`Device`](crate::device::Device) describes what the hardware is able to do through its
//!   [`DeviceCapabilities`](crate::device::DeviceCapabilities), and owns the
//!   [`Executor`](crate::executor::Executor) that actually runs submitted work. Work is submitted
//!   to the [`Queue`](crate::device::Queue)s of a device.
//!
//! - A [`CommandBuffer`](crate::command_buffer::CommandBuffer) is created for one or more queues
//!   and starts out *recording*. Commands (dispatches, copies, fills and barriers) are appended
//!   to it one at a time. Every recorded command produces a
//!   [`SyncPoint`](crate::sync::SyncPoint), and later commands can wait on earlier sync points.
//!   Because a command can only wait on sync points that already exist, the dependency graph is
//!   acyclic by construction.
//!
//! - Once everything is recorded, the command buffer is *finalized*. This validates the
//!   dependency graph a final time and freezes it. A finalized command buffer can be enqueued any
//!   number of times, optionally concurrently if it was created with
//!   [`SIMULTANEOUS_USE`](crate::command_buffer::CommandBufferFlags::SIMULTANEOUS_USE). Every
//!   enqueue returns a [`CompletionSignal`](crate::sync::CompletionSignal) that resolves when the
//!   executor is done with it.
//!
//! - Dispatches recorded with a [`MutableCommand`](crate::mutable::MutableCommand) handle can
//!   have some of their parameters changed after finalization. An update only affects enqueues
//!   issued after it returns.
//!
//! Kernels, memory objects and images are owned outside of this crate. Commands refer to them by
//! [`Id`], and nothing here ever looks inside them.

use std::{
    cmp, fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    num::NonZeroU64,
    sync::atomic::{AtomicU64, Ordering},
};

pub use crate::{
    command::{CommandId, CommandKind, CommandType, DispatchParams, KernelArg},
    command_buffer::{
        CommandBuffer, CommandBufferCreateInfo, CommandBufferError, CommandBufferFlags,
        CommandBufferState, RecordInfo, Recorded,
    },
    device::{Device, DeviceCapabilities, Queue, QueueCreateInfo, QueueFlags},
    executor::{Executor, Submission},
    linear_map::LinearMap,
    mutable::{DispatchUpdate, MutableCommand, MutableDispatchFields},
    sync::{CompletionSignal, ExecutionError, SyncPoint, UserSignal},
};

mod macros;

pub mod command;
pub mod command_buffer;
pub mod device;
pub mod executor;
pub mod graph;
mod linear_map;
pub mod mutable;
pub mod sync;
#[cfg(test)]
mod tests;

/// Identifies an object that is owned outside of this crate, such as a kernel or a memory
/// object.
///
/// The type parameter denotes the type of object being referred to. IDs are only ever compared
/// for identity.
#[repr(transparent)]
pub struct Id<T> {
    raw: NonZeroU64,
    marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    /// Returns a new ID that is unique within the process.
    #[must_use]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let raw = NonZeroU64::new(COUNTER.fetch_add(1, Ordering::Relaxed)).unwrap_or_else(|| {
            eprintln!("an ID counter has overflown ...somehow");
            std::process::abort();
        });

        Self::from_raw(raw)
    }

    /// Returns an ID wrapping a value that identifies the object to its owner, for example a
    /// native handle.
    #[inline]
    pub const fn from_raw(raw: NonZeroU64) -> Self {
        Id {
            raw,
            marker: PhantomData,
        }
    }

    /// Returns the raw value of the ID.
    #[inline]
    pub const fn as_raw(self) -> NonZeroU64 {
        self.raw
    }
}

impl<T> Default for Id<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Id<T> {}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Id").field(&self.raw).finish()
    }
}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Id<T> {}

impl<T> Hash for Id<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> PartialOrd for Id<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.raw.cmp(&other.raw)
    }
}

/// Marker for [`Id`]s of kernels.
pub enum Kernel {}

/// Marker for [`Id`]s of memory objects.
pub enum MemoryObject {}

/// Marker for [`Id`]s of images.
pub enum Image {}

/// A helper type for non-exhaustive structs.
///
/// This type cannot be constructed outside this crate. Structures with a field of this type can
/// only be constructed by calling a constructor function or `Default::default()`. The effect is
/// similar to the standard Rust `#[non_exhaustive]` attribute, except that it does not prevent
/// update syntax from being used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NonExhaustive(pub(crate) ());

pub(crate) const NE: NonExhaustive = NonExhaustive(());
