//! Devices and queues, as far as command buffers need to know about them.
//!
//! A [`Device`] is described entirely by its [`DeviceCapabilities`] and the [`Executor`] that runs
//! work submitted to it. Capabilities are fixed when the device is created; a command buffer reads
//! them once, when it is created, and never again.
//!
//! A [`Queue`] belongs to exactly one device and carries [`QueueFlags`] describing how it was
//! created. Two queues are interchangeable for the purposes of command buffer submission when
//! they belong to the same device and have the same flags.

use crate::{
    executor::Executor,
    macros::{flags, impl_id_counter},
    mutable::{MutableDispatchAsserts, MutableDispatchFields},
    NonExhaustive,
};
use std::{fmt, num::NonZeroU64, sync::Arc};

flags! {
    /// Optional command buffer features that a device may support.
    CommandBufferCapabilities = u32;

    /// A finalized command buffer may be pending execution more than once at the same time.
    SIMULTANEOUS_USE = 1 << 0,

    /// Commands in a command buffer may execute in any order consistent with their sync points.
    OUT_OF_ORDER = 1 << 1,

    /// A command buffer may be recorded against more than one queue.
    MULTI_QUEUE = 1 << 2,
}

flags! {
    /// Properties a queue was created with.
    QueueFlags = u32;

    /// The queue may execute its commands out of order.
    OUT_OF_ORDER_EXEC = 1 << 0,

    /// The queue records timing information for submitted work.
    PROFILING = 1 << 1,
}

/// The capabilities of a [`Device`].
#[derive(Clone, Debug)]
pub struct DeviceCapabilities {
    /// Optional command buffer features the device supports.
    ///
    /// The default value is empty.
    pub command_buffer: CommandBufferCapabilities,

    /// The dispatch fields the device is able to update after a command buffer is finalized.
    /// An empty set means the device does not support mutable dispatch at all.
    ///
    /// The default value is empty.
    pub mutable_dispatch: MutableDispatchFields,

    /// The mutable dispatch assertions the device accepts.
    ///
    /// The default value is empty.
    pub mutable_dispatch_asserts: MutableDispatchAsserts,

    /// Queue flags that a queue may carry and still be used with command buffers.
    ///
    /// The default value is [`QueueFlags::PROFILING`].
    pub supported_queue_flags: QueueFlags,

    /// Queue flags that every queue used with command buffers must carry.
    ///
    /// The default value is empty.
    pub required_queue_flags: QueueFlags,

    pub _ne: NonExhaustive,
}

impl Default for DeviceCapabilities {
    #[inline]
    fn default() -> Self {
        DeviceCapabilities {
            command_buffer: CommandBufferCapabilities::empty(),
            mutable_dispatch: MutableDispatchFields::empty(),
            mutable_dispatch_asserts: MutableDispatchAsserts::empty(),
            supported_queue_flags: QueueFlags::PROFILING,
            required_queue_flags: QueueFlags::empty(),
            _ne: crate::NE,
        }
    }
}

/// A device that command buffers can be submitted to.
pub struct Device {
    id: NonZeroU64,
    capabilities: DeviceCapabilities,
    executor: Arc<dyn Executor>,
}

impl Device {
    /// Creates a new `Device` with the given capabilities, whose work is carried out by
    /// `executor`.
    #[must_use]
    pub fn new(capabilities: DeviceCapabilities, executor: Arc<dyn Executor>) -> Arc<Device> {
        let device = Device {
            id: Self::next_id(),
            capabilities,
            executor,
        };

        tracing::debug!(
            device = device.id.get(),
            capabilities = ?device.capabilities,
            "created device"
        );

        Arc::new(device)
    }

    /// Returns the capabilities the device was created with.
    #[inline]
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Returns the executor of the device.
    #[inline]
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl_id_counter!(Device);

/// Parameters to create a new [`Queue`].
#[derive(Clone, Debug)]
pub struct QueueCreateInfo {
    /// The properties of the queue.
    ///
    /// The default value is empty.
    pub flags: QueueFlags,

    pub _ne: NonExhaustive,
}

impl Default for QueueCreateInfo {
    #[inline]
    fn default() -> Self {
        QueueCreateInfo {
            flags: QueueFlags::empty(),
            _ne: crate::NE,
        }
    }
}

/// A queue of a [`Device`] that command buffers can target.
#[derive(Debug)]
pub struct Queue {
    id: NonZeroU64,
    device: Arc<Device>,
    flags: QueueFlags,
}

impl Queue {
    /// Creates a new `Queue` on `device`.
    #[must_use]
    pub fn new(device: &Arc<Device>, create_info: QueueCreateInfo) -> Arc<Queue> {
        let QueueCreateInfo { flags, _ne: _ } = create_info;

        Arc::new(Queue {
            id: Self::next_id(),
            device: device.clone(),
            flags,
        })
    }

    /// Returns the device the queue belongs to.
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Returns the flags the queue was created with.
    #[inline]
    pub fn flags(&self) -> QueueFlags {
        self.flags
    }

    /// Returns whether `other` may stand in for `self` when submitting a command buffer that was
    /// recorded against `self`.
    #[inline]
    pub fn is_compatible_with(&self, other: &Queue) -> bool {
        self.device == other.device && self.flags == other.flags
    }

    /// Returns the queue flags that prevent this queue from being used with command buffers, or
    /// an empty set if there are none.
    pub(crate) fn unsupported_flags(&self) -> QueueFlags {
        let capabilities = self.device.capabilities();
        let mut supported = capabilities.supported_queue_flags;

        if capabilities
            .command_buffer
            .contains(CommandBufferCapabilities::OUT_OF_ORDER)
        {
            supported |= QueueFlags::OUT_OF_ORDER_EXEC;
        }

        let missing = capabilities.required_queue_flags - self.flags;

        (self.flags - supported) | missing
    }
}

impl_id_counter!(Queue);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{test_device, ManualExecutor};

    #[test]
    fn queue_compatibility() {
        let device = test_device(Default::default());
        let other_device = test_device(Default::default());

        let queue = Queue::new(&device, Default::default());
        let same = Queue::new(&device, Default::default());
        let profiling = Queue::new(
            &device,
            QueueCreateInfo {
                flags: QueueFlags::PROFILING,
                ..Default::default()
            },
        );
        let foreign = Queue::new(&other_device, Default::default());

        assert_ne!(queue, same);
        assert!(queue.is_compatible_with(&same));
        assert!(!queue.is_compatible_with(&profiling));
        assert!(!queue.is_compatible_with(&foreign));
    }

    #[test]
    fn out_of_order_queue_needs_capability() {
        let plain = test_device(Default::default());
        let capable = Device::new(
            DeviceCapabilities {
                command_buffer: CommandBufferCapabilities::OUT_OF_ORDER,
                ..Default::default()
            },
            Arc::new(ManualExecutor::default()),
        );
        let create_info = || QueueCreateInfo {
            flags: QueueFlags::OUT_OF_ORDER_EXEC,
            ..Default::default()
        };

        assert_eq!(
            Queue::new(&plain, create_info()).unsupported_flags(),
            QueueFlags::OUT_OF_ORDER_EXEC,
        );
        assert!(Queue::new(&capable, create_info())
            .unsupported_flags()
            .is_empty());
    }

    #[test]
    fn required_queue_flags() {
        let device = test_device(DeviceCapabilities {
            required_queue_flags: QueueFlags::PROFILING,
            ..Default::default()
        });

        assert_eq!(
            Queue::new(&device, Default::default()).unsupported_flags(),
            QueueFlags::PROFILING,
        );
    }
}
