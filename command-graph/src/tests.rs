#![cfg(test)]

use crate::{
    command::{CommandKind, DispatchParams, KernelArg},
    device::{Device, DeviceCapabilities, Queue},
    executor::{Executor, Submission},
    sync::ExecutionError,
    Id, Kernel, MemoryObject,
};
use foldhash::HashMap;
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Creates a device with the given capabilities, whose submissions are parked in a
/// [`ManualExecutor`].
pub(crate) fn test_device(capabilities: DeviceCapabilities) -> Arc<Device> {
    manual_queue(capabilities).1.device().clone()
}

/// Creates a device with the given capabilities and one queue of it. Submissions are parked until
/// the test completes them.
pub(crate) fn manual_queue(capabilities: DeviceCapabilities) -> (Arc<ManualExecutor>, Arc<Queue>) {
    init_tracing();

    let executor = Arc::new(ManualExecutor::default());
    let device = Device::new(capabilities, executor.clone());

    (executor, Queue::new(&device, Default::default()))
}

/// Creates a device with the given capabilities and one queue of it. Submissions are executed
/// immediately against host memory.
pub(crate) fn host_queue(capabilities: DeviceCapabilities) -> (Arc<HostExecutor>, Arc<Queue>) {
    init_tracing();

    let executor = Arc::new(HostExecutor::default());
    let device = Device::new(capabilities, executor.clone());

    (executor, Queue::new(&device, Default::default()))
}

/// Keeps submissions in FIFO order until the test takes them out.
#[derive(Default)]
pub(crate) struct ManualExecutor {
    submissions: Mutex<VecDeque<Submission>>,
}

impl ManualExecutor {
    pub(crate) fn pop(&self) -> Option<Submission> {
        self.submissions.lock().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.submissions.lock().len()
    }
}

impl Executor for ManualExecutor {
    fn submit(&self, submission: Submission) {
        self.submissions.lock().push_back(submission);
    }
}

type HostMemory = HashMap<Id<MemoryObject>, Vec<u8>>;

type HostKernel = fn(&DispatchParams, &mut HostMemory) -> Result<(), ExecutionError>;

/// Executes submissions synchronously, inside `submit`, over byte vectors.
///
/// Commands are run one dependency level at a time. Within a level, the command recorded last
/// runs first, so that tests notice when they rely on an order that no dependency guarantees.
#[derive(Default)]
pub(crate) struct HostExecutor {
    memory: Mutex<HostMemory>,
    kernels: Mutex<HashMap<Id<Kernel>, HostKernel>>,
    execution_order: Mutex<Vec<usize>>,
}

impl HostExecutor {
    pub(crate) fn allocate(&self, size: usize) -> Id<MemoryObject> {
        let id = Id::new();
        self.memory.lock().insert(id, vec![0; size]);

        id
    }

    pub(crate) fn read(&self, id: Id<MemoryObject>) -> Vec<u8> {
        self.memory.lock()[&id].clone()
    }

    /// Registers a kernel that copies the bytes covered by the first work dimension from the
    /// memory object bound to argument 0 into the one bound to argument 1.
    pub(crate) fn copy_kernel(&self) -> Id<Kernel> {
        let id = Id::new();
        self.kernels.lock().insert(id, copy_kernel);

        id
    }

    /// Returns the order in which the commands of the last submission ran.
    pub(crate) fn execution_order(&self) -> Vec<usize> {
        self.execution_order.lock().clone()
    }

    fn execute(&self, submission: &Submission) -> Result<(), ExecutionError> {
        let graph = submission.graph();
        let mut memory = self.memory.lock();
        let mut order = Vec::with_capacity(graph.len());

        for level in graph.dependency_levels() {
            for &id in level.iter().rev() {
                let record = &graph.commands()[id.index()];

                match record.kind() {
                    CommandKind::Dispatch(_) => {
                        let params = submission
                            .dispatch(id)
                            .ok_or_else(|| device_error("missing dispatch parameters"))?;
                        let kernel = *self
                            .kernels
                            .lock()
                            .get(&params.kernel)
                            .ok_or_else(|| device_error("unknown kernel"))?;
                        kernel(params, &mut memory)?;
                    }
                    CommandKind::FillBuffer(info) => {
                        let offset = info.offset as usize;
                        let range = offset..offset + info.size as usize;
                        let bytes = memory
                            .get_mut(&info.dst)
                            .and_then(|bytes| bytes.get_mut(range))
                            .ok_or_else(|| device_error("fill out of bounds"))?;

                        for (i, byte) in bytes.iter_mut().enumerate() {
                            *byte = info.pattern[i % info.pattern.len()];
                        }
                    }
                    CommandKind::CopyBuffer(info) => {
                        let size = info.size as usize;
                        let src_offset = info.src_offset as usize;
                        let dst_offset = info.dst_offset as usize;
                        copy_bytes(
                            &mut memory,
                            (info.src, src_offset..src_offset + size),
                            (info.dst, dst_offset..dst_offset + size),
                        )?;
                    }
                    CommandKind::Barrier => {}
                    _ => return Err(device_error("command not supported on the host")),
                }

                order.push(id.index());
            }
        }

        *self.execution_order.lock() = order;

        Ok(())
    }
}

impl Executor for HostExecutor {
    fn submit(&self, submission: Submission) {
        let result = submission
            .wait_for_dependencies()
            .and_then(|()| self.execute(&submission));
        submission.complete(result);
    }
}

fn copy_kernel(params: &DispatchParams, memory: &mut HostMemory) -> Result<(), ExecutionError> {
    let (Some(&KernelArg::Memory(src)), Some(&KernelArg::Memory(dst))) =
        (params.arguments.get(&0), params.arguments.get(&1))
    else {
        return Err(device_error("the copy kernel takes two memory objects"));
    };

    let offset = params.global_offset.first().copied().unwrap_or(0) as usize;
    let range = offset..offset + params.global_size[0] as usize;

    copy_bytes(memory, (src, range.clone()), (dst, range))
}

fn copy_bytes(
    memory: &mut HostMemory,
    (src, src_range): (Id<MemoryObject>, std::ops::Range<usize>),
    (dst, dst_range): (Id<MemoryObject>, std::ops::Range<usize>),
) -> Result<(), ExecutionError> {
    let data = memory
        .get(&src)
        .and_then(|bytes| bytes.get(src_range))
        .ok_or_else(|| device_error("copy source out of bounds"))?
        .to_vec();
    memory
        .get_mut(&dst)
        .and_then(|bytes| bytes.get_mut(dst_range))
        .ok_or_else(|| device_error("copy destination out of bounds"))?
        .copy_from_slice(&data);

    Ok(())
}

fn device_error(message: &'static str) -> ExecutionError {
    ExecutionError::Device(message.into())
}
