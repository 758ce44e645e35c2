//! The commands that can be recorded into a command buffer.
//!
//! Each variant of [`CommandKind`] owns only what is needed to issue the operation again on every
//! enqueue. Memory objects, images and kernels are referred to by [`Id`]; they are owned
//! elsewhere and this crate never looks inside them.

use crate::{linear_map::LinearMap, sync::SyncPoint, Id, Image, Kernel, MemoryObject};
use smallvec::SmallVec;

/// Per-dimension work sizes or offsets of a dispatch. The length equals the number of work
/// dimensions.
pub type WorkSize = SmallVec<[u64; 3]>;

/// Identifies a command within the command buffer it was recorded into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId {
    index: u32,
}

impl CommandId {
    pub(crate) const fn new(index: usize) -> Self {
        CommandId {
            index: index as u32,
        }
    }

    /// Returns the position of the command in recording order.
    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }
}

/// A device operation, with all the parameters needed to issue it.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandKind {
    Dispatch(DispatchParams),
    CopyBuffer(CopyBufferInfo),
    CopyBufferRect(CopyBufferRectInfo),
    CopyImage(CopyImageInfo),
    CopyBufferToImage(CopyBufferToImageInfo),
    CopyImageToBuffer(CopyImageToBufferInfo),
    FillBuffer(FillBufferInfo),
    FillImage(FillImageInfo),

    /// Waits on its sync points and does nothing else. Useful for joining several dependency
    /// chains into one sync point.
    Barrier,
}

impl CommandKind {
    /// Returns the type of the command.
    #[inline]
    pub fn command_type(&self) -> CommandType {
        match self {
            Self::Dispatch(_) => CommandType::Dispatch,
            Self::CopyBuffer(_) => CommandType::CopyBuffer,
            Self::CopyBufferRect(_) => CommandType::CopyBufferRect,
            Self::CopyImage(_) => CommandType::CopyImage,
            Self::CopyBufferToImage(_) => CommandType::CopyBufferToImage,
            Self::CopyImageToBuffer(_) => CommandType::CopyImageToBuffer,
            Self::FillBuffer(_) => CommandType::FillBuffer,
            Self::FillImage(_) => CommandType::FillImage,
            Self::Barrier => CommandType::Barrier,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), &'static str> {
        match self {
            Self::Dispatch(params) => params.validate(),
            Self::CopyBuffer(info) => info.validate(),
            Self::CopyBufferRect(info) => info.validate(),
            Self::CopyImage(info) => info.validate(),
            Self::CopyBufferToImage(info) => validate_region(info.region),
            Self::CopyImageToBuffer(info) => validate_region(info.region),
            Self::FillBuffer(info) => info.validate(),
            Self::FillImage(info) => validate_region(info.region),
            Self::Barrier => Ok(()),
        }
    }
}

macro_rules! impl_from_info {
    ($($info:ident => $variant:ident),+ $(,)?) => {
        $(
            impl From<$info> for CommandKind {
                #[inline]
                fn from(info: $info) -> Self {
                    CommandKind::$variant(info)
                }
            }
        )+
    };
}

impl_from_info! {
    DispatchParams => Dispatch,
    CopyBufferInfo => CopyBuffer,
    CopyBufferRectInfo => CopyBufferRect,
    CopyImageInfo => CopyImage,
    CopyBufferToImageInfo => CopyBufferToImage,
    CopyImageToBufferInfo => CopyImageToBuffer,
    FillBufferInfo => FillBuffer,
    FillImageInfo => FillImage,
}

/// The type of a recorded command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandType {
    Dispatch,
    CopyBuffer,
    CopyBufferRect,
    CopyImage,
    CopyBufferToImage,
    CopyImageToBuffer,
    FillBuffer,
    FillImage,
    Barrier,
}

impl CommandType {
    /// Returns whether the command copies data.
    #[inline]
    pub fn is_copy(self) -> bool {
        matches!(
            self,
            Self::CopyBuffer
                | Self::CopyBufferRect
                | Self::CopyImage
                | Self::CopyBufferToImage
                | Self::CopyImageToBuffer
        )
    }

    /// Returns whether the command fills memory with a value.
    #[inline]
    pub fn is_fill(self) -> bool {
        matches!(self, Self::FillBuffer | Self::FillImage)
    }
}

/// The parameters of a kernel dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchParams {
    /// The kernel to run.
    pub kernel: Id<Kernel>,

    /// The offset of the first work item in each dimension. Empty means no offset.
    ///
    /// The default value is empty.
    pub global_offset: WorkSize,

    /// The number of work items in each dimension. Its length is the number of work dimensions,
    /// which must be between 1 and 3.
    pub global_size: WorkSize,

    /// The number of work items in a work group in each dimension, or `None` to let the device
    /// choose.
    ///
    /// The default value is `None`.
    pub local_size: Option<WorkSize>,

    /// The arguments bound to the kernel, by argument index.
    ///
    /// The default value is empty.
    pub arguments: LinearMap<u32, KernelArg>,
}

impl DispatchParams {
    /// Returns `DispatchParams` that run `kernel` over `global_size` work items, with no offset,
    /// a device-chosen work group size and no arguments.
    #[inline]
    pub fn new(kernel: Id<Kernel>, global_size: impl IntoIterator<Item = u64>) -> Self {
        DispatchParams {
            kernel,
            global_offset: WorkSize::new(),
            global_size: global_size.into_iter().collect(),
            local_size: None,
            arguments: LinearMap::new(),
        }
    }

    /// Binds `value` to the argument at `index`, replacing any previous binding.
    #[inline]
    pub fn arg(mut self, index: u32, value: KernelArg) -> Self {
        self.arguments.insert(index, value);
        self
    }

    /// Returns the number of work dimensions.
    #[inline]
    pub fn dimensions(&self) -> u32 {
        self.global_size.len() as u32
    }

    /// Returns the number of work groups in each dimension.
    ///
    /// Without an explicit local size every work item is counted as its own group, which is the
    /// most the device could choose.
    pub fn work_group_count(&self) -> WorkSize {
        match &self.local_size {
            Some(local_size) => self
                .global_size
                .iter()
                .zip(local_size)
                .map(|(&global, &local)| global.div_ceil(local))
                .collect(),
            None => self.global_size.clone(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), &'static str> {
        let dimensions = self.global_size.len();

        if !(1..=3).contains(&dimensions) {
            return Err("the number of work dimensions is not between 1 and 3");
        }

        if !self.global_offset.is_empty() && self.global_offset.len() != dimensions {
            return Err("`global_offset` does not have one entry per work dimension");
        }

        if let Some(local_size) = &self.local_size {
            if local_size.len() != dimensions {
                return Err("`local_size` does not have one entry per work dimension");
            }

            if local_size.contains(&0) {
                return Err("`local_size` contains a zero");
            }

            if self
                .global_size
                .iter()
                .zip(local_size)
                .any(|(&global, &local)| global % local != 0)
            {
                return Err("`global_size` is not a multiple of `local_size`");
            }
        }

        Ok(())
    }
}

/// A value bound to a kernel argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KernelArg {
    /// A memory object.
    Memory(Id<MemoryObject>),

    /// An image.
    Image(Id<Image>),

    /// A plain value, passed by its bytes.
    Bytes(SmallVec<[u8; 16]>),

    /// A local memory allocation of the given size in bytes.
    Local(u64),

    /// A null memory object.
    Null,
}

impl KernelArg {
    /// Returns a `KernelArg` holding the bytes of `value`.
    #[inline]
    pub fn bytes(value: &[u8]) -> Self {
        KernelArg::Bytes(SmallVec::from_slice(value))
    }
}

/// Copies bytes between two memory objects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyBufferInfo {
    pub src: Id<MemoryObject>,
    pub dst: Id<MemoryObject>,
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

impl CopyBufferInfo {
    fn validate(&self) -> Result<(), &'static str> {
        if self.size == 0 {
            return Err("`size` is zero");
        }

        let (Some(src_end), Some(dst_end)) = (
            self.src_offset.checked_add(self.size),
            self.dst_offset.checked_add(self.size),
        ) else {
            return Err("the end of the source or destination range overflows");
        };

        if self.src == self.dst && self.src_offset < dst_end && self.dst_offset < src_end {
            return Err("the source and destination regions overlap");
        }

        Ok(())
    }
}

/// Copies a 3D region of bytes between two memory objects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyBufferRectInfo {
    pub src: Id<MemoryObject>,
    pub dst: Id<MemoryObject>,
    pub src_origin: [u64; 3],
    pub dst_origin: [u64; 3],

    /// Width in bytes, height in rows and depth in slices of the region.
    pub region: [u64; 3],
    pub src_row_pitch: u64,
    pub src_slice_pitch: u64,
    pub dst_row_pitch: u64,
    pub dst_slice_pitch: u64,
}

impl CopyBufferRectInfo {
    fn validate(&self) -> Result<(), &'static str> {
        validate_region(self.region)?;

        let [width, height, _] = self.region;

        if self.src_row_pitch < width || self.dst_row_pitch < width {
            return Err("a row pitch is smaller than the width of the region");
        }

        let (Some(src_rows), Some(dst_rows)) = (
            self.src_row_pitch.checked_mul(height),
            self.dst_row_pitch.checked_mul(height),
        ) else {
            return Err("a row pitch times the region height overflows");
        };

        if self.src_slice_pitch < src_rows || self.dst_slice_pitch < dst_rows {
            return Err("a slice pitch is smaller than a row pitch times the region height");
        }

        Ok(())
    }
}

/// Copies a region between two images.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyImageInfo {
    pub src: Id<Image>,
    pub dst: Id<Image>,
    pub src_origin: [u64; 3],
    pub dst_origin: [u64; 3],
    pub region: [u64; 3],
}

impl CopyImageInfo {
    fn validate(&self) -> Result<(), &'static str> {
        validate_region(self.region)?;

        let mut src_end = [0; 3];
        let mut dst_end = [0; 3];

        for i in 0..3 {
            match (
                self.src_origin[i].checked_add(self.region[i]),
                self.dst_origin[i].checked_add(self.region[i]),
            ) {
                (Some(src), Some(dst)) => {
                    src_end[i] = src;
                    dst_end[i] = dst;
                }
                _ => return Err("the end of the source or destination region overflows"),
            }
        }

        if self.src == self.dst {
            let overlaps = (0..3)
                .all(|i| self.src_origin[i] < dst_end[i] && self.dst_origin[i] < src_end[i]);

            if overlaps {
                return Err("the source and destination regions overlap");
            }
        }

        Ok(())
    }
}

/// Copies bytes from a memory object into a region of an image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyBufferToImageInfo {
    pub src: Id<MemoryObject>,
    pub dst: Id<Image>,
    pub src_offset: u64,
    pub dst_origin: [u64; 3],
    pub region: [u64; 3],
}

/// Copies a region of an image into a memory object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyImageToBufferInfo {
    pub src: Id<Image>,
    pub dst: Id<MemoryObject>,
    pub src_origin: [u64; 3],
    pub region: [u64; 3],
    pub dst_offset: u64,
}

/// Fills a range of a memory object with a repeated pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FillBufferInfo {
    pub dst: Id<MemoryObject>,

    /// The bytes to repeat. The length must be a power of two no greater than 128.
    pub pattern: SmallVec<[u8; 16]>,
    pub offset: u64,
    pub size: u64,
}

impl FillBufferInfo {
    fn validate(&self) -> Result<(), &'static str> {
        let pattern_size = self.pattern.len() as u64;

        if !pattern_size.is_power_of_two() || pattern_size > 128 {
            return Err("the pattern size is not a power of two no greater than 128");
        }

        if self.size == 0 {
            return Err("`size` is zero");
        }

        if self.offset % pattern_size != 0 || self.size % pattern_size != 0 {
            return Err("`offset` or `size` is not a multiple of the pattern size");
        }

        Ok(())
    }
}

/// Fills a region of an image with a color.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FillImageInfo {
    pub dst: Id<Image>,

    /// The fill color as raw 32-bit channels, interpreted according to the image format.
    pub color: [u32; 4],
    pub origin: [u64; 3],
    pub region: [u64; 3],
}

fn validate_region(region: [u64; 3]) -> Result<(), &'static str> {
    if region.contains(&0) {
        Err("the region has a zero extent")
    } else {
        Ok(())
    }
}

/// A command as stored in a command buffer: what to do, where, and after what.
#[derive(Clone, Debug)]
pub struct CommandRecord {
    pub(crate) kind: CommandKind,
    pub(crate) queue_index: u32,
    pub(crate) waits: SmallVec<[SyncPoint; 4]>,
    pub(crate) sync_point: SyncPoint,
    pub(crate) mutable_slot: Option<u32>,
}

impl CommandRecord {
    /// Returns the command as it was recorded. For mutable dispatches the current parameters are
    /// found in the submission snapshot instead.
    #[inline]
    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    /// Returns the index, into the queue list of the command buffer, of the queue this command
    /// targets.
    #[inline]
    pub fn queue_index(&self) -> usize {
        self.queue_index as usize
    }

    /// Returns the sync points the command was explicitly recorded to wait on.
    #[inline]
    pub fn waits(&self) -> &[SyncPoint] {
        &self.waits
    }

    /// Returns the sync point the command produces.
    #[inline]
    pub fn sync_point(&self) -> SyncPoint {
        self.sync_point
    }

    /// Returns whether the command has a mutable handle.
    #[inline]
    pub fn is_mutable(&self) -> bool {
        self.mutable_slot.is_some()
    }
}
