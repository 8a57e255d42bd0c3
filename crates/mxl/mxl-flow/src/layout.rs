//! On-disk binary layout for `data` and grain files.
//!
//! `FlowInfo` is fixed at 2,048 bytes and `GrainInfo` at 4,096 bytes,
//! independent of target architecture: every numeric field is a
//! fixed-width integer and padding is explicit, so the layout is stable
//! across processes mapping the same file.

use std::mem::size_of;
use std::sync::atomic::{AtomicU32, AtomicU64};

use mxl_clock::Rate;

pub const FLOW_INFO_VERSION: u32 = 1;
pub const FLOW_INFO_SIZE: usize = 2048;
pub const GRAIN_INFO_SIZE: usize = 4096;
pub const MAX_PLANES_PER_GRAIN: usize = 4;

pub const GRAIN_FLAG_INVALID: u32 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PayloadLocation {
    Host = 0,
    Device = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DataFormatTag {
    Video = 0,
    Audio = 1,
    Data = 2,
}

/// Fields common to discrete and continuous flows: immutable
/// configuration plus the runtime subregion (head index, sync counter,
/// read/write timestamps) shared by both variants.
#[repr(C)]
pub struct CommonFlowInfo {
    pub id: [u8; 16],
    pub format: u32,
    pub flags: u32,
    pub device_index: i32,
    pub payload_location: u32,
    pub max_commit_batch_size_hint: u32,
    pub max_sync_batch_size_hint: u32,
    pub inode: u64,
    pub last_write_time: AtomicU64,
    pub last_read_time: AtomicU64,
    /// Monotonically non-decreasing: grain index for discrete flows,
    /// sample index for continuous flows. Updated only by the writer,
    /// after payload bytes are visible.
    pub head_index: AtomicU64,
    /// Incremented on every commit with release ordering; readers wait
    /// on this address via a futex-style primitive.
    pub sync_counter: AtomicU32,
    reserved: [u8; 48],
}

const _: () = assert!(size_of::<CommonFlowInfo>() == 128);

#[repr(C)]
pub struct DiscreteFlowInfo {
    pub grain_rate: Rate,
    pub slice_sizes: [u32; MAX_PLANES_PER_GRAIN],
    pub grain_count: u32,
    reserved: [u8; 36],
}

const _: () = assert!(size_of::<DiscreteFlowInfo>() == 64);

#[repr(C)]
pub struct ContinuousFlowInfo {
    pub sample_rate: Rate,
    pub channel_count: u32,
    pub buffer_length: u32,
    /// Byte size of one sample in one channel's ring buffer. Not named
    /// explicitly in the data model but required to compute byte offsets
    /// within a channel buffer; derived from the flow descriptor's format
    /// at creation time and persisted here since the header is the only
    /// state shared between writer and reader processes.
    pub sample_size_bytes: u32,
    reserved: [u8; 44],
}

const _: () = assert!(size_of::<ContinuousFlowInfo>() == 64);

/// Raw, un-discriminated variant bytes. [`FlowInfo::as_discrete`] /
/// [`FlowInfo::as_continuous`] reinterpret this region once `common.format`
/// has been checked, the same promotion `FlowIoFactory` performs at a
/// higher level.
#[repr(C)]
pub union FlowInfoVariant {
    pub discrete: std::mem::ManuallyDrop<DiscreteFlowInfo>,
    pub continuous: std::mem::ManuallyDrop<ContinuousFlowInfo>,
}

#[repr(C)]
pub struct FlowInfo {
    pub version: u32,
    pub size: u32,
    pub common: CommonFlowInfo,
    pub variant: FlowInfoVariant,
    reserved: [u8; FLOW_INFO_SIZE - 8 - size_of::<CommonFlowInfo>() - 64],
}

const _: () = assert!(size_of::<FlowInfo>() == FLOW_INFO_SIZE);

impl FlowInfo {
    /// Initializes a freshly-allocated `data` file's header in place.
    ///
    /// # Safety
    /// `ptr` must point to at least `FLOW_INFO_SIZE` bytes of writable,
    /// exclusively-owned memory (the caller just created the mapping).
    pub unsafe fn init_discrete(
        ptr: *mut FlowInfo,
        id: uuid::Uuid,
        inode: u64,
        grain_rate: Rate,
        slice_sizes: [u32; MAX_PLANES_PER_GRAIN],
        grain_count: u32,
        max_commit_batch_size_hint: u32,
        max_sync_batch_size_hint: u32,
    ) {
        unsafe {
            let info = &mut *ptr;
            info.version = FLOW_INFO_VERSION;
            info.size = FLOW_INFO_SIZE as u32;
            info.common = CommonFlowInfo {
                id: *id.as_bytes(),
                format: DataFormatTag::Video as u32,
                flags: 0,
                device_index: -1,
                payload_location: PayloadLocation::Host as u32,
                max_commit_batch_size_hint,
                max_sync_batch_size_hint,
                inode,
                last_write_time: AtomicU64::new(0),
                last_read_time: AtomicU64::new(0),
                head_index: AtomicU64::new(0),
                sync_counter: AtomicU32::new(0),
                reserved: [0; 48],
            };
            info.variant.discrete = std::mem::ManuallyDrop::new(DiscreteFlowInfo {
                grain_rate,
                slice_sizes,
                grain_count,
                reserved: [0; 36],
            });
        }
    }

    /// # Safety
    /// Same requirement as [`Self::init_discrete`].
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn init_continuous(
        ptr: *mut FlowInfo,
        id: uuid::Uuid,
        inode: u64,
        sample_rate: Rate,
        channel_count: u32,
        buffer_length: u32,
        sample_size_bytes: u32,
        max_commit_batch_size_hint: u32,
        max_sync_batch_size_hint: u32,
    ) {
        unsafe {
            let info = &mut *ptr;
            info.version = FLOW_INFO_VERSION;
            info.size = FLOW_INFO_SIZE as u32;
            info.common = CommonFlowInfo {
                id: *id.as_bytes(),
                format: DataFormatTag::Audio as u32,
                flags: 0,
                device_index: -1,
                payload_location: PayloadLocation::Host as u32,
                max_commit_batch_size_hint,
                max_sync_batch_size_hint,
                inode,
                last_write_time: AtomicU64::new(0),
                last_read_time: AtomicU64::new(0),
                head_index: AtomicU64::new(0),
                sync_counter: AtomicU32::new(0),
                reserved: [0; 48],
            };
            info.variant.continuous = std::mem::ManuallyDrop::new(ContinuousFlowInfo {
                sample_rate,
                channel_count,
                buffer_length,
                sample_size_bytes,
                reserved: [0; 44],
            });
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.version != FLOW_INFO_VERSION {
            return Err("unsupported FlowInfo version");
        }
        if self.size as usize != FLOW_INFO_SIZE {
            return Err("FlowInfo size mismatch");
        }
        Ok(())
    }

    pub fn id(&self) -> uuid::Uuid {
        uuid::Uuid::from_bytes(self.common.id)
    }

    /// # Safety
    /// Caller must have already checked `common.format == Video | Data`.
    pub unsafe fn as_discrete(&self) -> &DiscreteFlowInfo {
        unsafe { &self.variant.discrete }
    }

    /// # Safety
    /// Caller must have already checked `common.format == Audio`.
    pub unsafe fn as_continuous(&self) -> &ContinuousFlowInfo {
        unsafe { &self.variant.continuous }
    }
}

/// Per-grain header, stored at the start of every grain file.
#[repr(C)]
pub struct GrainInfo {
    pub flags: u32,
    pub valid_slice_count: u32,
    pub total_slice_count: u32,
    pub commit_time_ns: u64,
    pub payload_size: u64,
    reserved: [u8; GRAIN_INFO_SIZE - 4 - 4 - 4 - 8 - 8],
}

const _: () = assert!(size_of::<GrainInfo>() == GRAIN_INFO_SIZE);

impl GrainInfo {
    pub fn init(payload_size: u64, total_slice_count: u32) -> Self {
        Self {
            flags: GRAIN_FLAG_INVALID,
            valid_slice_count: 0,
            total_slice_count,
            commit_time_ns: 0,
            payload_size,
            reserved: [0; GRAIN_INFO_SIZE - 4 - 4 - 4 - 8 - 8],
        }
    }

    pub fn is_invalid(&self) -> bool {
        self.flags & GRAIN_FLAG_INVALID != 0
    }
}

pub fn grain_file_size(payload_size: u64) -> u64 {
    GRAIN_INFO_SIZE as u64 + payload_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_info_is_2048_bytes() {
        assert_eq!(size_of::<FlowInfo>(), 2048);
    }

    #[test]
    fn grain_info_is_4096_bytes() {
        assert_eq!(size_of::<GrainInfo>(), 4096);
    }

    #[test]
    fn common_flow_info_is_128_bytes() {
        assert_eq!(size_of::<CommonFlowInfo>(), 128);
    }

    #[test]
    fn variant_infos_are_64_bytes() {
        assert_eq!(size_of::<DiscreteFlowInfo>(), 64);
        assert_eq!(size_of::<ContinuousFlowInfo>(), 64);
    }

    #[test]
    fn grain_file_size_adds_header_and_payload() {
        assert_eq!(grain_file_size(1000), 4096 + 1000);
    }

    #[test]
    fn fresh_grain_info_is_invalid_until_committed() {
        let g = GrainInfo::init(4096, 1);
        assert!(g.is_invalid());
    }
}
