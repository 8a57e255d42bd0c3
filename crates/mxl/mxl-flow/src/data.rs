//! Typed views over a flow's mapped segments.

use mxl_mmap::SharedSegment;

use crate::layout::FlowInfo;

/// A flow backed by one `SharedSegment` for the header plus one segment
/// per grain slot. Promoted from an untyped open via `common.format`.
pub struct DiscreteFlowData {
    pub(crate) data: SharedSegment,
    pub(crate) grains: Vec<SharedSegment>,
}

impl DiscreteFlowData {
    pub fn info(&self) -> &FlowInfo {
        unsafe { &*(self.data.as_ptr() as *const FlowInfo) }
    }

    pub fn grain_count(&self) -> usize {
        self.grains.len()
    }

    /// Attempts to take an exclusive lock on every segment, the
    /// liveness probe garbage collection uses before destroying a flow.
    pub fn make_exclusive(&mut self) -> bool {
        if self.data.make_exclusive().is_err() {
            return false;
        }
        self.grains.iter_mut().all(|g| g.make_exclusive().is_ok())
    }
}

/// A flow backed by one `SharedSegment` holding the header immediately
/// followed by `channel_count` equal-sized per-channel ring buffers.
pub struct ContinuousFlowData {
    pub(crate) data: SharedSegment,
}

impl ContinuousFlowData {
    pub fn info(&self) -> &FlowInfo {
        unsafe { &*(self.data.as_ptr() as *const FlowInfo) }
    }

    pub(crate) fn channel_base(&self, channel: u32, buffer_length: u32, sample_size: u32) -> *const u8 {
        let header = std::mem::size_of::<FlowInfo>();
        let channel_bytes = buffer_length as usize * sample_size as usize;
        unsafe { self.data.as_ptr().add(header + channel as usize * channel_bytes) }
    }

    pub(crate) fn channel_base_mut(
        &mut self,
        channel: u32,
        buffer_length: u32,
        sample_size: u32,
    ) -> *mut u8 {
        let header = std::mem::size_of::<FlowInfo>();
        let channel_bytes = buffer_length as usize * sample_size as usize;
        unsafe { self.data.as_mut_ptr().add(header + channel as usize * channel_bytes) }
    }

    pub fn make_exclusive(&mut self) -> bool {
        self.data.make_exclusive().is_ok()
    }
}

/// A flow promoted to its concrete variant. The factory step the data
/// model calls out: every [`FlowData`] instance knows which variant it is.
pub enum FlowData {
    Discrete(DiscreteFlowData),
    Continuous(ContinuousFlowData),
}

impl FlowData {
    pub fn info(&self) -> &FlowInfo {
        match self {
            FlowData::Discrete(d) => d.info(),
            FlowData::Continuous(c) => c.info(),
        }
    }

    pub fn make_exclusive(&mut self) -> bool {
        match self {
            FlowData::Discrete(d) => d.make_exclusive(),
            FlowData::Continuous(c) => c.make_exclusive(),
        }
    }
}
