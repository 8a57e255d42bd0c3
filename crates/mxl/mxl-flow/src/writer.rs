//! FlowWriter: the single, exclusive producer of a flow's data.

use std::sync::atomic::Ordering;

use mxl_clock::wall_now_ns;
use mxl_status::{MxlError, Result, StatusCode};

use crate::data::{ContinuousFlowData, DiscreteFlowData};
use crate::layout::{FlowInfo, GrainInfo, GRAIN_FLAG_INVALID};

/// A grain slot opened for writing. Must be finished with [`commit`] or
/// [`cancel`] before the next grain on the same writer is opened.
///
/// [`commit`]: GrainWriteHandle::commit
/// [`cancel`]: GrainWriteHandle::cancel
pub struct GrainWriteHandle<'a> {
    writer: &'a mut DiscreteFlowWriter,
    index: u64,
    slot: u32,
}

impl<'a> GrainWriteHandle<'a> {
    pub fn grain_info_mut(&mut self) -> &mut GrainInfo {
        let seg = &mut self.writer.data.grains[self.slot as usize];
        unsafe { &mut *(seg.as_mut_ptr() as *mut GrainInfo) }
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let seg = &mut self.writer.data.grains[self.slot as usize];
        let payload_size = unsafe { (*(seg.as_ptr() as *const GrainInfo)).payload_size as usize };
        let base = unsafe { seg.as_mut_ptr().add(std::mem::size_of::<GrainInfo>()) };
        unsafe { std::slice::from_raw_parts_mut(base, payload_size) }
    }

    /// Publishes the grain: clears the invalid bit, stamps `commitTimeNs`,
    /// advances `headIndex`, stamps `lastWriteTime`, and wakes readers.
    pub fn commit(mut self) {
        let now = wall_now_ns();
        {
            let grain_info = self.grain_info_mut();
            grain_info.flags &= !GRAIN_FLAG_INVALID;
            grain_info.commit_time_ns = now;
        }
        let info = self.writer.info_mut();
        let prev_head = info.common.head_index.load(Ordering::Relaxed);
        info.common.head_index.store(prev_head.max(self.index), Ordering::Release);
        info.common.last_write_time.store(now, Ordering::Release);
        info.common.sync_counter.fetch_add(1, Ordering::Release);
        atomic_wait::wake_all(&info.common.sync_counter);
    }

    /// Discards the open grain without advancing head, leaving the
    /// invalid bit set so a racing reader sees an explicit error.
    pub fn cancel(mut self) {
        self.grain_info_mut().flags |= GRAIN_FLAG_INVALID;
    }
}

pub struct DiscreteFlowWriter {
    data: DiscreteFlowData,
}

impl DiscreteFlowWriter {
    pub fn new(data: DiscreteFlowData) -> Self {
        Self { data }
    }

    fn info_mut(&mut self) -> &mut FlowInfo {
        unsafe { &mut *(self.data.data.as_mut_ptr() as *mut FlowInfo) }
    }

    pub fn info(&self) -> &FlowInfo {
        self.data.info()
    }

    /// Opens the grain at `index` for writing. `index` must be at least
    /// the current head; arbitrarily large indices are accepted as the
    /// writer time-skipping forward.
    pub fn open_grain(&mut self, index: u64) -> Result<GrainWriteHandle<'_>> {
        let head = self.info().common.head_index.load(Ordering::Acquire);
        if index < head {
            return Err(MxlError::new(StatusCode::InvalidArg, "index precedes current head"));
        }
        let grain_count = unsafe { self.info().as_discrete().grain_count };
        let slot = (index % grain_count as u64) as u32;
        Ok(GrainWriteHandle { writer: self, index, slot })
    }
}

/// A continuous-flow batch opened for writing, covering `[index, index +
/// count)` across every channel. At most two fragments per channel when
/// the range spans the ring wrap.
pub struct SamplesWriteHandle<'a> {
    writer: &'a mut ContinuousFlowWriter,
    index: u64,
    count: u32,
}

pub struct Fragment {
    pub ptr: *mut u8,
    pub len: usize,
}

impl<'a> SamplesWriteHandle<'a> {
    /// Returns up to two fragments for `channel`, in ring order.
    pub fn channel_fragments(&mut self, channel: u32) -> Vec<Fragment> {
        let (buffer_length, sample_size) = self.writer.geometry();
        let base = self.writer.data.channel_base_mut(channel, buffer_length, sample_size);
        let start = (self.index % buffer_length as u64) as u32;
        let mut remaining = self.count;
        let mut offset = start;
        let mut fragments = Vec::with_capacity(2);
        while remaining > 0 {
            let run = remaining.min(buffer_length - offset);
            let ptr = unsafe { base.add(offset as usize * sample_size as usize) };
            fragments.push(Fragment { ptr, len: run as usize * sample_size as usize });
            remaining -= run;
            offset = 0;
        }
        fragments
    }

    /// Advances `headIndex` by the batch's sample count and increments
    /// `syncCounter` once for the whole batch.
    pub fn commit(self) {
        let info = self.writer.info_mut();
        let prev_head = info.common.head_index.load(Ordering::Relaxed);
        info.common.head_index.store(prev_head + self.count as u64, Ordering::Release);
        info.common.last_write_time.store(wall_now_ns(), Ordering::Release);
        info.common.sync_counter.fetch_add(1, Ordering::Release);
        atomic_wait::wake_all(&info.common.sync_counter);
    }

    pub fn cancel(self) {}
}

pub struct ContinuousFlowWriter {
    data: ContinuousFlowData,
}

impl ContinuousFlowWriter {
    pub fn new(data: ContinuousFlowData) -> Self {
        Self { data }
    }

    fn info_mut(&mut self) -> &mut FlowInfo {
        unsafe { &mut *(self.data.info() as *const FlowInfo as *mut FlowInfo) }
    }

    pub fn info(&self) -> &FlowInfo {
        self.data.info()
    }

    fn geometry(&self) -> (u32, u32) {
        let continuous = unsafe { self.info().as_continuous() };
        (continuous.buffer_length, continuous.sample_size_bytes)
    }

    pub fn open_samples(&mut self, index: u64, count: u32) -> Result<SamplesWriteHandle<'_>> {
        let head = self.info().common.head_index.load(Ordering::Acquire);
        if index < head {
            return Err(MxlError::new(StatusCode::InvalidArg, "index precedes current head"));
        }
        Ok(SamplesWriteHandle { writer: self, index, count })
    }
}

pub enum FlowWriter {
    Discrete(DiscreteFlowWriter),
    Continuous(ContinuousFlowWriter),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FlowStore;
    use mxl_clock::Rate;
    use mxl_descriptor::{DataFormat, Geometry, ValidatedDescriptor};
    use uuid::Uuid;

    fn setup_discrete() -> (tempfile::TempDir, DiscreteFlowWriter) {
        let dir = tempfile::tempdir().unwrap();
        let store = FlowStore::new(dir.path());
        let desc = ValidatedDescriptor {
            id: Uuid::new_v4(),
            format: DataFormat::Video,
            rate: Rate::new(25, 1).unwrap(),
            geometry: Geometry::Video { width: 1920, height: 1080, grain_count: 8 },
        };
        let data = store.create(&desc).unwrap();
        let crate::data::FlowData::Discrete(d) = data else { unreachable!() };
        (dir, DiscreteFlowWriter::new(d))
    }

    #[test]
    fn commit_advances_head_and_sync_counter() {
        let (_dir, mut writer) = setup_discrete();
        let handle = writer.open_grain(0).unwrap();
        handle.commit();
        assert_eq!(writer.info().common.head_index.load(Ordering::Acquire), 0);
        assert_eq!(writer.info().common.sync_counter.load(Ordering::Acquire), 1);
    }

    #[test]
    fn cancel_marks_slot_invalid() {
        let (_dir, mut writer) = setup_discrete();
        let mut handle = writer.open_grain(0).unwrap();
        assert!(handle.grain_info_mut().is_invalid());
        handle.cancel();
    }

    #[test]
    fn rejects_index_before_head() {
        let (_dir, mut writer) = setup_discrete();
        writer.open_grain(5).unwrap().commit();
        assert!(writer.open_grain(0).is_err());
    }
}
