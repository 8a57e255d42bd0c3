//! FlowReader: the deadline-bounded consumer side of a flow.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use mxl_clock::wall_now_ns;
use mxl_status::{MxlError, Result, StatusCode};

use crate::data::{ContinuousFlowData, DiscreteFlowData};
use crate::layout::{FlowInfo, GrainInfo};

const WAIT_POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Blocks until `counter` differs from `previous` or `deadline` passes.
/// `atomic-wait` has no portable timed variant, so this polls in short
/// increments rather than doing a single indefinite futex wait.
fn wait_for_change(
    counter: &std::sync::atomic::AtomicU32,
    previous: u32,
    deadline: Instant,
) -> Result<()> {
    loop {
        if counter.load(Ordering::Acquire) != previous {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(MxlError::new(StatusCode::Timeout, "deadline elapsed waiting for commit"));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        std::thread::sleep(remaining.min(WAIT_POLL_INTERVAL));
    }
}

fn touch_access(path: &std::path::Path) {
    if let Err(err) = filetime::set_file_mtime(path, filetime::FileTime::now()) {
        tracing::warn!(%err, "failed to update access sentinel");
    }
}

pub struct DiscreteFlowReader {
    data: DiscreteFlowData,
    data_path: std::path::PathBuf,
    access_path: std::path::PathBuf,
}

impl DiscreteFlowReader {
    pub fn new(
        data: DiscreteFlowData,
        data_path: std::path::PathBuf,
        access_path: std::path::PathBuf,
    ) -> Self {
        Self { data, data_path, access_path }
    }

    pub fn info(&self) -> &FlowInfo {
        self.data.info()
    }

    /// Re-stats the `data` file and compares its inode against the one
    /// captured when this flow was created, to detect destroy-and-recreate
    /// beneath an open mapping.
    pub fn is_flow_valid(&self) -> bool {
        use std::os::unix::fs::MetadataExt;
        match std::fs::metadata(&self.data_path) {
            Ok(meta) => meta.ino() == self.info().common.inode,
            Err(_) => false,
        }
    }

    /// Implements the get-grain deadline loop: snapshot `syncCounter`,
    /// check the index against the readable window, wait on change and
    /// retry until `timeout` elapses.
    pub fn get_grain(
        &mut self,
        index: u64,
        min_valid_slices: u32,
        timeout: Duration,
    ) -> Result<(&GrainInfo, &[u8])> {
        let deadline = Instant::now() + timeout;
        loop {
            let previous_sync = self.info().common.sync_counter.load(Ordering::Acquire);
            let head = self.info().common.head_index.load(Ordering::Acquire);
            let grain_count = unsafe { self.info().as_discrete().grain_count };

            if index > head {
                if timeout.is_zero() {
                    return Err(MxlError::new(StatusCode::OutOfRangeTooEarly, "index not yet written"));
                }
                if wait_for_change(&self.info().common.sync_counter, previous_sync, deadline).is_err()
                {
                    if !self.is_flow_valid() {
                        return Err(MxlError::new(StatusCode::FlowInvalid, "flow recreated"));
                    }
                    return Err(MxlError::new(StatusCode::Timeout, "timed out waiting for grain"));
                }
                continue;
            }
            if grain_count > 0 && index + grain_count as u64 <= head {
                return Err(MxlError::new(StatusCode::OutOfRangeTooLate, "index overwritten"));
            }

            let slot = (index % grain_count.max(1) as u64) as usize;
            let seg = &self.data.grains[slot];
            let grain_info = unsafe { &*(seg.as_ptr() as *const GrainInfo) };
            if grain_info.is_invalid() {
                return Err(MxlError::new(StatusCode::FlowInvalid, "grain marked invalid"));
            }
            if grain_info.valid_slice_count < min_valid_slices.min(grain_info.total_slice_count) {
                return Err(MxlError::new(StatusCode::OutOfRangeTooEarly, "grain not fully committed"));
            }

            self.info().common.last_read_time.store(wall_now_ns(), Ordering::Release);
            touch_access(&self.access_path);

            let payload = unsafe {
                std::slice::from_raw_parts(
                    seg.as_ptr().add(std::mem::size_of::<GrainInfo>()),
                    grain_info.payload_size as usize,
                )
            };
            return Ok((grain_info, payload));
        }
    }
}

pub struct ContinuousFlowReader {
    data: ContinuousFlowData,
    data_path: std::path::PathBuf,
    access_path: std::path::PathBuf,
}

impl ContinuousFlowReader {
    pub fn new(
        data: ContinuousFlowData,
        data_path: std::path::PathBuf,
        access_path: std::path::PathBuf,
    ) -> Self {
        Self { data, data_path, access_path }
    }

    pub fn info(&self) -> &FlowInfo {
        self.data.info()
    }

    pub fn is_flow_valid(&self) -> bool {
        use std::os::unix::fs::MetadataExt;
        match std::fs::metadata(&self.data_path) {
            Ok(meta) => meta.ino() == self.info().common.inode,
            Err(_) => false,
        }
    }

    fn geometry(&self) -> (u32, u32) {
        let continuous = unsafe { self.info().as_continuous() };
        (continuous.buffer_length, continuous.sample_size_bytes)
    }

    /// Implements the get-samples deadline loop; the returned fragments
    /// are read-only views into the committed range.
    pub fn get_samples(
        &mut self,
        index: u64,
        count: u32,
        channel: u32,
        timeout: Duration,
    ) -> Result<Vec<&[u8]>> {
        let deadline = Instant::now() + timeout;
        loop {
            let previous_sync = self.info().common.sync_counter.load(Ordering::Acquire);
            let head = self.info().common.head_index.load(Ordering::Acquire);
            let (buffer_length, sample_size) = self.geometry();
            let end = index + count as u64;

            if end > head + 1 {
                if timeout.is_zero() {
                    return Err(MxlError::new(StatusCode::OutOfRangeTooEarly, "samples not yet written"));
                }
                if wait_for_change(&self.info().common.sync_counter, previous_sync, deadline).is_err()
                {
                    if !self.is_flow_valid() {
                        return Err(MxlError::new(StatusCode::FlowInvalid, "flow recreated"));
                    }
                    return Err(MxlError::new(StatusCode::Timeout, "timed out waiting for samples"));
                }
                continue;
            }
            if head + 1 - end > buffer_length as u64 {
                return Err(MxlError::new(StatusCode::OutOfRangeTooLate, "samples overwritten"));
            }

            self.info().common.last_read_time.store(wall_now_ns(), Ordering::Release);
            touch_access(&self.access_path);

            let base = self.data.channel_base(channel, buffer_length, sample_size);
            let start = (index % buffer_length as u64) as u32;
            let mut remaining = count;
            let mut offset = start;
            let mut fragments = Vec::with_capacity(2);
            while remaining > 0 {
                let run = remaining.min(buffer_length - offset);
                let ptr = unsafe { base.add(offset as usize * sample_size as usize) };
                let slice = unsafe { std::slice::from_raw_parts(ptr, run as usize * sample_size as usize) };
                fragments.push(slice);
                remaining -= run;
                offset = 0;
            }
            return Ok(fragments);
        }
    }
}

pub enum FlowReader {
    Discrete(DiscreteFlowReader),
    Continuous(ContinuousFlowReader),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FlowStore;
    use crate::writer::DiscreteFlowWriter;
    use mxl_clock::Rate;
    use mxl_descriptor::{DataFormat, Geometry, ValidatedDescriptor};
    use uuid::Uuid;

    fn setup() -> (tempfile::TempDir, FlowStore, Uuid) {
        let dir = tempfile::tempdir().unwrap();
        let store = FlowStore::new(dir.path());
        let desc = ValidatedDescriptor {
            id: Uuid::new_v4(),
            format: DataFormat::Video,
            rate: Rate::new(25, 1).unwrap(),
            geometry: Geometry::Video { width: 1920, height: 1080, grain_count: 8 },
        };
        store.create(&desc).unwrap();
        (dir, store, desc.id)
    }

    #[test]
    fn too_early_with_zero_timeout_returns_immediately() {
        let (_dir, store, id) = setup();
        let crate::data::FlowData::Discrete(d) = store.open(id, false).unwrap() else {
            unreachable!()
        };
        let mut reader = DiscreteFlowReader::new(d, store.data_path(id), store.access_path(id));
        let err = reader.get_grain(0, 1, Duration::ZERO).unwrap_err();
        assert_eq!(err.code, StatusCode::OutOfRangeTooEarly);
    }

    #[test]
    fn committed_grain_is_readable() {
        let (_dir, store, id) = setup();
        {
            let crate::data::FlowData::Discrete(wd) = store.open(id, true).unwrap() else {
                unreachable!()
            };
            let mut writer = DiscreteFlowWriter::new(wd);
            writer.open_grain(0).unwrap().commit();
        }

        let crate::data::FlowData::Discrete(rd) = store.open(id, false).unwrap() else {
            unreachable!()
        };
        let mut reader = DiscreteFlowReader::new(rd, store.data_path(id), store.access_path(id));
        let (info, _payload) = reader.get_grain(0, 0, Duration::from_millis(10)).unwrap();
        assert!(!info.is_invalid());
    }

    #[test]
    fn overwritten_slot_is_too_late() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlowStore::new(dir.path());
        let desc = ValidatedDescriptor {
            id: Uuid::new_v4(),
            format: DataFormat::Video,
            rate: Rate::new(25, 1).unwrap(),
            geometry: Geometry::Video { width: 1920, height: 1080, grain_count: 4 },
        };
        store.create(&desc).unwrap();
        {
            let crate::data::FlowData::Discrete(wd) = store.open(desc.id, true).unwrap() else {
                unreachable!()
            };
            let mut writer = DiscreteFlowWriter::new(wd);
            for i in 0..=5u64 {
                writer.open_grain(i).unwrap().commit();
            }
        }

        let crate::data::FlowData::Discrete(rd) = store.open(desc.id, false).unwrap() else {
            unreachable!()
        };
        let mut reader = DiscreteFlowReader::new(rd, store.data_path(desc.id), store.access_path(desc.id));
        let err = reader.get_grain(0, 0, Duration::ZERO).unwrap_err();
        assert_eq!(err.code, StatusCode::OutOfRangeTooLate);
    }
}
