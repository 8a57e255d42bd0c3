//! Filesystem layout of a domain: `<domain>/<uuid>.mxl-flow/{data,access,grains/}`.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use mxl_descriptor::{DataFormat, Geometry, ValidatedDescriptor};
use mxl_mmap::SharedSegment;
use mxl_status::{MxlError, Result, StatusCode};
use uuid::Uuid;

use crate::data::{ContinuousFlowData, DiscreteFlowData, FlowData};
use crate::layout::{self, FlowInfo};

pub struct FlowStore {
    domain: PathBuf,
}

impl FlowStore {
    pub fn new(domain: impl Into<PathBuf>) -> Self {
        Self { domain: domain.into() }
    }

    pub fn domain(&self) -> &Path {
        &self.domain
    }

    fn flow_dir(&self, id: Uuid) -> PathBuf {
        self.domain.join(format!("{id}.mxl-flow"))
    }

    fn grain_path(flow_dir: &Path, slot: u32) -> PathBuf {
        flow_dir.join("grains").join(format!("{slot:012}.grain"))
    }

    /// Creates a flow's on-disk tree and returns its writable `FlowData`.
    pub fn create(&self, descriptor: &ValidatedDescriptor) -> Result<FlowData> {
        let flow_dir = self.flow_dir(descriptor.id);
        fs::create_dir_all(&flow_dir).map_err(MxlError::from)?;

        let data_path = flow_dir.join("data");
        match descriptor.format {
            DataFormat::Video | DataFormat::Data => {
                let grain_count = match descriptor.geometry {
                    Geometry::Video { grain_count, .. } => grain_count,
                    Geometry::Data { grain_count } => grain_count,
                    _ => return Err(MxlError::new(StatusCode::InvalidArg, "geometry mismatch")),
                };
                let slice_sizes = [0u32; layout::MAX_PLANES_PER_GRAIN];
                let mut segment =
                    SharedSegment::create_exclusive(&data_path, layout::FLOW_INFO_SIZE as u64)?;
                let inode = segment.inode()?;
                unsafe {
                    FlowInfo::init_discrete(
                        segment.as_mut_ptr() as *mut FlowInfo,
                        descriptor.id,
                        inode,
                        descriptor.rate,
                        slice_sizes,
                        grain_count,
                        1,
                        1,
                    );
                }

                fs::create_dir_all(flow_dir.join("grains")).map_err(MxlError::from)?;
                let payload_size = 0u64;
                let mut grains = Vec::with_capacity(grain_count as usize);
                for slot in 0..grain_count {
                    let path = Self::grain_path(&flow_dir, slot);
                    let grain_size = layout::grain_file_size(payload_size);
                    let mut grain_segment = SharedSegment::create_exclusive(&path, grain_size)?;
                    let grain_info = layout::GrainInfo::init(payload_size, 1);
                    unsafe {
                        std::ptr::write(
                            grain_segment.as_mut_ptr() as *mut layout::GrainInfo,
                            grain_info,
                        );
                    }
                    grains.push(grain_segment);
                }

                OpenOptions::new()
                    .create(true)
                    .write(true)
                    .open(flow_dir.join("access"))
                    .map_err(MxlError::from)?;

                Ok(FlowData::Discrete(DiscreteFlowData { data: segment, grains }))
            }
            DataFormat::Audio => {
                let Geometry::Audio { channel_count, buffer_length, sample_size_bytes } =
                    descriptor.geometry
                else {
                    return Err(MxlError::new(StatusCode::InvalidArg, "geometry mismatch"));
                };
                let payload_bytes =
                    channel_count as u64 * buffer_length as u64 * sample_size_bytes as u64;
                let mut segment = SharedSegment::create_exclusive(
                    &data_path,
                    layout::FLOW_INFO_SIZE as u64 + payload_bytes,
                )?;
                let inode = segment.inode()?;
                unsafe {
                    FlowInfo::init_continuous(
                        segment.as_mut_ptr() as *mut FlowInfo,
                        descriptor.id,
                        inode,
                        descriptor.rate,
                        channel_count,
                        buffer_length,
                        sample_size_bytes,
                        1,
                        1,
                    );
                }

                OpenOptions::new()
                    .create(true)
                    .write(true)
                    .open(flow_dir.join("access"))
                    .map_err(MxlError::from)?;

                Ok(FlowData::Continuous(ContinuousFlowData { data: segment }))
            }
        }
    }

    /// Opens an existing flow by UUID. `exclusive` selects the writer's
    /// exclusive lock over the reader's shared lock.
    pub fn open(&self, id: Uuid, exclusive: bool) -> Result<FlowData> {
        let flow_dir = self.flow_dir(id);
        let data_path = flow_dir.join("data");
        if !data_path.exists() {
            return Err(MxlError::new(StatusCode::FlowNotFound, "flow does not exist"));
        }

        let segment = if exclusive {
            open_exclusive(&data_path)?
        } else {
            SharedSegment::open_shared(&data_path)?
        };

        let format = {
            let info = unsafe { &*(segment.as_ptr() as *const FlowInfo) };
            info.validate().map_err(|msg| MxlError::new(StatusCode::FlowInvalid, msg))?;
            info.common.format
        };

        if format == layout::DataFormatTag::Audio as u32 {
            return Ok(FlowData::Continuous(ContinuousFlowData { data: segment }));
        }

        let grain_count = {
            let info = unsafe { &*(segment.as_ptr() as *const FlowInfo) };
            unsafe { info.as_discrete().grain_count }
        };
        let mut grains = Vec::with_capacity(grain_count as usize);
        for slot in 0..grain_count {
            let path = Self::grain_path(&flow_dir, slot);
            let grain_segment = if exclusive {
                open_exclusive(&path)?
            } else {
                SharedSegment::open_shared(&path)?
            };
            grains.push(grain_segment);
        }
        Ok(FlowData::Discrete(DiscreteFlowData { data: segment, grains }))
    }

    /// Destroys a flow's on-disk tree. Caller must already hold the
    /// exclusive lock granted by `open(id, true)`.
    pub fn destroy(&self, id: Uuid) -> Result<()> {
        let flow_dir = self.flow_dir(id);
        fs::remove_dir_all(&flow_dir).map_err(MxlError::from)
    }

    pub fn list(&self) -> Result<Vec<Uuid>> {
        let mut ids = Vec::new();
        let entries = fs::read_dir(&self.domain).map_err(MxlError::from)?;
        for entry in entries {
            let entry = entry.map_err(MxlError::from)?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".mxl-flow") {
                if let Ok(id) = Uuid::parse_str(stem) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    pub fn access_path(&self, id: Uuid) -> PathBuf {
        self.flow_dir(id).join("access")
    }

    pub fn data_path(&self, id: Uuid) -> PathBuf {
        self.flow_dir(id).join("data")
    }
}

fn open_exclusive(path: &Path) -> Result<SharedSegment> {
    SharedSegment::open_rw_unlocked(path).and_then(|mut seg| {
        seg.make_exclusive()?;
        Ok(seg)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mxl_clock::Rate;

    fn descriptor() -> ValidatedDescriptor {
        ValidatedDescriptor {
            id: Uuid::new_v4(),
            format: DataFormat::Video,
            rate: Rate::new(25, 1).unwrap(),
            geometry: Geometry::Video { width: 1920, height: 1080, grain_count: 8 },
        }
    }

    #[test]
    fn create_then_open_discrete_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlowStore::new(dir.path());
        let desc = descriptor();
        {
            let data = store.create(&desc).unwrap();
            assert!(matches!(data, FlowData::Discrete(_)));
        }
        let data = store.open(desc.id, false).unwrap();
        assert!(matches!(data, FlowData::Discrete(_)));
    }

    #[test]
    fn list_returns_created_flow() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlowStore::new(dir.path());
        let desc = descriptor();
        let _data = store.create(&desc).unwrap();
        let ids = store.list().unwrap();
        assert_eq!(ids, vec![desc.id]);
    }

    #[test]
    fn open_missing_flow_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlowStore::new(dir.path());
        let err = store.open(Uuid::new_v4(), false).unwrap_err();
        assert_eq!(err.code, mxl_status::StatusCode::FlowNotFound);
    }

    #[test]
    fn grain_count_is_taken_from_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlowStore::new(dir.path());
        let mut desc = descriptor();
        desc.geometry = Geometry::Video { width: 1920, height: 1080, grain_count: 4 };
        let data = store.create(&desc).unwrap();
        let FlowData::Discrete(d) = data else { unreachable!() };
        assert_eq!(unsafe { d.info().as_discrete().grain_count }, 4);
    }

    #[test]
    fn buffer_length_is_taken_from_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlowStore::new(dir.path());
        let desc = ValidatedDescriptor {
            id: Uuid::new_v4(),
            format: DataFormat::Audio,
            rate: Rate::new(48_000, 1).unwrap(),
            geometry: Geometry::Audio { channel_count: 2, buffer_length: 1024, sample_size_bytes: 4 },
        };
        let data = store.create(&desc).unwrap();
        let FlowData::Continuous(d) = data else { unreachable!() };
        assert_eq!(unsafe { d.info().as_continuous().buffer_length }, 1024);
    }
}
