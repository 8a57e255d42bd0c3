//! Per-process handle over a domain: opens flows by UUID, runs garbage
//! collection, and merges domain-level and instance-level options.

use std::path::{Path, PathBuf};
use std::time::Duration;

use mxl_clock::wall_now_ns;
use mxl_descriptor::{DomainOptions, ValidatedDescriptor};
use mxl_status::Result;
use uuid::Uuid;

use crate::data::FlowData;
use crate::reader::{ContinuousFlowReader, DiscreteFlowReader, FlowReader};
use crate::store::FlowStore;
use crate::writer::{ContinuousFlowWriter, DiscreteFlowWriter, FlowWriter};

pub struct Instance {
    store: FlowStore,
    options: DomainOptions,
}

impl Instance {
    /// Opens `domain`, reading its `.options` file if present. An
    /// instance-supplied `history_duration_ns` is accepted for API
    /// compatibility but always overridden by the domain's own value.
    pub fn open(domain: impl Into<PathBuf>, _instance_history_duration_ns: Option<u64>) -> Self {
        let domain = domain.into();
        let options = match std::fs::read_to_string(domain.join(".options")) {
            Ok(json) => DomainOptions::parse(&json),
            Err(_) => DomainOptions::default(),
        };
        if _instance_history_duration_ns.is_some() {
            tracing::debug!("instance-level history_duration_ns ignored; domain file wins");
        }
        Self { store: FlowStore::new(domain), options }
    }

    pub fn domain(&self) -> &Path {
        self.store.domain()
    }

    pub fn history_duration_ns(&self) -> u64 {
        self.options.history_duration_ns
    }

    pub fn create_flow(&self, descriptor: &ValidatedDescriptor) -> Result<()> {
        self.store.create(descriptor)?;
        Ok(())
    }

    pub fn create_flow_writer(&self, id: Uuid) -> Result<FlowWriter> {
        match self.store.open(id, true)? {
            FlowData::Discrete(d) => Ok(FlowWriter::Discrete(DiscreteFlowWriter::new(d))),
            FlowData::Continuous(c) => Ok(FlowWriter::Continuous(ContinuousFlowWriter::new(c))),
        }
    }

    pub fn create_flow_reader(&self, id: Uuid) -> Result<FlowReader> {
        let data_path = self.store.data_path(id);
        let access_path = self.store.access_path(id);
        match self.store.open(id, false)? {
            FlowData::Discrete(d) => {
                Ok(FlowReader::Discrete(DiscreteFlowReader::new(d, data_path, access_path)))
            }
            FlowData::Continuous(c) => {
                Ok(FlowReader::Continuous(ContinuousFlowReader::new(c, data_path, access_path)))
            }
        }
    }

    pub fn list_flows(&self) -> Result<Vec<Uuid>> {
        self.store.list()
    }

    pub fn destroy_flow(&self, id: Uuid) -> Result<()> {
        self.store.destroy(id)
    }

    /// Destroys every flow whose read and write activity are both older
    /// than the domain's history duration and for which no other holder
    /// still owns a shared lock. Returns the UUIDs actually destroyed.
    pub fn garbage_collect(&self) -> Vec<Uuid> {
        let mut destroyed = Vec::new();
        let Ok(ids) = self.store.list() else { return destroyed };
        let now = wall_now_ns();
        let threshold = Duration::from_nanos(self.options.history_duration_ns).as_nanos() as u64;

        for id in ids {
            let Ok(mut data) = self.store.open(id, false) else { continue };
            let info = data.info();
            let last_write = info.common.last_write_time.load(std::sync::atomic::Ordering::Acquire);
            let last_read = info.common.last_read_time.load(std::sync::atomic::Ordering::Acquire);
            let stale = now.saturating_sub(last_write) > threshold
                && now.saturating_sub(last_read) > threshold;
            if !stale {
                continue;
            }

            let can_lock = data.make_exclusive();
            drop(data);
            if can_lock && self.store.destroy(id).is_ok() {
                destroyed.push(id);
            }
        }
        destroyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mxl_clock::Rate;
    use mxl_descriptor::{DataFormat, Geometry};

    #[test]
    fn garbage_collect_leaves_fresh_flows_alone() {
        let dir = tempfile::tempdir().unwrap();
        let instance = Instance::open(dir.path(), None);
        let desc = ValidatedDescriptor {
            id: Uuid::new_v4(),
            format: DataFormat::Video,
            rate: Rate::new(25, 1).unwrap(),
            geometry: Geometry::Video { width: 1920, height: 1080, grain_count: 8 },
        };
        instance.create_flow(&desc).unwrap();
        let destroyed = instance.garbage_collect();
        assert!(destroyed.is_empty());
        assert_eq!(instance.list_flows().unwrap(), vec![desc.id]);
    }

    #[test]
    fn domain_options_override_instance_supplied_value() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".options"),
            r#"{"urn:x-mxl:option:history_duration/v1.0": 5000000}"#,
        )
        .unwrap();
        let instance = Instance::open(dir.path(), Some(999_000_000));
        assert_eq!(instance.history_duration_ns(), 5_000_000);
    }
}
