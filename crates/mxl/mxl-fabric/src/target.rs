//! Passive side of the fabric mirror: binds a local endpoint, registers
//! a flow's `RegionGroup` for remote writes, and surfaces newly-arrived
//! grains to the caller.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use mxl_status::{MxlError, Result, StatusCode};
use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::provider::Provider;
use crate::queue::{Completion, CompletionQueue, EventQueue};
use crate::region::{MemoryRegistry, RegionGroup, RemoteRegion};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Listening,
    Connected,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderTag {
    Tcp,
    Verbs,
    Efa,
}

impl From<Provider> for ProviderTag {
    fn from(p: Provider) -> Self {
        match p {
            Provider::Tcp => ProviderTag::Tcp,
            Provider::Verbs => ProviderTag::Verbs,
            Provider::Efa => ProviderTag::Efa,
        }
    }
}

/// Out-of-band handle a target hands an initiator: which provider to
/// speak, where to connect, and which remote regions it may write to.
/// Serialized as opaque bytes; the canonical exchange form is base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetInfo {
    pub provider: ProviderTag,
    pub address: Vec<u8>,
    pub regions: Vec<RemoteRegion>,
}

impl TargetInfo {
    pub fn to_base64(&self) -> Result<String> {
        let bytes = bincode::serialize(self)
            .map_err(|e| MxlError::with_source(StatusCode::Internal, "encode target info", e))?;
        Ok(STANDARD.encode(bytes))
    }

    pub fn from_base64(data: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(data)
            .map_err(|e| MxlError::with_source(StatusCode::InvalidArg, "malformed target info", e))?;
        bincode::deserialize(&bytes)
            .map_err(|e| MxlError::with_source(StatusCode::InvalidArg, "malformed target info", e))
    }
}

pub struct FabricTarget {
    state: TargetState,
    provider: Provider,
    endpoint: Endpoint,
    registry: MemoryRegistry,
    remote_regions: Vec<RemoteRegion>,
}

impl FabricTarget {
    /// Binds to a local ephemeral port on the chosen provider and
    /// registers `regions` for write/remote-write access.
    pub fn setup(provider: Provider, regions: RegionGroup) -> Result<Self> {
        crate::provider::open(provider)?;
        let mut endpoint = Endpoint::create()?;
        endpoint.bind_cq(Rc::new(RefCell::new(CompletionQueue::new())));
        endpoint.bind_eq(Rc::new(RefCell::new(EventQueue::new())));
        endpoint.enable()?;
        let mut registry = MemoryRegistry::new();
        let (_locals, remotes) = registry.register(&regions);
        Ok(Self { state: TargetState::Listening, provider, endpoint, registry, remote_regions: remotes })
    }

    pub fn state(&self) -> TargetState {
        self.state
    }

    pub fn target_info(&self) -> Result<TargetInfo> {
        Ok(TargetInfo {
            provider: self.provider.into(),
            address: self.endpoint.local_address()?.as_bytes().to_vec(),
            regions: self.remote_regions.clone(),
        })
    }

    /// Advances the accept handshake. Queue draining happens in
    /// [`try_new_grain`], the single per-call consumer of both queues.
    ///
    /// [`try_new_grain`]: Self::try_new_grain
    pub fn make_progress(&mut self) -> Result<()> {
        if self.state == TargetState::Listening {
            match self.endpoint.accept() {
                Ok(()) => self.state = TargetState::Connected,
                Err(e) if e.code == StatusCode::NotReady => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Dequeues one data completion caused by a remote write, if any,
    /// returning the grain index carried as imm-data.
    pub fn try_new_grain(&mut self) -> Result<Option<u64>> {
        self.make_progress()?;
        let (completion, event) = self.endpoint.read_queues(&self.registry)?;
        if let Some(crate::queue::Event::Shutdown { .. }) = event {
            self.state = TargetState::Shutdown;
        }
        match completion {
            Some(Completion::Data { remote_write: true, imm_data: Some(index), .. }) => Ok(Some(index)),
            Some(Completion::Error { message, .. }) => Err(MxlError::new(StatusCode::Internal, message)),
            _ => Ok(None),
        }
    }

    pub fn wait_for_new_grain(&mut self, timeout: Duration) -> Result<u64> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(index) = self.try_new_grain()? {
                return Ok(index);
            }
            if Instant::now() >= deadline {
                return Err(MxlError::new(StatusCode::Timeout, "no grain arrived"));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;

    #[test]
    fn target_info_round_trips_through_base64() {
        let target = FabricTarget::setup(Provider::Tcp, RegionGroup(vec![Region::host(0, 64)])).unwrap();
        let info = target.target_info().unwrap();
        let encoded = info.to_base64().unwrap();
        let decoded = TargetInfo::from_base64(&encoded).unwrap();
        assert_eq!(decoded.address, info.address);
        assert_eq!(decoded.regions, info.regions);
    }

    #[test]
    fn wait_for_new_grain_times_out_with_no_initiator() {
        let mut target = FabricTarget::setup(Provider::Tcp, RegionGroup(vec![Region::host(0, 64)])).unwrap();
        let err = target.wait_for_new_grain(Duration::from_millis(20)).unwrap_err();
        assert_eq!(err.code, StatusCode::Timeout);
    }
}
