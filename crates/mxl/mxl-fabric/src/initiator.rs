//! Active side of the fabric mirror: connects to one or more targets
//! advertised via `TargetInfo` and drives one-sided writes per grain.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use mxl_status::{MxlError, Result, StatusCode};

use crate::address::FabricAddress;
use crate::endpoint::{Endpoint, EndpointId};
use crate::provider::Provider;
use crate::queue::{CompletionQueue, Event, EventQueue};
use crate::region::{LocalRegion, MemoryRegistry, RegionGroup, RemoteRegion};
use crate::target::TargetInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetConnState {
    PendingConnect,
    Connected,
}

struct TargetHandle {
    endpoint: Endpoint,
    state: TargetConnState,
    remote_regions: Vec<RemoteRegion>,
}

/// Holds a map from target identity to per-target connection state and
/// drives writes across all connected targets.
pub struct FabricInitiator {
    provider: Provider,
    local_regions: Vec<LocalRegion>,
    registry: MemoryRegistry,
    targets: HashMap<Vec<u8>, TargetHandle>,
}

impl FabricInitiator {
    /// Opens a local endpoint prototype with `regions` registered for
    /// local write access.
    pub fn setup(provider: Provider, regions: RegionGroup) -> Result<Self> {
        crate::provider::open(provider)?;
        let mut registry = MemoryRegistry::new();
        let (locals, _remotes) = registry.register(&regions);
        Ok(Self { provider, local_regions: locals, registry, targets: HashMap::new() })
    }

    /// Creates a new endpoint for `info`'s address, inserts it into the
    /// targets map, and initiates a connection. Idempotent: re-adding
    /// the same target address is a no-op.
    pub fn add_target(&mut self, info: &TargetInfo) -> Result<()> {
        if self.targets.contains_key(&info.address) {
            return Ok(());
        }
        let mut endpoint = Endpoint::create()?;
        endpoint.bind_cq(Rc::new(RefCell::new(CompletionQueue::new())));
        endpoint.bind_eq(Rc::new(RefCell::new(EventQueue::new())));
        endpoint.enable()?;
        endpoint.connect(&FabricAddress::new(info.address.clone()))?;
        self.targets.insert(
            info.address.clone(),
            TargetHandle { endpoint, state: TargetConnState::PendingConnect, remote_regions: info.regions.clone() },
        );
        Ok(())
    }

    /// Issues a shutdown on the target's endpoint and drops its state.
    pub fn remove_target(&mut self, info: &TargetInfo) -> Result<()> {
        if let Some(mut handle) = self.targets.remove(&info.address) {
            handle.endpoint.shutdown()?;
        }
        Ok(())
    }

    /// Posts an RMA write of `payload` for `index` to every connected
    /// target. Returns `NotReady` if any added target has not yet
    /// completed its connection handshake.
    pub fn transfer_grain(&mut self, index: usize, payload: &[u8]) -> Result<()> {
        if self.targets.values().any(|t| t.state != TargetConnState::Connected) {
            return Err(MxlError::new(StatusCode::NotReady, "target connection handshake incomplete"));
        }
        let local = self
            .local_regions
            .get(index)
            .ok_or_else(|| MxlError::new(StatusCode::InvalidArg, "no local region for index"))?;
        for handle in self.targets.values_mut() {
            let remote = handle
                .remote_regions
                .get(index)
                .ok_or_else(|| MxlError::new(StatusCode::InvalidArg, "no remote region for index"))?;
            handle.endpoint.write(local, payload, remote, Some(index as u64))?;
        }
        Ok(())
    }

    /// Drains both queues on every target endpoint, advancing pending
    /// connect transitions. Returns `NotReady` if at least one target
    /// is still connecting and nothing new arrived this call.
    pub fn make_progress(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut connected_ids: Vec<EndpointId> = Vec::new();
        loop {
            connected_ids.clear();
            for handle in self.targets.values_mut() {
                let (_completion, event) = handle.endpoint.read_queues(&self.registry)?;
                if let Some(Event::Connected { endpoint }) = event {
                    connected_ids.push(endpoint);
                }
            }
            if !connected_ids.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        for handle in self.targets.values_mut() {
            if connected_ids.contains(&handle.endpoint.id()) {
                handle.state = TargetConnState::Connected;
            }
        }

        if self.targets.values().all(|t| t.state == TargetConnState::Connected) {
            Ok(())
        } else {
            Err(MxlError::new(StatusCode::NotReady, "work remains"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;
    use crate::target::FabricTarget;

    #[test]
    fn transfer_grain_before_connect_is_not_ready() {
        let mut initiator = FabricInitiator::setup(Provider::Tcp, RegionGroup(vec![Region::host(0, 16)])).unwrap();
        let target = FabricTarget::setup(Provider::Tcp, RegionGroup(vec![Region::host(0, 16)])).unwrap();
        initiator.add_target(&target.target_info().unwrap()).unwrap();
        let err = initiator.transfer_grain(0, &[0u8; 16]).unwrap_err();
        assert_eq!(err.code, StatusCode::NotReady);
    }
}
