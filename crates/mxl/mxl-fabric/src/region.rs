//! A flow's shared-memory footprint expressed as a `RegionGroup`, and
//! the `LocalRegion`/`RemoteRegion` views produced by registering it
//! with a provider.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Host,
    Cuda(u32),
}

#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub base: usize,
    pub size: usize,
    pub loc: Location,
}

impl Region {
    pub fn host(base: usize, size: usize) -> Self {
        Self { base, size, loc: Location::Host }
    }
}

/// An ordered list of regions describing a flow's footprint. Discrete
/// flows contribute one region per grain slot in slot order; continuous
/// flows contribute a single region covering the whole channel block.
#[derive(Debug, Clone, Default)]
pub struct RegionGroup(pub Vec<Region>);

impl RegionGroup {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Local descriptor used when posting a write: address, length and an
/// opaque registration key. The software provider keys writes by
/// `rkey` rather than a hardware descriptor.
#[derive(Debug, Clone, Copy)]
pub struct LocalRegion {
    pub addr: usize,
    pub len: usize,
    pub rkey: u64,
}

/// What gets advertised to a peer so it can target a write at this
/// region. `addr` carries the registered virtual address when the
/// provider uses one, zero otherwise (the software provider always
/// uses offset-0 semantics and resolves purely by `rkey`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRegion {
    pub addr: u64,
    pub len: u64,
    pub rkey: u64,
}

/// Process-local map from `rkey` to the raw memory a peer's write
/// should land at. Stands in for a provider's domain-level
/// registration table.
#[derive(Default)]
pub struct MemoryRegistry {
    next_rkey: u64,
    entries: HashMap<u64, (usize, usize)>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every region in `group`, in order, returning the local
    /// and remote views region `i` maps to region `i` on a peer that
    /// registered the same flow's layout.
    pub fn register(&mut self, group: &RegionGroup) -> (Vec<LocalRegion>, Vec<RemoteRegion>) {
        let mut locals = Vec::with_capacity(group.0.len());
        let mut remotes = Vec::with_capacity(group.0.len());
        for region in &group.0 {
            self.next_rkey += 1;
            let rkey = self.next_rkey;
            self.entries.insert(rkey, (region.base, region.size));
            locals.push(LocalRegion { addr: region.base, len: region.size, rkey });
            remotes.push(RemoteRegion { addr: 0, len: region.size as u64, rkey });
        }
        (locals, remotes)
    }

    pub fn resolve(&self, rkey: u64) -> Option<(usize, usize)> {
        self.entries.get(&rkey).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_assigns_distinct_rkeys_in_order() {
        let group = RegionGroup(vec![Region::host(0x1000, 64), Region::host(0x2000, 128)]);
        let mut registry = MemoryRegistry::new();
        let (locals, remotes) = registry.register(&group);
        assert_eq!(locals.len(), 2);
        assert_ne!(locals[0].rkey, locals[1].rkey);
        assert_eq!(remotes[0].len, 64);
        assert_eq!(remotes[1].len, 128);
        assert_eq!(registry.resolve(locals[0].rkey), Some((0x1000, 64)));
    }
}
