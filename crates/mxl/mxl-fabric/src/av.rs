//! Address vector: maps `FabricAddress` values inserted by the caller to
//! the short, provider-internal addresses endpoints use in fi_addr_t-
//! style targeted operations. Only meaningful for unconnected (datagram)
//! endpoints; the software tcp provider is connection-oriented, so
//! insertion here is bookkeeping rather than a transport necessity.

use std::collections::HashMap;

use crate::address::FabricAddress;

pub type ShortAddress = u64;

#[derive(Default)]
pub struct AddressVector {
    next: ShortAddress,
    forward: HashMap<FabricAddress, ShortAddress>,
    reverse: HashMap<ShortAddress, FabricAddress>,
}

impl AddressVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `addr`, returning its short address. Inserting the same
    /// address twice returns the same short address.
    pub fn insert(&mut self, addr: FabricAddress) -> ShortAddress {
        if let Some(existing) = self.forward.get(&addr) {
            return *existing;
        }
        self.next += 1;
        let short = self.next;
        self.reverse.insert(short, addr.clone());
        self.forward.insert(addr, short);
        short
    }

    pub fn remove(&mut self, short: ShortAddress) {
        if let Some(addr) = self.reverse.remove(&short) {
            self.forward.remove(&addr);
        }
    }

    pub fn resolve(&self, short: ShortAddress) -> Option<&FabricAddress> {
        self.reverse.get(&short)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_insert_of_same_address_is_stable() {
        let mut av = AddressVector::new();
        let addr = FabricAddress::new(b"127.0.0.1:9000".to_vec());
        let a = av.insert(addr.clone());
        let b = av.insert(addr.clone());
        assert_eq!(a, b);
        assert_eq!(av.resolve(a), Some(&addr));
    }

    #[test]
    fn remove_drops_both_directions() {
        let mut av = AddressVector::new();
        let addr = FabricAddress::new(b"127.0.0.1:9001".to_vec());
        let short = av.insert(addr);
        av.remove(short);
        assert_eq!(av.resolve(short), None);
    }
}
