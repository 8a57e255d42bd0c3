//! Enumerates supported RDMA transports and the capability chains
//! negotiated for them. The core defines the vocabulary; it does not
//! mandate libfabric.

use mxl_status::{MxlError, Result, StatusCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Tcp,
    Verbs,
    Efa,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Tcp => "tcp",
            Provider::Verbs => "verbs",
            Provider::Efa => "efa",
        }
    }
}

pub const CAPS_RMA: u64 = 1 << 0;
pub const CAPS_MSG: u64 = 1 << 1;

/// One negotiated option set within a `FabricInfo` chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FabricOptionSet {
    pub provider: Provider,
    pub caps: u64,
}

/// A provider-shaped capability descriptor: a chain of option sets an
/// initiator walks to pick one compatible with what a target advertised.
#[derive(Debug, Clone, Default)]
pub struct FabricInfo {
    options: Vec<FabricOptionSet>,
}

impl FabricInfo {
    pub fn new() -> Self {
        Self { options: Vec::new() }
    }

    pub fn push(&mut self, set: FabricOptionSet) {
        self.options.push(set);
    }

    pub fn options(&self) -> &[FabricOptionSet] {
        &self.options
    }

    /// Picks the first option set offering `provider`.
    pub fn select(&self, provider: Provider) -> Option<FabricOptionSet> {
        self.options.iter().copied().find(|o| o.provider == provider)
    }
}

/// Opens a fabric for `provider`. Only `Tcp` is backed by an in-tree
/// transport; `Verbs`/`Efa` need libfabric, which is out of tree here.
pub fn open(provider: Provider) -> Result<FabricInfo> {
    match provider {
        Provider::Tcp => {
            let mut info = FabricInfo::new();
            info.push(FabricOptionSet { provider, caps: CAPS_RMA | CAPS_MSG });
            Ok(info)
        }
        Provider::Verbs | Provider::Efa => {
            tracing::warn!(provider = provider.name(), "provider requires libfabric, not built");
            Err(MxlError::new(
                StatusCode::Internal,
                format!("{} provider requires libfabric, not built", provider.name()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_opens_with_rma_and_msg_caps() {
        let info = open(Provider::Tcp).unwrap();
        let set = info.select(Provider::Tcp).unwrap();
        assert_eq!(set.caps, CAPS_RMA | CAPS_MSG);
    }

    #[test]
    fn verbs_and_efa_are_refused() {
        assert_eq!(open(Provider::Verbs).unwrap_err().code, StatusCode::Internal);
        assert_eq!(open(Provider::Efa).unwrap_err().code, StatusCode::Internal);
    }
}
