//! The RDMA fabric mirror: providers, addresses, endpoints, and memory
//! regions needed to stand up a one-sided-write path between a flow's
//! writer and its fabric-side consumers. Built on a software `tcp`
//! provider, since libfabric itself is out of tree here.

mod address;
mod av;
mod endpoint;
mod initiator;
mod provider;
mod queue;
mod region;
mod target;

pub use address::FabricAddress;
pub use av::{AddressVector, ShortAddress};
pub use endpoint::{Endpoint, EndpointId, EndpointState};
pub use initiator::FabricInitiator;
pub use provider::{open, FabricInfo, FabricOptionSet, Provider, CAPS_MSG, CAPS_RMA};
pub use queue::{Completion, CompletionQueue, Event, EventQueue};
pub use region::{LocalRegion, Location, MemoryRegistry, Region, RegionGroup, RemoteRegion};
pub use target::{FabricTarget, ProviderTag, TargetInfo, TargetState};
