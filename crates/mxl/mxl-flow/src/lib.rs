//! The local shared-memory flow plane: on-disk layout, flow lifecycle,
//! and the writer/reader synchronization protocol.

mod data;
mod instance;
mod layout;
mod reader;
mod store;
mod writer;

pub use data::{ContinuousFlowData, DiscreteFlowData, FlowData};
pub use instance::Instance;
pub use layout::{
    CommonFlowInfo, ContinuousFlowInfo, DataFormatTag, DiscreteFlowInfo, FlowInfo, GrainInfo,
    PayloadLocation, FLOW_INFO_SIZE, GRAIN_FLAG_INVALID, GRAIN_INFO_SIZE, MAX_PLANES_PER_GRAIN,
};
pub use reader::{ContinuousFlowReader, DiscreteFlowReader, FlowReader};
pub use store::FlowStore;
pub use writer::{ContinuousFlowWriter, DiscreteFlowWriter, FlowWriter, Fragment, GrainWriteHandle};
