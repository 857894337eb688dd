use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("File or pipe could not be read: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse input JSON: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Unknown instance index: {0}")]
    UnknownInstanceIndex(i32),

    #[error("Unknown region index: {0}")]
    UnknownRegionIndex(i32),

    #[error("Unknown instance name: {0}")]
    UnknownInstanceName(String),

    #[error("Unknown region name: {0}")]
    UnknownRegionName(String),

    #[error("Transmission size distribution for '{from_instance}' to '{to_instance}' is empty, this should be impossible")]
    EmptySizeDistribution { from_instance: String, to_instance: String },

    #[error("Transmission latency distribution for '{from_instance}' to '{to_instance}' for '{from_region}' to '{to_region}' is empty, this should be impossible")]
    EmptyLatencyDistribution { from_instance: String, to_instance: String, from_region: String, to_region: String },

    #[error("Start hop latency distribution for home region is empty, this should be impossible")]
    EmptyStartHopLatencyDistribution,

    #[error("Instance '{instance}' has no runtime data in home region '{region}', this should be impossible")]
    MissingRuntimeData { instance: String, region: String },

    #[error("Instance '{instance}' has no auxiliary execution data for runtime key '{runtime_key}' in region '{region}'")]
    MissingAuxiliaryData { instance: String, region: String, runtime_key: String },

    #[error("Memory not found: {instance} - {provider}")]
    MissingMemoryConfig { instance: String, provider: String },

    #[error("vCPU count for instance '{instance}' in provider '{provider}' is not available")]
    MissingVcpuConfig { instance: String, provider: String },

    #[error("Sync node must have a predecessor that is not the start hop, destination instance: {to_instance}")]
    SyncNodeAfterVirtualStart { to_instance: i32 },

    #[error("Non-execution edge must have a predecessor that is not the start hop, destination instance: {to_instance}")]
    NonExecutionAfterVirtualStart { to_instance: i32 },

    #[error("Start hop cannot have a sync node as a successor")]
    StartHopIntoSyncNode,

    #[error("Region name cannot be none")]
    MissingRegionName,

    #[error("Topological order is empty")]
    EmptyTopologicalOrder,

    #[error("Invalid instance index key: {0}")]
    InvalidIndexKey(String),

    #[error("No metrics calculator: Setup has not been received yet")]
    NotSetUp,
}

pub type Result<T> = std::result::Result<T, Error>;
