//! Chunked point cloud processing: format backends, a typed point store,
//! configurable stages and a parallel executor.
pub mod attribute;
pub mod backend;
pub mod bounds;
pub mod chunking;
pub mod config;
pub mod error;
pub mod filters;
pub mod header;
pub mod parallel;
pub mod pipeline;
pub mod point_cloud;
pub mod report;
pub mod stages;

pub use attribute::{Attribute, AttributeSchema, AttributeType};
pub use backend::{BackendKind, BackendOptions, FormatBackend, LasBackend, PcdBackend};
pub use bounds::Bounds;
pub use chunking::{Chunk, ChunkManager, ChunkingOptions};
pub use config::{PipelineConfig, ProcessingOptions};
pub use error::{ChunkError, PipelineError, Result};
pub use header::Header;
pub use parallel::{FixedParallelism, ParallelismProvider, SystemParallelism};
pub use pipeline::{Pipeline, PipelineExecutor};
pub use point_cloud::PointCloud;
pub use report::{ChunkOutcome, ChunkStatus, RunReport};
pub use stages::{Stage, StageOutput, StageParameters};
