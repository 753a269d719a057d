pub mod pipeline;
pub mod store;

pub use pipeline::{LeadPipeline, PipelineSettings};
pub use store::PgLeadStore;
