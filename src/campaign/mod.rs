//! Campaign domain types.

pub mod contact;
pub mod model;

pub use contact::{ColumnSamples, Contact, FilterField, TargetFilters};
pub use model::{
    Campaign, CampaignProfile, Channel, ChannelTemplate, ContentBundle, PipelineRun,
    PipelineState, StageLogEntry, StageName, StageStatus,
};
