//! Dispatch: approved content → provider sends, with an idempotent ledger
//! and the engagement analytics read from it.

pub mod analytics;
pub mod engine;
pub mod model;
pub mod substitution;

pub use analytics::{CampaignAnalytics, ChannelBreakdown, HourlyActivity, LedgerStats, TopContact};
pub use engine::{DispatchReport, DispatchSettings, Dispatcher, MessagePreview};
pub use model::{EngagementEvent, OutboundMessage, SendStatus};
pub use substitution::Substitution;
