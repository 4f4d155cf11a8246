//! Campaign Engine: prompt → targeted contacts → generated content →
//! human approval → idempotent multi-channel dispatch.

pub mod api;
pub mod approval;
pub mod campaign;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod providers;
pub mod stages;
pub mod store;
