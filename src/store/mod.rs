//! Persistence layer: libSQL-backed storage for campaigns, runs, contacts,
//! and the outbound ledger.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, OutboundResult};
