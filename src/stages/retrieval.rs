//! Retrieval: filters → ranked contacts, never empty while contacts exist.
//!
//! Tier 1 queries with every filter. Tier 2 drops one non-empty filter at a
//! time (company, location, category, role) and stops at the first hit.
//! Tier 3 returns the top contacts by score with no filter at all.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Stage, StageOutput, StageResult};
use crate::campaign::{Campaign, Contact, FilterField, PipelineRun, PipelineState, StageName, TargetFilters};
use crate::error::{DatabaseError, PipelineError};
use crate::store::Database;

pub struct RetrievalStage {
    db: Arc<dyn Database>,
    fallback_limit: usize,
}

impl RetrievalStage {
    pub fn new(db: Arc<dyn Database>, fallback_limit: usize) -> Self {
        Self { db, fallback_limit }
    }

    pub async fn retrieve(&self, filters: &TargetFilters) -> Result<Vec<Contact>, DatabaseError> {
        let mut relaxed = normalize_filters(filters);
        let contacts = self.db.find_contacts(&relaxed, None).await?;
        if !contacts.is_empty() {
            return Ok(contacts);
        }

        for field in FilterField::RELAXATION_ORDER {
            if relaxed.terms(field).is_empty() {
                continue;
            }
            info!(filter = field.column(), terms = ?relaxed.terms(field), "No contacts, relaxing filter");
            relaxed.clear(field);
            let contacts = self.db.find_contacts(&relaxed, None).await?;
            if !contacts.is_empty() {
                return Ok(contacts);
            }
        }

        warn!(limit = self.fallback_limit, "All filters exhausted, returning top contacts");
        self.db
            .find_contacts(&TargetFilters::default(), Some(self.fallback_limit))
            .await
    }
}

/// Singularize role terms so plural job titles still match.
fn normalize_filters(filters: &TargetFilters) -> TargetFilters {
    let mut normalized = filters.clone();
    normalized.role = filters
        .role
        .iter()
        .map(|term| singularize(term))
        .filter(|term| !term.is_empty())
        .collect();
    normalized
}

/// `"Engineers"` → `"engineer"`, `"CTOs"` → `"cto"`.
pub fn singularize(term: &str) -> String {
    let t = term.trim().to_lowercase();
    let len = t.chars().count();
    if len > 4 && t.ends_with("es") {
        return t[..t.len() - 2].to_string();
    }
    if len > 3 && t.ends_with('s') {
        return t[..t.len() - 1].to_string();
    }
    t
}

#[async_trait]
impl Stage for RetrievalStage {
    fn name(&self) -> StageName {
        StageName::Retrieval
    }

    async fn execute(&self, campaign: &Campaign, run: &PipelineRun) -> Result<StageResult, PipelineError> {
        let filters = run.classification.clone().unwrap_or_default();
        let contacts = self.retrieve(&filters).await?;
        info!(campaign_id = %campaign.id, count = contacts.len(), "Contacts retrieved");
        Ok(StageResult::advance(
            StageOutput::Contacts(contacts),
            PipelineState::ContactsRetrieved,
        ))
    }
}
