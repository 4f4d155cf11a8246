//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. All writes go through a
//! single async write lock so that multi-statement stage boundaries run as
//! one `BEGIN IMMEDIATE … COMMIT` without interleaving other writers on the
//! shared connection.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Value};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::campaign::{
    Campaign, Channel, ChannelTemplate, Contact, ContentBundle, FilterField, PipelineRun,
    PipelineState, StageLogEntry, TargetFilters,
};
use crate::dispatch::analytics::{
    BOUNCED_EVENTS, CLICKED_EVENTS, ChannelBreakdown, DELIVERED_EVENTS, DISPATCH_EVENTS,
    HourlyActivity, LedgerStats, OPENED_EVENTS, TopContact,
};
use crate::dispatch::model::{EngagementEvent, OutboundMessage, SendStatus};
use crate::error::DatabaseError;
use crate::stages::{StageCommit, StageOutput};
use crate::store::migrations;
use crate::store::traits::{Database, OutboundResult};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    // ── Write helpers ───────────────────────────────────────────────

    /// Single write statement under the write lock. Returns rows affected.
    async fn execute_locked(&self, op: &str, sql: &str, values: Vec<Value>) -> Result<u64, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        self.conn()
            .execute(sql, values)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))
    }

    async fn begin(&self, op: &str) -> Result<MutexGuard<'_, ()>, DatabaseError> {
        let guard = self.write_lock.lock().await;
        self.conn()
            .execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: begin: {e}")))?;
        Ok(guard)
    }

    async fn commit(&self, op: &str) -> Result<(), DatabaseError> {
        if let Err(e) = self.conn().execute("COMMIT", ()).await {
            self.rollback(op).await;
            return Err(DatabaseError::Query(format!("{op}: commit: {e}")));
        }
        Ok(())
    }

    async fn rollback(&self, op: &str) {
        if let Err(e) = self.conn().execute("ROLLBACK", ()).await {
            warn!(op = op, error = %e, "Rollback failed");
        }
    }

    /// Execute a statement inside an open transaction, rolling back on error.
    async fn tx_execute(&self, op: &str, sql: &str, values: Vec<Value>) -> Result<u64, DatabaseError> {
        match self.conn().execute(sql, values).await {
            Ok(n) => Ok(n),
            Err(e) => {
                self.rollback(op).await;
                Err(DatabaseError::Query(format!("{op}: {e}")))
            }
        }
    }

    /// Run several statements as one transaction.
    async fn execute_atomic(&self, op: &str, statements: Vec<(String, Vec<Value>)>) -> Result<(), DatabaseError> {
        let _guard = self.begin(op).await?;
        for (sql, values) in statements {
            self.tx_execute(op, &sql, values).await?;
        }
        self.commit(op).await
    }

    async fn query_all<T>(
        &self,
        op: &str,
        sql: &str,
        values: Vec<Value>,
        map: fn(&libsql::Row) -> Result<T, DatabaseError>,
    ) -> Result<Vec<T>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, values)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut out = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => out.push(map(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("{op}: {e}"))),
            }
        }
        Ok(out)
    }

    async fn query_one<T>(
        &self,
        op: &str,
        sql: &str,
        values: Vec<Value>,
        map: fn(&libsql::Row) -> Result<T, DatabaseError>,
    ) -> Result<Option<T>, DatabaseError> {
        Ok(self.query_all(op, sql, values, map).await?.into_iter().next())
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_datetime)
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> Value {
    match s {
        Some(s) => Value::Text(s.to_string()),
        None => Value::Null,
    }
}

fn opt_real(v: Option<f64>) -> Value {
    match v {
        Some(v) => Value::Real(v),
        None => Value::Null,
    }
}

fn opt_datetime(dt: Option<DateTime<Utc>>) -> Value {
    match dt {
        Some(dt) => Value::Text(dt.to_rfc3339()),
        None => Value::Null,
    }
}

fn text(s: impl Into<String>) -> Value {
    Value::Text(s.into())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_json_opt<T: serde::de::DeserializeOwned>(s: Option<String>) -> Result<Option<T>, DatabaseError> {
    match s {
        Some(s) if !s.is_empty() => serde_json::from_str(&s)
            .map(Some)
            .map_err(|e| DatabaseError::Serialization(e.to_string())),
        _ => Ok(None),
    }
}

fn value(row: &libsql::Row, idx: i32) -> Result<Value, DatabaseError> {
    row.get_value(idx)
        .map_err(|e| DatabaseError::Query(format!("column {idx}: {e}")))
}

fn col_text(row: &libsql::Row, idx: i32) -> Result<String, DatabaseError> {
    match value(row, idx)? {
        Value::Text(s) => Ok(s),
        other => Err(DatabaseError::Serialization(format!(
            "column {idx}: expected text, got {other:?}"
        ))),
    }
}

fn col_opt_text(row: &libsql::Row, idx: i32) -> Result<Option<String>, DatabaseError> {
    match value(row, idx)? {
        Value::Null => Ok(None),
        Value::Text(s) => Ok(Some(s)),
        other => Err(DatabaseError::Serialization(format!(
            "column {idx}: expected text, got {other:?}"
        ))),
    }
}

fn col_int(row: &libsql::Row, idx: i32) -> Result<i64, DatabaseError> {
    match col_opt_int(row, idx)? {
        Some(i) => Ok(i),
        None => Err(DatabaseError::Serialization(format!("column {idx}: unexpected null"))),
    }
}

fn col_opt_int(row: &libsql::Row, idx: i32) -> Result<Option<i64>, DatabaseError> {
    match value(row, idx)? {
        Value::Null => Ok(None),
        Value::Integer(i) => Ok(Some(i)),
        other => Err(DatabaseError::Serialization(format!(
            "column {idx}: expected integer, got {other:?}"
        ))),
    }
}

fn col_opt_real(row: &libsql::Row, idx: i32) -> Result<Option<f64>, DatabaseError> {
    match value(row, idx)? {
        Value::Null => Ok(None),
        Value::Real(f) => Ok(Some(f)),
        Value::Integer(i) => Ok(Some(i as f64)),
        other => Err(DatabaseError::Serialization(format!(
            "column {idx}: expected real, got {other:?}"
        ))),
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("bad uuid {s}: {e}")))
}

fn parse_enum<T: std::str::FromStr<Err = String>>(s: &str) -> Result<T, DatabaseError> {
    s.parse().map_err(DatabaseError::Serialization)
}

// ── Row mappers ─────────────────────────────────────────────────────

const CAMPAIGN_COLUMNS: &str = "id, name, prompt, company, campaign_purpose, target_audience, platform, product_link, approval_required, pipeline_state, pipeline_locked, generated_content, approved_by, approved_at, created_by, created_at, updated_at";

const RUN_COLUMNS: &str = "id, campaign_id, state, classification, contacts, channel_map, started_at, completed_at, error_message";

const STAGE_LOG_COLUMNS: &str = "id, run_id, campaign_id, stage, status, started_at, completed_at, duration_ms, error_message";

const CONTACT_COLUMNS: &str = "c.email, c.name, c.role, c.company, c.location, c.category, c.phone, c.preferred_time, c.email_click_rate, c.linkedin_click_rate, c.call_answer_rate, s.buying_probability";

const CONTACT_FROM: &str = "FROM contacts c LEFT JOIN icp_scores s ON s.contact_email = c.email";

const OUTBOUND_COLUMNS: &str = "id, campaign_id, contact_email, channel, payload, send_status, provider_message_id, error_message, sent_at, created_at";

const EVENT_COLUMNS: &str = "id, campaign_id, contact_email, channel, event_type, payload, occurred_at";

fn row_to_campaign(row: &libsql::Row) -> Result<Campaign, DatabaseError> {
    Ok(Campaign {
        id: parse_uuid(&col_text(row, 0)?)?,
        name: col_text(row, 1)?,
        prompt: col_text(row, 2)?,
        company: col_opt_text(row, 3)?,
        campaign_purpose: col_opt_text(row, 4)?,
        target_audience: col_opt_text(row, 5)?,
        platform: col_opt_text(row, 6)?,
        product_link: col_opt_text(row, 7)?,
        approval_required: col_int(row, 8)? != 0,
        pipeline_state: parse_enum(&col_text(row, 9)?)?,
        pipeline_locked: col_int(row, 10)? != 0,
        content: from_json_opt::<ContentBundle>(col_opt_text(row, 11)?)?,
        approved_by: col_opt_text(row, 12)?,
        approved_at: parse_optional_datetime(col_opt_text(row, 13)?),
        created_by: col_opt_text(row, 14)?,
        created_at: parse_datetime(&col_text(row, 15)?),
        updated_at: parse_datetime(&col_text(row, 16)?),
    })
}

fn row_to_run(row: &libsql::Row) -> Result<PipelineRun, DatabaseError> {
    Ok(PipelineRun {
        id: parse_uuid(&col_text(row, 0)?)?,
        campaign_id: parse_uuid(&col_text(row, 1)?)?,
        state: parse_enum(&col_text(row, 2)?)?,
        classification: from_json_opt(col_opt_text(row, 3)?)?,
        contacts: from_json_opt(col_opt_text(row, 4)?)?,
        channel_map: from_json_opt::<BTreeMap<String, Channel>>(col_opt_text(row, 5)?)?,
        started_at: parse_datetime(&col_text(row, 6)?),
        completed_at: parse_optional_datetime(col_opt_text(row, 7)?),
        error_message: col_opt_text(row, 8)?,
    })
}

fn row_to_stage_log(row: &libsql::Row) -> Result<StageLogEntry, DatabaseError> {
    Ok(StageLogEntry {
        id: parse_uuid(&col_text(row, 0)?)?,
        run_id: parse_uuid(&col_text(row, 1)?)?,
        campaign_id: parse_uuid(&col_text(row, 2)?)?,
        stage: parse_enum(&col_text(row, 3)?)?,
        status: parse_enum(&col_text(row, 4)?)?,
        started_at: parse_datetime(&col_text(row, 5)?),
        completed_at: parse_optional_datetime(col_opt_text(row, 6)?),
        duration_ms: col_opt_int(row, 7)?,
        error_message: col_opt_text(row, 8)?,
    })
}

fn row_to_contact(row: &libsql::Row) -> Result<Contact, DatabaseError> {
    Ok(Contact {
        email: col_text(row, 0)?,
        name: col_opt_text(row, 1)?,
        role: col_opt_text(row, 2)?,
        company: col_opt_text(row, 3)?,
        location: col_opt_text(row, 4)?,
        category: col_opt_text(row, 5)?,
        phone: col_opt_text(row, 6)?,
        preferred_time: col_opt_text(row, 7)?,
        email_click_rate: col_opt_real(row, 8)?,
        linkedin_click_rate: col_opt_real(row, 9)?,
        call_answer_rate: col_opt_real(row, 10)?,
        buying_probability: col_opt_real(row, 11)?,
    })
}

fn row_to_outbound(row: &libsql::Row) -> Result<OutboundMessage, DatabaseError> {
    let payload: String = col_text(row, 4)?;
    Ok(OutboundMessage {
        id: parse_uuid(&col_text(row, 0)?)?,
        campaign_id: parse_uuid(&col_text(row, 1)?)?,
        contact_email: col_text(row, 2)?,
        channel: parse_enum(&col_text(row, 3)?)?,
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        send_status: parse_enum::<SendStatus>(&col_text(row, 5)?)?,
        provider_message_id: col_opt_text(row, 6)?,
        error_message: col_opt_text(row, 7)?,
        sent_at: parse_optional_datetime(col_opt_text(row, 8)?),
        created_at: parse_datetime(&col_text(row, 9)?),
    })
}

fn row_to_event(row: &libsql::Row) -> Result<EngagementEvent, DatabaseError> {
    let payload: String = col_text(row, 5)?;
    Ok(EngagementEvent {
        id: parse_uuid(&col_text(row, 0)?)?,
        campaign_id: parse_uuid(&col_text(row, 1)?)?,
        contact_email: col_text(row, 2)?,
        channel: parse_enum(&col_text(row, 3)?)?,
        event_type: col_text(row, 4)?,
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        occurred_at: parse_datetime(&col_text(row, 6)?),
    })
}

/// Update of the latest run for a campaign, used to mirror lifecycle state.
const LATEST_RUN: &str =
    "(SELECT id FROM pipeline_runs WHERE campaign_id = ?1 ORDER BY started_at DESC LIMIT 1)";

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        migrations::run_migrations(self.conn()).await
    }

    // ── Campaigns ───────────────────────────────────────────────────

    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), DatabaseError> {
        let content = match &campaign.content {
            Some(bundle) => text(to_json(bundle)?),
            None => Value::Null,
        };
        self.execute_locked(
            "insert_campaign",
            &format!(
                "INSERT INTO campaigns ({CAMPAIGN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
            ),
            vec![
                text(campaign.id.to_string()),
                text(campaign.name.clone()),
                text(campaign.prompt.clone()),
                opt_text(campaign.company.as_deref()),
                opt_text(campaign.campaign_purpose.as_deref()),
                opt_text(campaign.target_audience.as_deref()),
                opt_text(campaign.platform.as_deref()),
                opt_text(campaign.product_link.as_deref()),
                Value::Integer(campaign.approval_required as i64),
                text(campaign.pipeline_state.as_str()),
                Value::Integer(campaign.pipeline_locked as i64),
                content,
                opt_text(campaign.approved_by.as_deref()),
                opt_datetime(campaign.approved_at),
                opt_text(campaign.created_by.as_deref()),
                text(campaign.created_at.to_rfc3339()),
                text(campaign.updated_at.to_rfc3339()),
            ],
        )
        .await?;

        debug!(campaign_id = %campaign.id, "Campaign inserted");
        Ok(())
    }

    async fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>, DatabaseError> {
        self.query_one(
            "get_campaign",
            &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1"),
            vec![text(id.to_string())],
            row_to_campaign,
        )
        .await
    }

    async fn list_campaigns(&self, limit: usize) -> Result<Vec<Campaign>, DatabaseError> {
        self.query_all(
            "list_campaigns",
            &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns ORDER BY created_at DESC LIMIT ?1"),
            vec![Value::Integer(limit as i64)],
            row_to_campaign,
        )
        .await
    }

    async fn try_lock_campaign(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let changed = self
            .execute_locked(
                "try_lock_campaign",
                "UPDATE campaigns SET pipeline_locked = 1, updated_at = ?2 \
                 WHERE id = ?1 AND pipeline_locked = 0 AND pipeline_state = 'created'",
                vec![text(id.to_string()), text(Utc::now().to_rfc3339())],
            )
            .await?;
        Ok(changed == 1)
    }

    async fn finish_pipeline(
        &self,
        campaign_id: Uuid,
        run_id: Uuid,
        state: PipelineState,
        error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.execute_atomic(
            "finish_pipeline",
            vec![
                (
                    "UPDATE campaigns SET pipeline_state = ?2, pipeline_locked = 0, updated_at = ?3 WHERE id = ?1".into(),
                    vec![text(campaign_id.to_string()), text(state.as_str()), text(now.clone())],
                ),
                (
                    "UPDATE pipeline_runs SET state = ?2, completed_at = ?3, error_message = ?4 WHERE id = ?1".into(),
                    vec![text(run_id.to_string()), text(state.as_str()), text(now), opt_text(error)],
                ),
            ],
        )
        .await?;

        debug!(campaign_id = %campaign_id, state = %state, "Pipeline finished, lock released");
        Ok(())
    }

    async fn advance_campaign_state(
        &self,
        id: Uuid,
        from: PipelineState,
        to: PipelineState,
    ) -> Result<bool, DatabaseError> {
        let op = "advance_campaign_state";
        let now = Utc::now().to_rfc3339();
        let _guard = self.begin(op).await?;

        let changed = self
            .tx_execute(
                op,
                "UPDATE campaigns SET pipeline_state = ?3, updated_at = ?4 WHERE id = ?1 AND pipeline_state = ?2",
                vec![text(id.to_string()), text(from.as_str()), text(to.as_str()), text(now.clone())],
            )
            .await?;
        if changed == 0 {
            self.rollback(op).await;
            return Ok(false);
        }

        let completed_at = if to.is_terminal() { text(now) } else { Value::Null };
        self.tx_execute(
            op,
            &format!(
                "UPDATE pipeline_runs SET state = ?2, completed_at = COALESCE(?3, completed_at) WHERE id = {LATEST_RUN}"
            ),
            vec![text(id.to_string()), text(to.as_str()), completed_at],
        )
        .await?;
        self.commit(op).await?;

        debug!(campaign_id = %id, from = %from, to = %to, "Campaign state advanced");
        Ok(true)
    }

    async fn approve_campaign(
        &self,
        id: Uuid,
        approved_by: &str,
        approved_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let op = "approve_campaign";
        let _guard = self.begin(op).await?;

        let changed = self
            .tx_execute(
                op,
                "UPDATE campaigns SET pipeline_state = 'approved', approved_by = ?2, approved_at = ?3, updated_at = ?3 WHERE id = ?1 AND pipeline_state = 'awaiting_approval'",
                vec![text(id.to_string()), text(approved_by), text(approved_at.to_rfc3339())],
            )
            .await?;
        if changed == 0 {
            self.rollback(op).await;
            return Ok(false);
        }

        self.tx_execute(
            op,
            &format!("UPDATE pipeline_runs SET state = 'approved' WHERE id = {LATEST_RUN}"),
            vec![text(id.to_string())],
        )
        .await?;
        self.commit(op).await?;
        Ok(true)
    }

    async fn update_channel_template(
        &self,
        id: Uuid,
        channel: Channel,
        template: &ChannelTemplate,
    ) -> Result<(), DatabaseError> {
        let changed = self
            .execute_locked(
                "update_channel_template",
                r#"UPDATE campaigns
                   SET generated_content = json_set(
                           COALESCE(generated_content, '{"templates":{},"contacts":{}}'),
                           '$.templates.' || ?2,
                           json(?3)),
                       updated_at = ?4
                   WHERE id = ?1"#,
                vec![
                    text(id.to_string()),
                    text(channel.as_str()),
                    text(to_json(template)?),
                    text(Utc::now().to_rfc3339()),
                ],
            )
            .await?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "campaign".into(),
                id: id.to_string(),
            });
        }
        debug!(campaign_id = %id, channel = %channel, "Channel template updated");
        Ok(())
    }

    // ── Runs & stage logs ───────────────────────────────────────────

    async fn insert_run(&self, run: &PipelineRun) -> Result<(), DatabaseError> {
        let json_or_null = |v: Option<String>| v.map(Value::Text).unwrap_or(Value::Null);
        let classification = json_or_null(run.classification.as_ref().map(to_json).transpose()?);
        let contacts = json_or_null(run.contacts.as_ref().map(to_json).transpose()?);
        let channel_map = json_or_null(run.channel_map.as_ref().map(to_json).transpose()?);

        self.execute_locked(
            "insert_run",
            &format!("INSERT INTO pipeline_runs ({RUN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
            vec![
                text(run.id.to_string()),
                text(run.campaign_id.to_string()),
                text(run.state.as_str()),
                classification,
                contacts,
                channel_map,
                text(run.started_at.to_rfc3339()),
                opt_datetime(run.completed_at),
                opt_text(run.error_message.as_deref()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<PipelineRun>, DatabaseError> {
        self.query_one(
            "get_run",
            &format!("SELECT {RUN_COLUMNS} FROM pipeline_runs WHERE id = ?1"),
            vec![text(id.to_string())],
            row_to_run,
        )
        .await
    }

    async fn list_runs(&self, campaign_id: Uuid) -> Result<Vec<PipelineRun>, DatabaseError> {
        self.query_all(
            "list_runs",
            &format!("SELECT {RUN_COLUMNS} FROM pipeline_runs WHERE campaign_id = ?1 ORDER BY started_at ASC"),
            vec![text(campaign_id.to_string())],
            row_to_run,
        )
        .await
    }

    async fn insert_stage_log(&self, entry: &StageLogEntry) -> Result<(), DatabaseError> {
        self.execute_locked(
            "insert_stage_log",
            &format!("INSERT INTO stage_logs ({STAGE_LOG_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
            vec![
                text(entry.id.to_string()),
                text(entry.run_id.to_string()),
                text(entry.campaign_id.to_string()),
                text(entry.stage.as_str()),
                text(entry.status.as_str()),
                text(entry.started_at.to_rfc3339()),
                opt_datetime(entry.completed_at),
                entry.duration_ms.map(Value::Integer).unwrap_or(Value::Null),
                opt_text(entry.error_message.as_deref()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn finish_stage_log(&self, entry: &StageLogEntry) -> Result<(), DatabaseError> {
        let (sql, values) = stage_log_update(entry);
        self.execute_locked("finish_stage_log", &sql, values).await?;
        Ok(())
    }

    async fn commit_stage(&self, commit: &StageCommit) -> Result<(), DatabaseError> {
        let campaign_id = text(commit.campaign_id.to_string());
        let run_id = text(commit.run_id.to_string());
        let now = text(Utc::now().to_rfc3339());

        let mut statements = vec![stage_log_update(&commit.log)];

        match &commit.output {
            StageOutput::None => {}
            StageOutput::Profile(profile) => statements.push((
                "UPDATE campaigns SET name = COALESCE(?2, name), company = ?3, platform = ?4, campaign_purpose = ?5, target_audience = ?6, updated_at = ?7 WHERE id = ?1".into(),
                vec![
                    campaign_id.clone(),
                    opt_text(profile.name.as_deref()),
                    opt_text(profile.company.as_deref()),
                    opt_text(profile.platform.as_deref()),
                    opt_text(profile.campaign_purpose.as_deref()),
                    opt_text(profile.target_audience.as_deref()),
                    now.clone(),
                ],
            )),
            StageOutput::Classification(filters) => statements.push((
                "UPDATE pipeline_runs SET classification = ?2 WHERE id = ?1".into(),
                vec![run_id.clone(), text(to_json(filters)?)],
            )),
            StageOutput::Contacts(contacts) => statements.push((
                "UPDATE pipeline_runs SET contacts = ?2 WHERE id = ?1".into(),
                vec![run_id.clone(), text(to_json(contacts)?)],
            )),
            StageOutput::ChannelMap(map) => statements.push((
                "UPDATE pipeline_runs SET channel_map = ?2 WHERE id = ?1".into(),
                vec![run_id.clone(), text(to_json(map)?)],
            )),
            StageOutput::Content(bundle) => statements.push((
                "UPDATE campaigns SET generated_content = ?2, updated_at = ?3 WHERE id = ?1".into(),
                vec![campaign_id.clone(), text(to_json(bundle)?), now.clone()],
            )),
        }

        if let Some(state) = commit.state {
            statements.push((
                "UPDATE campaigns SET pipeline_state = ?2, updated_at = ?3 WHERE id = ?1".into(),
                vec![campaign_id, text(state.as_str()), now],
            ));
            statements.push((
                "UPDATE pipeline_runs SET state = ?2 WHERE id = ?1".into(),
                vec![run_id, text(state.as_str())],
            ));
        }

        self.execute_atomic("commit_stage", statements).await?;
        debug!(
            campaign_id = %commit.campaign_id,
            stage = %commit.log.stage,
            status = commit.log.status.as_str(),
            "Stage committed"
        );
        Ok(())
    }

    async fn list_stage_logs(&self, campaign_id: Uuid) -> Result<Vec<StageLogEntry>, DatabaseError> {
        self.query_all(
            "list_stage_logs",
            &format!("SELECT {STAGE_LOG_COLUMNS} FROM stage_logs WHERE campaign_id = ?1 ORDER BY started_at ASC"),
            vec![text(campaign_id.to_string())],
            row_to_stage_log,
        )
        .await
    }

    // ── Contacts ────────────────────────────────────────────────────

    async fn upsert_contact(&self, contact: &Contact) -> Result<(), DatabaseError> {
        let email = text(contact.email.clone());
        self.execute_atomic(
            "upsert_contact",
            vec![
                (
                    "INSERT OR REPLACE INTO contacts (email, name, role, company, location, category, phone, preferred_time, email_click_rate, linkedin_click_rate, call_answer_rate) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)".into(),
                    vec![
                        email.clone(),
                        opt_text(contact.name.as_deref()),
                        opt_text(contact.role.as_deref()),
                        opt_text(contact.company.as_deref()),
                        opt_text(contact.location.as_deref()),
                        opt_text(contact.category.as_deref()),
                        opt_text(contact.phone.as_deref()),
                        opt_text(contact.preferred_time.as_deref()),
                        opt_real(contact.email_click_rate),
                        opt_real(contact.linkedin_click_rate),
                        opt_real(contact.call_answer_rate),
                    ],
                ),
                (
                    "INSERT OR REPLACE INTO icp_scores (contact_email, buying_probability) VALUES (?1, ?2)".into(),
                    vec![email, opt_real(contact.buying_probability)],
                ),
            ],
        )
        .await
    }

    async fn get_contact(&self, email: &str) -> Result<Option<Contact>, DatabaseError> {
        self.query_one(
            "get_contact",
            &format!("SELECT {CONTACT_COLUMNS} {CONTACT_FROM} WHERE c.email = ?1"),
            vec![text(email)],
            row_to_contact,
        )
        .await
    }

    async fn find_contacts(
        &self,
        filters: &TargetFilters,
        limit: Option<usize>,
    ) -> Result<Vec<Contact>, DatabaseError> {
        let mut values: Vec<Value> = Vec::new();
        let mut clauses: Vec<String> = Vec::new();

        for field in FilterField::GROUNDED {
            let terms = filters.terms(field);
            if terms.is_empty() {
                continue;
            }
            let ors: Vec<String> = terms
                .iter()
                .map(|term| {
                    values.push(text(format!("%{}%", term.to_lowercase())));
                    format!("LOWER(c.{}) LIKE ?{}", field.column(), values.len())
                })
                .collect();
            clauses.push(format!("({})", ors.join(" OR ")));
        }

        let mut sql = format!("SELECT {CONTACT_COLUMNS} {CONTACT_FROM}");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY s.buying_probability DESC NULLS LAST, c.email ASC");
        if let Some(limit) = limit {
            values.push(Value::Integer(limit as i64));
            sql.push_str(&format!(" LIMIT ?{}", values.len()));
        }

        self.query_all("find_contacts", &sql, values, row_to_contact).await
    }

    async fn sample_distinct(
        &self,
        field: FilterField,
        limit: usize,
    ) -> Result<Vec<String>, DatabaseError> {
        let column = field.column();
        self.query_all(
            "sample_distinct",
            &format!(
                "SELECT DISTINCT {column} FROM contacts WHERE {column} IS NOT NULL AND TRIM({column}) != '' ORDER BY {column} LIMIT ?1"
            ),
            vec![Value::Integer(limit as i64)],
            |row| col_text(row, 0),
        )
        .await
    }

    // ── Outbound ledger ─────────────────────────────────────────────

    async fn has_successful_send(
        &self,
        campaign_id: Uuid,
        contact_email: &str,
        channel: Channel,
    ) -> Result<bool, DatabaseError> {
        let count = self
            .query_one(
                "has_successful_send",
                "SELECT COUNT(*) FROM outbound_messages WHERE campaign_id = ?1 AND contact_email = ?2 AND channel = ?3 AND send_status = 'sent'",
                vec![text(campaign_id.to_string()), text(contact_email), text(channel.as_str())],
                |row| col_int(row, 0),
            )
            .await?
            .unwrap_or(0);
        Ok(count > 0)
    }

    async fn claim_outbound(
        &self,
        campaign_id: Uuid,
        contact_email: &str,
        channel: Channel,
    ) -> Result<Option<Uuid>, DatabaseError> {
        let id = Uuid::new_v4();
        let inserted = self
            .execute_locked(
                "claim_outbound",
                "INSERT OR IGNORE INTO outbound_messages (id, campaign_id, contact_email, channel, payload, send_status, created_at) VALUES (?1, ?2, ?3, ?4, '{}', 'pending', ?5)",
                vec![
                    text(id.to_string()),
                    text(campaign_id.to_string()),
                    text(contact_email),
                    text(channel.as_str()),
                    text(Utc::now().to_rfc3339()),
                ],
            )
            .await?;
        Ok((inserted == 1).then_some(id))
    }

    async fn finalize_outbound(
        &self,
        id: Uuid,
        result: &OutboundResult,
        event: &EngagementEvent,
    ) -> Result<(), DatabaseError> {
        let sent_at = (result.status == SendStatus::Sent).then(Utc::now);
        self.execute_atomic(
            "finalize_outbound",
            vec![
                (
                    "UPDATE outbound_messages SET send_status = ?2, payload = ?3, provider_message_id = ?4, error_message = ?5, sent_at = ?6 WHERE id = ?1".into(),
                    vec![
                        text(id.to_string()),
                        text(result.status.as_str()),
                        text(to_json(&result.payload)?),
                        opt_text(result.provider_message_id.as_deref()),
                        opt_text(result.error_message.as_deref()),
                        opt_datetime(sent_at),
                    ],
                ),
                insert_event_statement(event)?,
            ],
        )
        .await
    }

    async fn list_outbound(&self, campaign_id: Uuid) -> Result<Vec<OutboundMessage>, DatabaseError> {
        self.query_all(
            "list_outbound",
            &format!("SELECT {OUTBOUND_COLUMNS} FROM outbound_messages WHERE campaign_id = ?1 ORDER BY created_at ASC"),
            vec![text(campaign_id.to_string())],
            row_to_outbound,
        )
        .await
    }

    async fn find_outbound_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<OutboundMessage>, DatabaseError> {
        self.query_one(
            "find_outbound_by_provider_id",
            &format!("SELECT {OUTBOUND_COLUMNS} FROM outbound_messages WHERE provider_message_id = ?1 LIMIT 1"),
            vec![text(provider_message_id)],
            row_to_outbound,
        )
        .await
    }

    // ── Engagement ──────────────────────────────────────────────────

    async fn insert_engagement_event(&self, event: &EngagementEvent) -> Result<(), DatabaseError> {
        let (sql, values) = insert_event_statement(event)?;
        self.execute_locked("insert_engagement_event", &sql, values).await?;
        Ok(())
    }

    async fn list_engagement_events(
        &self,
        campaign_id: Uuid,
    ) -> Result<Vec<EngagementEvent>, DatabaseError> {
        self.query_all(
            "list_engagement_events",
            &format!("SELECT {EVENT_COLUMNS} FROM engagement_events WHERE campaign_id = ?1 ORDER BY occurred_at ASC"),
            vec![text(campaign_id.to_string())],
            row_to_event,
        )
        .await
    }

    async fn ledger_stats(&self, campaign_id: Uuid) -> Result<LedgerStats, DatabaseError> {
        let id = campaign_id.to_string();

        let breakdown = self
            .query_all(
                "ledger_stats.breakdown",
                &format!(
                    "SELECT om.channel, COUNT(DISTINCT om.contact_email), {}, {}, {}, {}, {}, {}, {} \
                     FROM outbound_messages om \
                     LEFT JOIN engagement_events e \
                       ON e.campaign_id = om.campaign_id \
                      AND e.contact_email = om.contact_email \
                      AND e.channel = om.channel \
                     WHERE om.campaign_id = ?1 AND om.send_status = 'sent' \
                     GROUP BY om.channel ORDER BY om.channel",
                    counted(DELIVERED_EVENTS),
                    counted(OPENED_EVENTS),
                    counted(CLICKED_EVENTS),
                    counted(&["ANSWERED"]),
                    counted(BOUNCED_EVENTS),
                    counted(&["BUSY"]),
                    counted(&["NO_ANSWER"]),
                ),
                vec![text(id.clone())],
                row_to_breakdown,
            )
            .await?;

        let total_contacts = self
            .query_one(
                "ledger_stats.total_contacts",
                "SELECT COUNT(DISTINCT contact_email) FROM outbound_messages WHERE campaign_id = ?1",
                vec![text(id.clone())],
                |row| col_int(row, 0),
            )
            .await?
            .unwrap_or(0);

        let avg_call_duration_seconds = self
            .query_one(
                "ledger_stats.call_duration",
                "SELECT AVG(d) FROM ( \
                   SELECT CAST(json_extract(payload, '$.duration') AS REAL) AS d \
                   FROM engagement_events \
                   WHERE campaign_id = ?1 AND channel = 'call' AND event_type = 'ANSWERED' \
                 ) WHERE d > 0",
                vec![text(id.clone())],
                |row| col_opt_real(row, 0),
            )
            .await?
            .flatten();

        let engagement = sql_list(DISPATCH_EVENTS);
        let hourly_activity = self
            .query_all(
                "ledger_stats.hourly",
                &format!(
                    "SELECT substr(occurred_at, 1, 13) || ':00:00' AS hour, COUNT(*) \
                     FROM engagement_events \
                     WHERE campaign_id = ?1 AND event_type NOT IN ({engagement}) \
                     GROUP BY hour ORDER BY hour ASC"
                ),
                vec![text(id.clone())],
                |row| {
                    Ok(HourlyActivity {
                        hour: col_text(row, 0)?,
                        count: col_int(row, 1)? as u64,
                    })
                },
            )
            .await?;

        let top_engaged_contacts = self
            .query_all(
                "ledger_stats.top_contacts",
                &format!(
                    "SELECT e.contact_email, COUNT(*) AS n, \
                       (SELECT l.event_type FROM engagement_events l \
                         WHERE l.campaign_id = e.campaign_id AND l.contact_email = e.contact_email \
                           AND l.event_type NOT IN ({engagement}) \
                         ORDER BY l.occurred_at DESC LIMIT 1) \
                     FROM engagement_events e \
                     WHERE e.campaign_id = ?1 AND e.event_type NOT IN ({engagement}) \
                     GROUP BY e.contact_email ORDER BY n DESC, e.contact_email ASC LIMIT 5"
                ),
                vec![text(id)],
                |row| {
                    Ok(TopContact {
                        email: col_text(row, 0)?,
                        events: col_int(row, 1)? as u64,
                        latest_event_type: col_opt_text(row, 2)?,
                    })
                },
            )
            .await?;

        Ok(LedgerStats {
            breakdown,
            total_contacts: total_contacts as u64,
            avg_call_duration_seconds,
            hourly_activity,
            top_engaged_contacts,
        })
    }
}

/// Quoted SQL list of fixed event-type literals.
fn sql_list(types: &[&str]) -> String {
    types.iter().map(|t| format!("'{t}'")).collect::<Vec<_>>().join(", ")
}

/// Contacts with at least one event of the given types.
fn counted(types: &[&str]) -> String {
    format!(
        "COUNT(DISTINCT CASE WHEN e.event_type IN ({}) THEN om.contact_email END)",
        sql_list(types)
    )
}

fn row_to_breakdown(row: &libsql::Row) -> Result<ChannelBreakdown, DatabaseError> {
    let count = |idx| col_int(row, idx).map(|n| n as u64);
    Ok(ChannelBreakdown {
        channel: parse_enum(&col_text(row, 0)?)?,
        sent: count(1)?,
        delivered: count(2)?,
        opened: count(3)?,
        clicked: count(4)?,
        answered: count(5)?,
        bounced: count(6)?,
        busy: count(7)?,
        no_answer: count(8)?,
    })
}

fn stage_log_update(entry: &StageLogEntry) -> (String, Vec<Value>) {
    (
        "UPDATE stage_logs SET status = ?2, completed_at = ?3, duration_ms = ?4, error_message = ?5 WHERE id = ?1".into(),
        vec![
            text(entry.id.to_string()),
            text(entry.status.as_str()),
            opt_datetime(entry.completed_at),
            entry.duration_ms.map(Value::Integer).unwrap_or(Value::Null),
            opt_text(entry.error_message.as_deref()),
        ],
    )
}

fn insert_event_statement(event: &EngagementEvent) -> Result<(String, Vec<Value>), DatabaseError> {
    Ok((
        format!("INSERT INTO engagement_events ({EVENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
        vec![
            text(event.id.to_string()),
            text(event.campaign_id.to_string()),
            text(event.contact_email.clone()),
            text(event.channel.as_str()),
            text(event.event_type.clone()),
            text(to_json(&event.payload)?),
            text(event.occurred_at.to_rfc3339()),
        ],
    ))
}
