//! Audit trail for repository and session operations.
//!
//! Every mutating [`Repository`] call and every session issue/revoke emits an
//! [`AuditEvent`] describing what ran, when it started and finished, who ran
//! it (when known) and how it ended.
//!
//! # Architecture
//!
//! The [`AuditLogger`] trait enables different audit backends:
//!
//! - [`TracingAuditLogger`]: emits structured `tracing` events at INFO.
//! - [`DocumentAuditLogger`]: persists events as [`AuditLogDoc`] documents.
//! - [`NoopAuditLogger`]: discards events.
//!
//! # Usage
//!
//! ```no_run
//! use microbase_storage::audit::{
//!     AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let logger = TracingAuditLogger;
//! let event = AuditEvent::builder()
//!     .actor("42")
//!     .action(AuditAction::Create)
//!     .resource("orders/1849")
//!     .result(AuditResult::Success)
//!     .build();
//! logger.log(&event).await;
//! # });
//! ```

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    StorageResult,
    document::DocumentStore,
    entity::{BaseDocument, Entity, FieldValue},
    id::IdGenerator,
    path::Field,
    repository::Repository,
};

/// Operation recorded by an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum AuditAction {
    /// A document was created.
    Create,
    /// Several documents were created in one call.
    CreateMany,
    /// A document was updated by id.
    Update,
    /// Several documents were updated in one bulk write.
    BatchUpdate,
    /// A document was inserted or updated by id.
    Upsert,
    /// Several documents were upserted in one bulk write.
    BatchUpsert,
    /// A document was deleted by id.
    Delete,
    /// Several documents were deleted by id.
    BatchDelete,
    /// A session token was issued.
    IssueSession,
    /// A session token was revoked.
    RevokeSession,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::CreateMany => write!(f, "create_many"),
            Self::Update => write!(f, "update"),
            Self::BatchUpdate => write!(f, "batch_update"),
            Self::Upsert => write!(f, "upsert"),
            Self::BatchUpsert => write!(f, "batch_upsert"),
            Self::Delete => write!(f, "delete"),
            Self::BatchDelete => write!(f, "batch_delete"),
            Self::IssueSession => write!(f, "issue_session"),
            Self::RevokeSession => write!(f, "revoke_session"),
        }
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditResult {
    /// Operation completed successfully.
    Success,
    /// Operation failed with the given reason.
    Failure(String),
}

impl AuditResult {
    /// Maps an operation result onto an audit outcome.
    pub fn from_result<T, E: fmt::Display>(result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => Self::Failure(e.to_string()),
        }
    }
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

/// Structured audit event.
#[derive(Debug, Clone, bon::Builder)]
pub struct AuditEvent {
    /// When the operation started (defaults to now).
    #[builder(default = Utc::now())]
    pub started_at: DateTime<Utc>,
    /// When the operation finished (defaults to now).
    #[builder(default = Utc::now())]
    pub finished_at: DateTime<Utc>,
    /// Id of the user on whose behalf the operation ran, if known.
    #[builder(into)]
    pub actor: Option<String>,
    /// The action that was performed.
    pub action: AuditAction,
    /// Resource identifier (e.g. `"orders/1849"`).
    #[builder(into)]
    pub resource: String,
    /// Outcome of the operation.
    pub result: AuditResult,
    /// Additional context (e.g. requested and affected counts).
    #[builder(default)]
    pub metadata: HashMap<String, String>,
}

impl AuditEvent {
    /// Wall-clock duration of the operation.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Trait for audit log backends.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Records an audit event.
    ///
    /// Delivery failures are reported through `tracing`, never to the caller
    /// of the audited operation.
    async fn log(&self, event: &AuditEvent);
}

#[async_trait]
impl<L: AuditLogger + ?Sized> AuditLogger for Arc<L> {
    async fn log(&self, event: &AuditEvent) {
        (**self).log(event).await;
    }
}

/// Audit logger that emits structured `tracing` events.
///
/// Field mapping:
/// - `audit.started_at` / `audit.finished_at`: RFC 3339 timestamps
/// - `audit.actor`: user id or `-`
/// - `audit.action`: the operation (e.g. `"create"`)
/// - `audit.resource`: what was affected
/// - `audit.result`: `"success"` or `"failure: ..."`
/// - `audit.metadata`: `k=v` pairs
#[derive(Debug, Clone, Copy)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        let metadata_str = render_metadata(&event.metadata);

        tracing::info!(
            audit.started_at = %event.started_at.to_rfc3339(),
            audit.finished_at = %event.finished_at.to_rfc3339(),
            audit.actor = event.actor.as_deref().unwrap_or("-"),
            audit.action = %event.action,
            audit.resource = %event.resource,
            audit.result = %event.result,
            audit.metadata = %metadata_str,
            "audit_event"
        );
    }
}

/// No-op audit logger for tests and deployments without an audit trail.
#[derive(Debug, Clone, Copy)]
pub struct NoopAuditLogger;

#[async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _event: &AuditEvent) {}
}

fn render_metadata(metadata: &HashMap<String, String>) -> String {
    let mut pairs: Vec<_> = metadata.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    pairs.join(", ")
}

/// Metadata key carrying the actor's display name.
pub const ACTOR_NAME_KEY: &str = "actor.name";

/// Metadata key carrying the actor's email.
pub const ACTOR_EMAIL_KEY: &str = "actor.email";

/// Persisted form of an audit event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogDoc {
    /// Id, timestamps and soft-delete flag.
    #[serde(flatten)]
    pub base: BaseDocument,
    /// The audited action.
    #[serde(rename = "type", default)]
    pub log_type: Option<String>,
    /// Outcome text.
    #[serde(default)]
    pub remark: Option<String>,
    /// Metadata rendered as a JSON object string.
    #[serde(default)]
    pub extra_json: Option<String>,
    /// Start, epoch millis.
    #[serde(default)]
    pub start_time: Option<i64>,
    /// End, epoch millis.
    #[serde(default)]
    pub end_time: Option<i64>,
    /// Duration in millis.
    #[serde(default)]
    pub range_time: Option<i64>,
    /// Acting user id.
    #[serde(default)]
    pub create_user_id: Option<String>,
    /// Acting user name.
    #[serde(default)]
    pub create_user_name: Option<String>,
    /// Acting user email.
    #[serde(default)]
    pub create_user_email: Option<String>,
}

impl AuditLogDoc {
    /// Path of [`log_type`](Self::log_type).
    pub const LOG_TYPE: Field<AuditLogDoc> = Field::new("type");
    /// Path of [`remark`](Self::remark).
    pub const REMARK: Field<AuditLogDoc> = Field::new("remark");
    /// Path of [`extra_json`](Self::extra_json).
    pub const EXTRA_JSON: Field<AuditLogDoc> = Field::new("extraJson");
    /// Path of [`start_time`](Self::start_time).
    pub const START_TIME: Field<AuditLogDoc> = Field::new("startTime");
    /// Path of [`end_time`](Self::end_time).
    pub const END_TIME: Field<AuditLogDoc> = Field::new("endTime");
    /// Path of [`range_time`](Self::range_time).
    pub const RANGE_TIME: Field<AuditLogDoc> = Field::new("rangeTime");
    /// Path of [`create_user_id`](Self::create_user_id).
    pub const CREATE_USER_ID: Field<AuditLogDoc> = Field::new("createUserId");
    /// Path of [`create_user_name`](Self::create_user_name).
    pub const CREATE_USER_NAME: Field<AuditLogDoc> = Field::new("createUserName");
    /// Path of [`create_user_email`](Self::create_user_email).
    pub const CREATE_USER_EMAIL: Field<AuditLogDoc> = Field::new("createUserEmail");

    /// Builds the persisted form of `event`.
    pub fn from_event(event: &AuditEvent) -> StorageResult<Self> {
        let mut metadata = event.metadata.clone();
        let name = metadata.remove(ACTOR_NAME_KEY);
        let email = metadata.remove(ACTOR_EMAIL_KEY);
        let extra_json = if metadata.is_empty() {
            None
        } else {
            let ordered: std::collections::BTreeMap<_, _> = metadata.into_iter().collect();
            Some(serde_json::to_string(&ordered)?)
        };

        Ok(Self {
            base: BaseDocument::default(),
            log_type: Some(event.action.to_string()),
            remark: Some(format!("{} {}", event.resource, event.result)),
            extra_json,
            start_time: Some(event.started_at.timestamp_millis()),
            end_time: Some(event.finished_at.timestamp_millis()),
            range_time: Some(event.elapsed().num_milliseconds()),
            create_user_id: event.actor.clone(),
            create_user_name: name,
            create_user_email: email,
        })
    }
}

impl Entity for AuditLogDoc {
    const COLLECTION: &'static str = "audit_log";

    fn base(&self) -> &BaseDocument {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseDocument {
        &mut self.base
    }

    fn field_values(&self) -> StorageResult<Vec<FieldValue>> {
        Ok(vec![
            Self::LOG_TYPE.value_of(&self.log_type)?,
            Self::REMARK.value_of(&self.remark)?,
            Self::EXTRA_JSON.value_of(&self.extra_json)?,
            Self::START_TIME.value_of(&self.start_time)?,
            Self::END_TIME.value_of(&self.end_time)?,
            Self::RANGE_TIME.value_of(&self.range_time)?,
            Self::CREATE_USER_ID.value_of(&self.create_user_id)?,
            Self::CREATE_USER_NAME.value_of(&self.create_user_name)?,
            Self::CREATE_USER_EMAIL.value_of(&self.create_user_email)?,
        ])
    }
}

/// Audit logger that persists events as [`AuditLogDoc`] documents.
///
/// Its own repository carries no audit logger, so writing an audit record
/// never produces another one.
#[derive(Clone)]
pub struct DocumentAuditLogger {
    logs: Repository<AuditLogDoc>,
}

impl DocumentAuditLogger {
    /// Creates a logger writing to `store`.
    pub fn new(store: Arc<dyn DocumentStore>, ids: Arc<IdGenerator>) -> Self {
        Self { logs: Repository::builder().store(store).ids(ids).build() }
    }

    /// The repository holding the audit records.
    pub fn repository(&self) -> &Repository<AuditLogDoc> {
        &self.logs
    }
}

#[async_trait]
impl AuditLogger for DocumentAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        let stored = match AuditLogDoc::from_event(event) {
            Ok(doc) => self.logs.create(doc).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            tracing::warn!(
                error = %e,
                audit.action = %event.action,
                audit.resource = %event.resource,
                "failed to persist audit event"
            );
        }
    }
}
