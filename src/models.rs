use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

/// Relation name reserved for group containment. A `member` tuple whose
/// subject is not a `user` links a child group into a parent group and is
/// the only edge followed during nested-group expansion.
pub const MEMBER_RELATION: &str = "member";

/// Relation name reserved for resource containment. A `parent` tuple links
/// a child resource to its container and is the only edge followed during
/// ancestor expansion.
pub const PARENT_RELATION: &str = "parent";

/// Subject type denoting an end user. User subjects never participate in
/// group-containment edges.
pub const USER_SUBJECT_TYPE: &str = "user";

/// A resource reference: the target side of a relationship tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub resource_type: String,
    pub resource_id: String,
}

impl ResourceRef {
    pub fn new(resource_type: &str, resource_id: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.resource_id)
    }
}

/// A subject reference: the holder side of a relationship tuple.
///
/// When `relation` is set the subject is a userset: not "group X" but
/// "holders of `relation` on group X" (e.g. only the admins of a team).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectRef {
    pub subject_type: String,
    pub subject_id: String,
    pub relation: Option<String>,
}

impl SubjectRef {
    pub fn new(subject_type: &str, subject_id: &str) -> Self {
        Self {
            subject_type: subject_type.to_string(),
            subject_id: subject_id.to_string(),
            relation: None,
        }
    }

    pub fn user(user_id: &str) -> Self {
        Self::new(USER_SUBJECT_TYPE, user_id)
    }

    pub fn userset(subject_type: &str, subject_id: &str, relation: &str) -> Self {
        Self {
            subject_type: subject_type.to_string(),
            subject_id: subject_id.to_string(),
            relation: Some(relation.to_string()),
        }
    }

    pub fn is_user(&self) -> bool {
        self.subject_type == USER_SUBJECT_TYPE
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref relation) = self.relation {
            write!(f, "{}:{}#{}", self.subject_type, self.subject_id, relation)
        } else {
            write!(f, "{}:{}", self.subject_type, self.subject_id)
        }
    }
}

/// The uniqueness key of a relationship tuple within a namespace.
///
/// An absent `subject.relation` and an empty one are the same key; the
/// constructor normalizes empty strings to `None` so derived `Eq`/`Hash`
/// honor that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TupleKey {
    pub resource: ResourceRef,
    pub relation: String,
    pub subject: SubjectRef,
}

impl TupleKey {
    pub fn new(resource: ResourceRef, relation: &str, mut subject: SubjectRef) -> Self {
        if subject.relation.as_deref() == Some("") {
            subject.relation = None;
        }
        Self {
            resource,
            relation: relation.to_string(),
            subject,
        }
    }
}

impl fmt::Display for TupleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.resource, self.relation, self.subject)
    }
}

/// A persisted relationship tuple: one directed edge of the permission graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTuple {
    pub id: Uuid,
    pub resource: ResourceRef,
    pub relation: String,
    pub subject: SubjectRef,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StoredTuple {
    pub fn key(&self) -> TupleKey {
        TupleKey::new(self.resource.clone(), &self.relation, self.subject.clone())
    }

    /// An expiration exactly equal to `at` counts as expired.
    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(e) if e <= at)
    }
}

/// A permission-implication rule: holding `permission` on a resource of
/// `resource_type` implies holding `implies` as well.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyRule {
    pub id: Uuid,
    pub resource_type: String,
    pub permission: String,
    pub implies: String,
}

/// Outcome of an upsert: the row id plus whether a new row was created.
#[derive(Debug, Clone, Copy)]
pub struct WriteOutcome {
    pub id: Uuid,
    pub created: bool,
}

/// Closed set of audit event types, shared with the authentication sibling.
/// The storage layer rejects anything outside this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    UserCreated,
    UserUpdated,
    UserDisabled,
    UserEnabled,
    UserDeleted,
    PasswordUpdated,
    EmailUpdated,
    EmailVerified,
    SessionCreated,
    SessionRevoked,
    SessionsRevokedAll,
    TokenCreated,
    TokenConsumed,
    MfaAdded,
    MfaRemoved,
    MfaUsed,
    LoginAttemptFailed,
    LockoutTriggered,
    TupleCreated,
    TupleUpdated,
    TupleDeleted,
    HierarchyCreated,
    HierarchyDeleted,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::UserCreated => "user_created",
            AuditEventType::UserUpdated => "user_updated",
            AuditEventType::UserDisabled => "user_disabled",
            AuditEventType::UserEnabled => "user_enabled",
            AuditEventType::UserDeleted => "user_deleted",
            AuditEventType::PasswordUpdated => "password_updated",
            AuditEventType::EmailUpdated => "email_updated",
            AuditEventType::EmailVerified => "email_verified",
            AuditEventType::SessionCreated => "session_created",
            AuditEventType::SessionRevoked => "session_revoked",
            AuditEventType::SessionsRevokedAll => "sessions_revoked_all",
            AuditEventType::TokenCreated => "token_created",
            AuditEventType::TokenConsumed => "token_consumed",
            AuditEventType::MfaAdded => "mfa_added",
            AuditEventType::MfaRemoved => "mfa_removed",
            AuditEventType::MfaUsed => "mfa_used",
            AuditEventType::LoginAttemptFailed => "login_attempt_failed",
            AuditEventType::LockoutTriggered => "lockout_triggered",
            AuditEventType::TupleCreated => "tuple_created",
            AuditEventType::TupleUpdated => "tuple_updated",
            AuditEventType::TupleDeleted => "tuple_deleted",
            AuditEventType::HierarchyCreated => "hierarchy_created",
            AuditEventType::HierarchyDeleted => "hierarchy_deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let all = [
            AuditEventType::UserCreated,
            AuditEventType::UserUpdated,
            AuditEventType::UserDisabled,
            AuditEventType::UserEnabled,
            AuditEventType::UserDeleted,
            AuditEventType::PasswordUpdated,
            AuditEventType::EmailUpdated,
            AuditEventType::EmailVerified,
            AuditEventType::SessionCreated,
            AuditEventType::SessionRevoked,
            AuditEventType::SessionsRevokedAll,
            AuditEventType::TokenCreated,
            AuditEventType::TokenConsumed,
            AuditEventType::MfaAdded,
            AuditEventType::MfaRemoved,
            AuditEventType::MfaUsed,
            AuditEventType::LoginAttemptFailed,
            AuditEventType::LockoutTriggered,
            AuditEventType::TupleCreated,
            AuditEventType::TupleUpdated,
            AuditEventType::TupleDeleted,
            AuditEventType::HierarchyCreated,
            AuditEventType::HierarchyDeleted,
        ];
        all.into_iter().find(|t| t.as_str() == value)
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only audit event. Tuple mutations fill the resource/subject
/// columns; hierarchy mutations record the permission in `relation` and the
/// implied permission in `subject_id` (with `subject_type = "permission"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub event_time: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub namespace: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub relation: Option<String>,
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
    pub subject_relation: Option<String>,
    pub tuple_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub actor_id: Option<String>,
    pub request_id: Option<String>,
    pub reason: Option<String>,
    pub ip_address: Option<IpAddr>,
    pub user_agent: Option<String>,
}

/// Filter for audit queries; `None` fields act as wildcards.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub event_type: Option<AuditEventType>,
    pub actor_id: Option<String>,
    pub resource: Option<ResourceRef>,
    pub subject: Option<(String, String)>,
    pub limit: usize,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self {
            limit: 100,
            ..Default::default()
        }
    }

    pub fn with_event_type(mut self, event_type: AuditEventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn with_actor(mut self, actor_id: &str) -> Self {
        self.actor_id = Some(actor_id.to_string());
        self
    }

    pub fn with_resource(mut self, resource: ResourceRef) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// How an access check was satisfied, reported by `explain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathType {
    Direct,
    Group,
    Hierarchy,
    Resource,
}

impl fmt::Display for PathType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PathType::Direct => "DIRECT",
            PathType::Group => "GROUP",
            PathType::Hierarchy => "HIERARCHY",
            PathType::Resource => "RESOURCE",
        };
        f.write_str(s)
    }
}

/// One justification for an access decision.
///
/// `path_chain` carries nested group names for group paths, the implication
/// sequence for hierarchy paths, and the containment chain (target first)
/// for resource paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainPath {
    pub path_type: PathType,
    pub via_relation: String,
    pub via_subject_type: Option<String>,
    pub via_subject_id: Option<String>,
    pub via_membership: Option<String>,
    pub path_chain: Vec<String>,
}

/// A grant with a pending expiration, returned by `list_expiring`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiringGrant {
    pub resource: ResourceRef,
    pub relation: String,
    pub subject: SubjectRef,
    pub expires_at: DateTime<Utc>,
}

/// Counts of physically removed rows, per entity kind.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    pub tuples_deleted: u64,
}

/// Per-namespace statistics for monitoring.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NamespaceStats {
    pub tuple_count: u64,
    pub hierarchy_rule_count: u64,
    pub distinct_users: u64,
    pub distinct_resources: u64,
}

/// Kind of structural problem reported by `verify_integrity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityKind {
    GroupCycles,
    ResourceCycles,
}

/// One `verify_integrity` finding. A healthy deployment reports none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityIssue {
    pub status: String,
    pub kind: IntegrityKind,
    pub details: String,
}

impl IntegrityIssue {
    pub fn warning(kind: IntegrityKind, details: String) -> Self {
        Self {
            status: "warning".to_string(),
            kind,
            details,
        }
    }
}
