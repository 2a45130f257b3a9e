use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

pub type Id = Uuid;

/// Text shown in place of a reply's content once it has been deleted.
pub const DELETED_TEXT: &str = "[deleted]";

/// Reply body. Deletion is one-way and is stored as its own state, so a reply whose author
/// typed [`DELETED_TEXT`] stays active. The sentinel only appears in rendered views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "text", rename_all = "lowercase")]
pub enum ReplyText {
    Active(String),
    Deleted,
}

impl ReplyText {
    pub fn is_deleted(&self) -> bool {
        matches!(self, ReplyText::Deleted)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ReplyText::Active(s) => s,
            ReplyText::Deleted => DELETED_TEXT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: Id,
    pub board: String,
    pub text: String,
    pub delete_password: String, // argon2 PHC hash
    pub reported: bool,
    pub replies: Vec<ReplySummary>, // insertion order
    pub replycount: i64,
    pub created_on: DateTime<Utc>,
    pub bumped_on: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewThread {
    pub board: String,
    pub text: String,
    pub delete_password: String, // already hashed
}

/// Canonical reply record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub id: Id,
    pub thread_id: Id,
    pub text: ReplyText,
    pub delete_password: String,
    pub reported: bool,
    pub created_on: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewReply {
    pub thread_id: Id,
    pub text: String,
    pub delete_password: String, // already hashed
}

/// Copy of a reply embedded in its thread so listings avoid a second lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplySummary {
    pub id: Id,
    pub text: ReplyText,
    pub created_on: DateTime<Utc>,
    pub delete_password: String,
    pub reported: bool,
}

impl From<&Reply> for ReplySummary {
    fn from(r: &Reply) -> Self {
        Self {
            id: r.id,
            text: r.text.clone(),
            created_on: r.created_on,
            delete_password: r.delete_password.clone(),
            reported: r.reported,
        }
    }
}

// ---------------- Request payloads ----------------
// Fields are optional so a missing field surfaces as a validation error rather than a 400 from the extractor.

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CreateThreadRequest {
    pub text: Option<String>,
    pub delete_password: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct DeleteThreadRequest {
    pub thread_id: Option<String>,
    pub delete_password: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ReportThreadRequest {
    pub thread_id: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CreateReplyRequest {
    pub text: Option<String>,
    pub delete_password: Option<String>,
    pub thread_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RepliesQuery {
    pub thread_id: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct DeleteReplyRequest {
    pub thread_id: Option<String>,
    pub reply_id: Option<String>,
    pub delete_password: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ReportReplyRequest {
    pub thread_id: Option<String>,
    pub reply_id: Option<String>,
}

// ---------------- Response projections ----------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ThreadCreated {
    #[serde(rename = "_id")]
    #[schema(value_type = String, format = Uuid)]
    pub id: Id,
    pub text: String,
    pub created_on: DateTime<Utc>,
    pub bumped_on: DateTime<Utc>,
}

impl From<&Thread> for ThreadCreated {
    fn from(t: &Thread) -> Self {
        Self { id: t.id, text: t.text.clone(), created_on: t.created_on, bumped_on: t.bumped_on }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReplyView {
    #[serde(rename = "_id")]
    #[schema(value_type = String, format = Uuid)]
    pub id: Id,
    pub text: String,
    pub created_on: DateTime<Utc>,
}

impl From<&ReplySummary> for ReplyView {
    fn from(r: &ReplySummary) -> Self {
        Self { id: r.id, text: r.text.as_str().to_string(), created_on: r.created_on }
    }
}

impl From<&Reply> for ReplyView {
    fn from(r: &Reply) -> Self {
        Self { id: r.id, text: r.text.as_str().to_string(), created_on: r.created_on }
    }
}

/// Entry of the board listing: newest replies only, with the full count.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ThreadListing {
    #[serde(rename = "_id")]
    #[schema(value_type = String, format = Uuid)]
    pub id: Id,
    pub text: String,
    pub created_on: DateTime<Utc>,
    pub bumped_on: DateTime<Utc>,
    pub replies: Vec<ReplyView>,
    pub replycount: i64,
}

impl ThreadListing {
    pub fn from_thread(t: &Thread, recent: usize) -> Self {
        // newest first; ties keep the later-inserted reply ahead
        let mut newest: Vec<&ReplySummary> = t.replies.iter().rev().collect();
        newest.sort_by(|a, b| b.created_on.cmp(&a.created_on));
        Self {
            id: t.id,
            text: t.text.clone(),
            created_on: t.created_on,
            bumped_on: t.bumped_on,
            replies: newest.into_iter().take(recent).map(ReplyView::from).collect(),
            replycount: t.replycount,
        }
    }
}

/// A thread with every reply, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ThreadDetail {
    #[serde(rename = "_id")]
    #[schema(value_type = String, format = Uuid)]
    pub id: Id,
    pub text: String,
    pub created_on: DateTime<Utc>,
    pub bumped_on: DateTime<Utc>,
    pub replies: Vec<ReplyView>,
}

impl From<&Thread> for ThreadDetail {
    fn from(t: &Thread) -> Self {
        Self {
            id: t.id,
            text: t.text.clone(),
            created_on: t.created_on,
            bumped_on: t.bumped_on,
            replies: t.replies.iter().map(ReplyView::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn success() -> Self {
        Self { message: "success".into() }
    }
}
