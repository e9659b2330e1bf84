//! Typed error hierarchy for orgboard.
//!
//! One enum per service area:
//! - `TenancyError`: organizations, memberships, profiles
//! - `BoardError`: boards, columns, tasks and their transitions
//! - `WikiError`: pages, versions, links, meeting notes
//! - `AnalyticsError`: metric collection and the generative-AI call
//! - `UploadError`: files written under the media directory
//!
//! Every enum carries a `Storage` variant for failures bubbling up from the
//! SQLite layer, which reports through `anyhow`.

use thiserror::Error;

/// Errors from tenancy resolution and organization membership.
#[derive(Debug, Error)]
pub enum TenancyError {
    #[error("Invalid email address '{0}'")]
    InvalidEmail(String),

    #[error("Invalid organization domain '{0}'")]
    InvalidDomain(String),

    #[error("Email domain '{email_domain}' does not match organization domain '{org_domain}'")]
    DomainMismatch {
        email_domain: String,
        org_domain: String,
    },

    #[error("Cannot change domain to '{domain}': members {emails:?} would no longer match")]
    DomainChangeBlocked { domain: String, emails: Vec<String> },

    #[error("A user with email '{0}' already exists")]
    EmailTaken(String),

    #[error("User {user_id} already belongs to an organization")]
    AlreadyMember { user_id: i64 },

    #[error("User {user_id} does not belong to an organization yet")]
    NoOrganization { user_id: i64 },

    #[error("User {id} not found")]
    UserNotFound { id: i64 },

    #[error("Organization {id} not found")]
    OrganizationNotFound { id: i64 },

    #[error("User {user_id} is not a member of organization {org_id}")]
    NotMember { user_id: i64, org_id: i64 },

    #[error("Only organization admins may {action}")]
    AdminRequired { action: &'static str },

    #[error("Organization {org_id} must keep at least one admin")]
    LastAdmin { org_id: i64 },

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Errors from the Kanban board services.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Board {id} not found")]
    BoardNotFound { id: i64 },

    #[error("Column {id} not found")]
    ColumnNotFound { id: i64 },

    #[error("Task {id} not found")]
    TaskNotFound { id: i64 },

    #[error("Column '{column}' is at its WIP limit of {limit}")]
    WipLimitReached { column: String, limit: i32 },

    #[error("WIP limit {limit} is below the {current} tasks already in column '{column}'")]
    WipLimitBelowCurrent {
        column: String,
        limit: i32,
        current: i32,
    },

    #[error("WIP limit must be positive, got {0}")]
    InvalidWipLimit(i32),

    #[error("Column '{column}' still holds {count} tasks")]
    ColumnNotEmpty { column: String, count: i32 },

    #[error("Column order must list every column of board {board_id} exactly once")]
    InvalidColumnOrder { board_id: i64 },

    #[error("Task {task_id} and task {other_id} are on different boards")]
    CrossBoard { task_id: i64, other_id: i64 },

    #[error("Task {task_id} cannot reference itself")]
    SelfReference { task_id: i64 },

    #[error("Setting task {parent_id} as parent of {task_id} would create a cycle")]
    ParentCycle { task_id: i64, parent_id: i64 },

    #[error("User {user_id} is not a member of this board's organization")]
    AssigneeNotMember { user_id: i64 },

    #[error("Invalid due date '{0}', expected YYYY-MM-DD")]
    InvalidDueDate(String),

    #[error("Column {column_id} does not belong to board {board_id}")]
    ColumnOnOtherBoard { column_id: i64, board_id: i64 },

    #[error("Access denied to board {board_id}")]
    Forbidden { board_id: i64 },

    #[error("Access denied to organization {org_id}")]
    OrganizationForbidden { org_id: i64 },

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Errors from the wiki services.
#[derive(Debug, Error)]
pub enum WikiError {
    #[error("Wiki page {id} not found")]
    PageNotFound { id: i64 },

    #[error("Wiki page '{slug}' not found")]
    SlugNotFound { slug: String },

    #[error("Wiki category {id} not found")]
    CategoryNotFound { id: i64 },

    #[error("Category '{0}' already exists")]
    DuplicateCategory(String),

    #[error("Version {version} of page {page_id} not found")]
    VersionNotFound { page_id: i64, version: i32 },

    #[error("Meeting notes {id} not found")]
    MeetingNotFound { id: i64 },

    #[error("Wiki link {id} not found")]
    LinkNotFound { id: i64 },

    #[error("{target} {id} does not belong to this organization")]
    ForeignTarget { target: &'static str, id: i64 },

    #[error("Invalid meeting date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Access denied to organization {org_id}")]
    Forbidden { org_id: i64 },

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Errors from analytics and the external AI summary call.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("AI summaries are not configured")]
    NotConfigured,

    #[error("AI request failed: {0}")]
    Request(String),

    #[error("AI response contained no text")]
    EmptyResponse,

    #[error(transparent)]
    Board(#[from] BoardError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Errors from storing uploaded files.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Upload is empty")]
    Empty,

    #[error("Upload of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    #[error("Unsupported file type '{0}'")]
    UnsupportedType(String),

    #[error(transparent)]
    Io(#[from] anyhow::Error),
}
