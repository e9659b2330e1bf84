//! Kanban board services: boards, columns, tasks and their transitions.
//!
//! All mutations run inside one SQLite transaction, so the WIP-limit check
//! and the write it guards see the same column contents.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::db::{AppDb, NewTask};
use crate::errors::BoardError;
use crate::models::*;

/// Columns created for every new board unless the caller opts out.
pub const DEFAULT_COLUMNS: [(&str, bool, bool); 3] = [
    ("To Do", false, false),
    ("In Progress", true, false),
    ("Done", false, true),
];

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoardInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub default_columns: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoardUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnInput {
    pub name: String,
    pub wip_limit: Option<i32>,
    #[serde(default)]
    pub is_start: bool,
    #[serde(default)]
    pub is_done: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ColumnUpdate {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub wip_limit: Option<Option<i32>>,
    pub is_start: Option<bool>,
    pub is_done: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    pub assignee_id: Option<i64>,
    pub due_date: Option<String>,
    pub parent_task_id: Option<i64>,
}

impl TaskInput {
    pub fn titled(title: &str) -> Self {
        Self {
            title: title.to_string(),
            description: String::new(),
            priority: Priority::default(),
            assignee_id: None,
            due_date: None,
            parent_task_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "double_option")]
    pub assignee_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub parent_task_id: Option<Option<i64>>,
}

// ── Access ────────────────────────────────────────────────────────────

fn ensure_org_member(db: &AppDb, actor_id: i64, org_id: i64) -> Result<UserProfile, BoardError> {
    match db.get_profile(actor_id)? {
        Some(profile) if profile.organization_id == org_id => Ok(profile),
        _ => Err(BoardError::OrganizationForbidden { org_id }),
    }
}

/// Load a board the actor may see: members of the board's organization only.
pub fn require_board(db: &AppDb, actor_id: i64, board_id: i64) -> Result<Board, BoardError> {
    let board = db
        .get_board(board_id)?
        .ok_or(BoardError::BoardNotFound { id: board_id })?;
    match db.get_profile(actor_id)? {
        Some(profile) if profile.organization_id == board.organization_id => Ok(board),
        _ => Err(BoardError::Forbidden { board_id }),
    }
}

fn require_column(db: &AppDb, actor_id: i64, column_id: i64) -> Result<(Board, Column), BoardError> {
    let column = db
        .get_column(column_id)?
        .ok_or(BoardError::ColumnNotFound { id: column_id })?;
    let board = require_board(db, actor_id, column.board_id)?;
    Ok((board, column))
}

fn require_task(db: &AppDb, actor_id: i64, task_id: i64) -> Result<(Board, Task), BoardError> {
    let task = db
        .get_task(task_id)?
        .ok_or(BoardError::TaskNotFound { id: task_id })?;
    let board_id = db
        .board_id_for_task(task_id)?
        .ok_or(BoardError::TaskNotFound { id: task_id })?;
    let board = require_board(db, actor_id, board_id)?;
    Ok((board, task))
}

/// Board holding `column_id`, if the actor may see it.
pub fn board_for_column(db: &AppDb, actor_id: i64, column_id: i64) -> Result<Board, BoardError> {
    require_column(db, actor_id, column_id).map(|(board, _)| board)
}

/// Board holding `task_id`, if the actor may see it.
pub fn board_for_task(db: &AppDb, actor_id: i64, task_id: i64) -> Result<Board, BoardError> {
    require_task(db, actor_id, task_id).map(|(board, _)| board)
}

/// Board owners and organization admins may rename or delete a board.
fn ensure_board_manager(db: &AppDb, actor_id: i64, board: &Board) -> Result<(), BoardError> {
    let profile = ensure_org_member(db, actor_id, board.organization_id)?;
    if profile.is_admin {
        return Ok(());
    }
    let is_owner = db
        .list_board_members(board.id)?
        .iter()
        .any(|m| m.user_id == actor_id && m.role == BoardRole::Owner);
    if is_owner {
        Ok(())
    } else {
        Err(BoardError::Forbidden { board_id: board.id })
    }
}

// ── Boards ────────────────────────────────────────────────────────────

pub fn create_board(
    db: &AppDb,
    actor_id: i64,
    org_id: i64,
    input: &BoardInput,
) -> Result<Board, BoardError> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(BoardError::MissingField("name"));
    }
    db.atomic(|db| {
        ensure_org_member(db, actor_id, org_id)?;
        let board = db.create_board(org_id, name, input.description.trim(), Some(actor_id))?;
        db.add_board_member(board.id, actor_id, BoardRole::Owner)?;
        if input.default_columns {
            for (column, is_start, is_done) in DEFAULT_COLUMNS {
                db.create_column(board.id, column, None, is_start, is_done)?;
            }
        }
        tracing::info!(board_id = board.id, org_id, "created board");
        Ok(board)
    })
}

pub fn list_boards(db: &AppDb, actor_id: i64, org_id: i64) -> Result<Vec<Board>, BoardError> {
    ensure_org_member(db, actor_id, org_id)?;
    Ok(db.list_boards(org_id)?)
}

/// Full board with columns in order and their tasks by position.
pub fn board_view(db: &AppDb, actor_id: i64, board_id: i64) -> Result<BoardView, BoardError> {
    let board = require_board(db, actor_id, board_id)?;
    let mut columns = Vec::new();
    for column in db.list_columns(board_id)? {
        let tasks = db.list_tasks_in_column(column.id)?;
        columns.push(ColumnView { column, tasks });
    }
    Ok(BoardView { board, columns })
}

pub fn update_board(
    db: &AppDb,
    actor_id: i64,
    board_id: i64,
    update: &BoardUpdate,
) -> Result<Board, BoardError> {
    let board = require_board(db, actor_id, board_id)?;
    ensure_board_manager(db, actor_id, &board)?;
    let name = match update.name.as_deref().map(str::trim) {
        Some("") => return Err(BoardError::MissingField("name")),
        Some(n) => n,
        None => board.name.as_str(),
    };
    let description = update
        .description
        .as_deref()
        .map(str::trim)
        .unwrap_or(&board.description);
    Ok(db.update_board(board_id, name, description)?)
}

/// Delete a board, its columns and tasks, and every wiki link to them.
pub fn delete_board(db: &AppDb, actor_id: i64, board_id: i64) -> Result<(), BoardError> {
    db.atomic(|db| {
        let board = require_board(db, actor_id, board_id)?;
        ensure_board_manager(db, actor_id, &board)?;
        db.delete_links_to_board(board_id)?;
        db.delete_board(board_id)?;
        tracing::info!(board_id, actor_id, "deleted board");
        Ok(())
    })
}

// ── Columns ───────────────────────────────────────────────────────────

fn check_wip_limit(limit: Option<i32>) -> Result<(), BoardError> {
    match limit {
        Some(n) if n <= 0 => Err(BoardError::InvalidWipLimit(n)),
        _ => Ok(()),
    }
}

pub fn add_column(
    db: &AppDb,
    actor_id: i64,
    board_id: i64,
    input: &ColumnInput,
) -> Result<Column, BoardError> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(BoardError::MissingField("name"));
    }
    check_wip_limit(input.wip_limit)?;
    require_board(db, actor_id, board_id)?;
    Ok(db.create_column(board_id, name, input.wip_limit, input.is_start, input.is_done)?)
}

pub fn update_column(
    db: &AppDb,
    actor_id: i64,
    column_id: i64,
    update: &ColumnUpdate,
) -> Result<Column, BoardError> {
    db.atomic(|db| {
        let (_, column) = require_column(db, actor_id, column_id)?;
        let name = match update.name.as_deref().map(str::trim) {
            Some("") => return Err(BoardError::MissingField("name")),
            Some(n) => n.to_string(),
            None => column.name.clone(),
        };
        let wip_limit = update.wip_limit.unwrap_or(column.wip_limit);
        check_wip_limit(wip_limit)?;
        if let Some(limit) = wip_limit {
            let current = db.count_tasks_in_column(column_id)?;
            if current > limit {
                return Err(BoardError::WipLimitBelowCurrent {
                    column: name,
                    limit,
                    current,
                });
            }
        }
        Ok(db.update_column(
            column_id,
            &name,
            wip_limit,
            update.is_start.unwrap_or(column.is_start),
            update.is_done.unwrap_or(column.is_done),
        )?)
    })
}

/// Reorder a board's columns; `order` must list every column exactly once.
pub fn reorder_columns(
    db: &AppDb,
    actor_id: i64,
    board_id: i64,
    order: &[i64],
) -> Result<Vec<Column>, BoardError> {
    db.atomic(|db| {
        require_board(db, actor_id, board_id)?;
        let existing: HashSet<i64> = db.list_columns(board_id)?.iter().map(|c| c.id).collect();
        let requested: HashSet<i64> = order.iter().copied().collect();
        if requested.len() != order.len() || requested != existing {
            return Err(BoardError::InvalidColumnOrder { board_id });
        }
        for (position, id) in order.iter().enumerate() {
            db.set_column_position(*id, position as i32)?;
        }
        Ok(db.list_columns(board_id)?)
    })
}

pub fn delete_column(db: &AppDb, actor_id: i64, column_id: i64) -> Result<(), BoardError> {
    db.atomic(|db| {
        let (board, column) = require_column(db, actor_id, column_id)?;
        let count = db.count_tasks_in_column(column_id)?;
        if count > 0 {
            return Err(BoardError::ColumnNotEmpty {
                column: column.name,
                count,
            });
        }
        db.delete_column(column_id)?;
        let remaining: Vec<i64> = db.list_columns(board.id)?.iter().map(|c| c.id).collect();
        for (position, id) in remaining.iter().enumerate() {
            db.set_column_position(*id, position as i32)?;
        }
        Ok(())
    })
}

// ── Task validation ───────────────────────────────────────────────────

fn check_due_date(due: Option<&str>) -> Result<Option<String>, BoardError> {
    match due.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(|d| Some(d.format("%Y-%m-%d").to_string()))
            .map_err(|_| BoardError::InvalidDueDate(raw.to_string())),
    }
}

fn check_assignee(db: &AppDb, board: &Board, assignee_id: Option<i64>) -> Result<(), BoardError> {
    let Some(user_id) = assignee_id else {
        return Ok(());
    };
    match db.get_profile(user_id)? {
        Some(profile) if profile.organization_id == board.organization_id => Ok(()),
        _ => Err(BoardError::AssigneeNotMember { user_id }),
    }
}

/// `parent_id` must sit on the same board and must not have `task_id`
/// among its ancestors.
fn check_parent(
    db: &AppDb,
    board: &Board,
    task_id: Option<i64>,
    parent_id: Option<i64>,
) -> Result<(), BoardError> {
    let Some(parent_id) = parent_id else {
        return Ok(());
    };
    if task_id == Some(parent_id) {
        return Err(BoardError::SelfReference { task_id: parent_id });
    }
    match db.board_id_for_task(parent_id)? {
        None => return Err(BoardError::TaskNotFound { id: parent_id }),
        Some(id) if id != board.id => {
            return Err(BoardError::CrossBoard {
                task_id: task_id.unwrap_or_default(),
                other_id: parent_id,
            });
        }
        Some(_) => {}
    }
    let Some(task_id) = task_id else {
        return Ok(());
    };

    let mut seen = HashSet::new();
    let mut cursor = Some(parent_id);
    while let Some(id) = cursor {
        if id == task_id {
            return Err(BoardError::ParentCycle { task_id, parent_id });
        }
        if !seen.insert(id) {
            break;
        }
        cursor = db.get_task(id)?.and_then(|t| t.parent_task_id);
    }
    Ok(())
}

/// Fail when `column` is already full.
fn check_capacity(db: &AppDb, column: &Column) -> Result<(), BoardError> {
    if let Some(limit) = column.wip_limit {
        if db.count_tasks_in_column(column.id)? >= limit {
            return Err(BoardError::WipLimitReached {
                column: column.name.clone(),
                limit,
            });
        }
    }
    Ok(())
}

/// Apply the lifecycle stamps for a task entering `column`.
fn stamp_entry(db: &AppDb, task_id: i64, column: &Column) -> Result<(), BoardError> {
    if column.is_start || column.is_done {
        db.mark_task_started(task_id)?;
    }
    if column.is_done {
        db.mark_task_completed(task_id)?;
    }
    Ok(())
}

fn repack(db: &AppDb, column_id: i64) -> Result<(), BoardError> {
    let ids: Vec<i64> = db.list_tasks_in_column(column_id)?.iter().map(|t| t.id).collect();
    db.set_task_positions(&ids)?;
    Ok(())
}

// ── Tasks ─────────────────────────────────────────────────────────────

pub fn create_task(
    db: &AppDb,
    actor_id: i64,
    column_id: i64,
    input: &TaskInput,
) -> Result<Task, BoardError> {
    let title = input.title.trim();
    if title.is_empty() {
        return Err(BoardError::MissingField("title"));
    }
    let due_date = check_due_date(input.due_date.as_deref())?;

    db.atomic(|db| {
        let (board, column) = require_column(db, actor_id, column_id)?;
        check_assignee(db, &board, input.assignee_id)?;
        check_parent(db, &board, None, input.parent_task_id)?;
        check_capacity(db, &column)?;

        let task = db.create_task(&NewTask {
            column_id,
            title,
            description: &input.description,
            priority: input.priority,
            assignee_id: input.assignee_id,
            due_date: due_date.as_deref(),
            parent_task_id: input.parent_task_id,
            created_by: Some(actor_id),
        })?;
        stamp_entry(db, task.id, &column)?;
        db.insert_activity(task.id, Some(actor_id), ActivityAction::Created, None, Some(column_id))?;
        tracing::debug!(task_id = task.id, column_id, "created task");
        db.get_task(task.id)?
            .ok_or(BoardError::TaskNotFound { id: task.id })
    })
}

pub fn task_detail(db: &AppDb, actor_id: i64, task_id: i64) -> Result<TaskDetail, BoardError> {
    let (_, task) = require_task(db, actor_id, task_id)?;
    Ok(TaskDetail {
        subtasks: db.list_subtasks(task_id)?,
        related: db.list_related_tasks(task_id)?,
        activity: db.list_activity(task_id)?,
        task,
    })
}

pub fn update_task(
    db: &AppDb,
    actor_id: i64,
    task_id: i64,
    update: &TaskUpdate,
) -> Result<Task, BoardError> {
    db.atomic(|db| {
        let (board, mut task) = require_task(db, actor_id, task_id)?;

        if let Some(title) = &update.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(BoardError::MissingField("title"));
            }
            task.title = title.to_string();
        }
        if let Some(description) = &update.description {
            task.description = description.clone();
        }
        if let Some(priority) = update.priority {
            task.priority = priority;
        }
        if let Some(assignee_id) = update.assignee_id {
            check_assignee(db, &board, assignee_id)?;
            task.assignee_id = assignee_id;
        }
        if let Some(due_date) = &update.due_date {
            task.due_date = check_due_date(due_date.as_deref())?;
        }
        if let Some(parent_id) = update.parent_task_id {
            check_parent(db, &board, Some(task_id), parent_id)?;
            task.parent_task_id = parent_id;
        }

        let saved = db.save_task_fields(&task)?;
        db.insert_activity(
            task_id,
            Some(actor_id),
            ActivityAction::Updated,
            Some(saved.column_id),
            Some(saved.column_id),
        )?;
        Ok(saved)
    })
}

pub fn delete_task(db: &AppDb, actor_id: i64, task_id: i64) -> Result<Task, BoardError> {
    db.atomic(|db| {
        let (_, task) = require_task(db, actor_id, task_id)?;
        db.delete_links_to_task(task_id)?;
        db.delete_task(task_id)?;
        repack(db, task.column_id)?;
        Ok(task)
    })
}

/// Move a task to `position` (clamped, default last) in `to_column_id`.
///
/// Entering a different column is subject to its WIP limit; reordering
/// within the same column never is. Positions in both columns are re-packed
/// and one `moved` activity row is written.
pub fn move_task(
    db: &AppDb,
    actor_id: i64,
    task_id: i64,
    to_column_id: i64,
    position: Option<i32>,
) -> Result<Task, BoardError> {
    db.atomic(|db| {
        let (board, task) = require_task(db, actor_id, task_id)?;
        let target = db
            .get_column(to_column_id)?
            .ok_or(BoardError::ColumnNotFound { id: to_column_id })?;
        if target.board_id != board.id {
            return Err(BoardError::ColumnOnOtherBoard {
                column_id: to_column_id,
                board_id: board.id,
            });
        }

        let from_column_id = task.column_id;
        let changes_column = from_column_id != to_column_id;
        if changes_column {
            check_capacity(db, &target)?;
        }

        let mut order: Vec<i64> = db
            .list_tasks_in_column(to_column_id)?
            .iter()
            .map(|t| t.id)
            .filter(|id| *id != task_id)
            .collect();
        let index = position
            .map(|p| p.clamp(0, order.len() as i32) as usize)
            .unwrap_or(order.len());
        order.insert(index, task_id);

        if changes_column {
            db.set_task_column(task_id, to_column_id)?;
            repack(db, from_column_id)?;
            stamp_entry(db, task_id, &target)?;
        }
        db.set_task_positions(&order)?;
        db.insert_activity(
            task_id,
            Some(actor_id),
            ActivityAction::Moved,
            Some(from_column_id),
            Some(to_column_id),
        )?;
        tracing::debug!(task_id, from_column_id, to_column_id, "moved task");
        db.get_task(task_id)?
            .ok_or(BoardError::TaskNotFound { id: task_id })
    })
}

pub fn list_activity(db: &AppDb, actor_id: i64, task_id: i64) -> Result<Vec<TaskActivity>, BoardError> {
    require_task(db, actor_id, task_id)?;
    Ok(db.list_activity(task_id)?)
}

fn related_pair(
    db: &AppDb,
    actor_id: i64,
    task_id: i64,
    other_id: i64,
) -> Result<(), BoardError> {
    if task_id == other_id {
        return Err(BoardError::SelfReference { task_id });
    }
    let (board, _) = require_task(db, actor_id, task_id)?;
    match db.board_id_for_task(other_id)? {
        None => Err(BoardError::TaskNotFound { id: other_id }),
        Some(id) if id != board.id => Err(BoardError::CrossBoard { task_id, other_id }),
        Some(_) => Ok(()),
    }
}

pub fn relate_tasks(db: &AppDb, actor_id: i64, task_id: i64, other_id: i64) -> Result<Vec<Task>, BoardError> {
    related_pair(db, actor_id, task_id, other_id)?;
    db.relate_tasks(task_id, other_id)?;
    Ok(db.list_related_tasks(task_id)?)
}

pub fn unrelate_tasks(db: &AppDb, actor_id: i64, task_id: i64, other_id: i64) -> Result<(), BoardError> {
    related_pair(db, actor_id, task_id, other_id)?;
    db.unrelate_tasks(task_id, other_id)?;
    Ok(())
}
