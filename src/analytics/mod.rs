//! Board and organization metrics, and the prompt handed to the AI
//! summary client.

pub mod client;

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

pub use client::{GeminiClient, SummaryClient};

use crate::board;
use crate::db::AppDb;
use crate::errors::{AnalyticsError, BoardError};
use crate::models::{Board, Column, Priority, Task};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ColumnMetrics {
    pub column_id: i64,
    pub name: String,
    pub task_count: usize,
    pub wip_limit: Option<i32>,
    /// `task_count / wip_limit`, only for limited columns.
    pub wip_utilisation: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MetricTotals {
    pub total_tasks: usize,
    pub by_priority: BTreeMap<String, usize>,
    pub started: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub overdue: usize,
    pub unassigned: usize,
    pub completed_last_7_days: usize,
    pub avg_cycle_hours: Option<f64>,
    pub cycle_samples: usize,
}

impl MetricTotals {
    /// Merge another set of totals into this one, weighting cycle time by
    /// sample count.
    pub fn absorb(&mut self, other: &MetricTotals) {
        self.total_tasks += other.total_tasks;
        for (priority, count) in &other.by_priority {
            *self.by_priority.entry(priority.clone()).or_insert(0) += count;
        }
        self.started += other.started;
        self.in_progress += other.in_progress;
        self.completed += other.completed;
        self.overdue += other.overdue;
        self.unassigned += other.unassigned;
        self.completed_last_7_days += other.completed_last_7_days;

        let samples = self.cycle_samples + other.cycle_samples;
        if samples > 0 {
            let sum = self.avg_cycle_hours.unwrap_or(0.0) * self.cycle_samples as f64
                + other.avg_cycle_hours.unwrap_or(0.0) * other.cycle_samples as f64;
            self.avg_cycle_hours = Some(sum / samples as f64);
        }
        self.cycle_samples = samples;
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BoardMetrics {
    pub board_id: i64,
    pub board_name: String,
    #[serde(flatten)]
    pub totals: MetricTotals,
    pub columns: Vec<ColumnMetrics>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OrgMetrics {
    pub organization_id: i64,
    pub organization_name: String,
    #[serde(flatten)]
    pub totals: MetricTotals,
    pub boards: Vec<BoardMetrics>,
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).ok()
}

/// Pure metric computation over already-loaded rows.
pub fn compute_board_metrics(
    board: &Board,
    columns: &[Column],
    tasks: &[Task],
    now: NaiveDateTime,
) -> BoardMetrics {
    let today: NaiveDate = now.date();
    let week_ago = now - Duration::days(7);

    let mut totals = MetricTotals {
        total_tasks: tasks.len(),
        ..Default::default()
    };
    for p in Priority::all() {
        totals.by_priority.insert(p.as_str().to_string(), 0);
    }

    let mut cycle_sum = 0.0;
    for task in tasks {
        *totals
            .by_priority
            .entry(task.priority.as_str().to_string())
            .or_insert(0) += 1;

        let started = task.started_at.as_deref().and_then(parse_timestamp);
        let completed = task.completed_at.as_deref().and_then(parse_timestamp);

        if task.started_at.is_some() {
            totals.started += 1;
        }
        if task.completed_at.is_some() {
            totals.completed += 1;
        } else if task.started_at.is_some() {
            totals.in_progress += 1;
        }
        if task.assignee_id.is_none() {
            totals.unassigned += 1;
        }
        if task.completed_at.is_none() {
            let due = task
                .due_date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
            if matches!(due, Some(d) if d < today) {
                totals.overdue += 1;
            }
        }
        if matches!(completed, Some(c) if c >= week_ago) {
            totals.completed_last_7_days += 1;
        }
        if let (Some(s), Some(c)) = (started, completed) {
            cycle_sum += (c - s).num_seconds().max(0) as f64 / 3600.0;
            totals.cycle_samples += 1;
        }
    }
    if totals.cycle_samples > 0 {
        totals.avg_cycle_hours = Some(cycle_sum / totals.cycle_samples as f64);
    }

    let columns = columns
        .iter()
        .map(|column| {
            let task_count = tasks.iter().filter(|t| t.column_id == column.id).count();
            ColumnMetrics {
                column_id: column.id,
                name: column.name.clone(),
                task_count,
                wip_limit: column.wip_limit,
                wip_utilisation: column
                    .wip_limit
                    .filter(|l| *l > 0)
                    .map(|l| task_count as f64 / l as f64),
            }
        })
        .collect();

    BoardMetrics {
        board_id: board.id,
        board_name: board.name.clone(),
        totals,
        columns,
    }
}

fn load_board_metrics(db: &AppDb, board: &Board, now: NaiveDateTime) -> Result<BoardMetrics, AnalyticsError> {
    let columns = db.list_columns(board.id)?;
    let tasks = db.list_tasks_for_board(board.id)?;
    Ok(compute_board_metrics(board, &columns, &tasks, now))
}

pub fn collect_board_metrics(db: &AppDb, actor_id: i64, board_id: i64) -> Result<BoardMetrics, AnalyticsError> {
    let board = board::require_board(db, actor_id, board_id)?;
    load_board_metrics(db, &board, Utc::now().naive_utc())
}

/// Metrics for one board without a membership check; for operator tooling
/// such as `orgboard summary`.
pub fn board_metrics_unscoped(db: &AppDb, board_id: i64) -> Result<BoardMetrics, AnalyticsError> {
    let board = db
        .get_board(board_id)?
        .ok_or(BoardError::BoardNotFound { id: board_id })?;
    load_board_metrics(db, &board, Utc::now().naive_utc())
}

pub fn collect_org_metrics(db: &AppDb, actor_id: i64, org_id: i64) -> Result<OrgMetrics, AnalyticsError> {
    let boards = board::list_boards(db, actor_id, org_id)?;
    let organization = db
        .get_organization(org_id)?
        .ok_or_else(|| board_forbidden(org_id))?;
    let now = Utc::now().naive_utc();

    let mut totals = MetricTotals::default();
    let mut per_board = Vec::with_capacity(boards.len());
    for board in &boards {
        let metrics = load_board_metrics(db, board, now)?;
        totals.absorb(&metrics.totals);
        per_board.push(metrics);
    }
    Ok(OrgMetrics {
        organization_id: org_id,
        organization_name: organization.name,
        totals,
        boards: per_board,
    })
}

fn board_forbidden(org_id: i64) -> AnalyticsError {
    AnalyticsError::Board(BoardError::OrganizationForbidden { org_id })
}

fn push_totals(out: &mut String, totals: &MetricTotals) {
    out.push_str(&format!("- Total tasks: {}\n", totals.total_tasks));
    out.push_str(&format!("- Started: {}\n", totals.started));
    out.push_str(&format!("- In progress: {}\n", totals.in_progress));
    out.push_str(&format!("- Completed: {}\n", totals.completed));
    out.push_str(&format!("- Completed in the last 7 days: {}\n", totals.completed_last_7_days));
    out.push_str(&format!("- Overdue: {}\n", totals.overdue));
    out.push_str(&format!("- Unassigned: {}\n", totals.unassigned));
    match totals.avg_cycle_hours {
        Some(hours) => out.push_str(&format!("- Average cycle time: {:.1} hours\n", hours)),
        None => out.push_str("- Average cycle time: n/a\n"),
    }
    let priorities: Vec<String> = totals
        .by_priority
        .iter()
        .map(|(p, n)| format!("{}={}", p, n))
        .collect();
    out.push_str(&format!("- By priority: {}\n", priorities.join(", ")));
}

fn push_columns(out: &mut String, columns: &[ColumnMetrics]) {
    for c in columns {
        match (c.wip_limit, c.wip_utilisation) {
            (Some(limit), Some(u)) => out.push_str(&format!(
                "  - {}: {} tasks (WIP limit {}, {:.0}% used)\n",
                c.name,
                c.task_count,
                limit,
                u * 100.0
            )),
            _ => out.push_str(&format!("  - {}: {} tasks\n", c.name, c.task_count)),
        }
    }
}

const PROMPT_INSTRUCTIONS: &str = "You are a project management assistant. Write a short summary \
(at most 5 bullet points) of the team's progress based only on the metrics below. \
Call out bottlenecks, overdue work and WIP-limit pressure. Do not invent numbers.\n\n";

pub fn build_board_prompt(metrics: &BoardMetrics) -> String {
    let mut out = String::from(PROMPT_INSTRUCTIONS);
    out.push_str(&format!("Board: {}\n", metrics.board_name));
    push_totals(&mut out, &metrics.totals);
    out.push_str("- Columns:\n");
    push_columns(&mut out, &metrics.columns);
    out
}

pub fn build_org_prompt(metrics: &OrgMetrics) -> String {
    let mut out = String::from(PROMPT_INSTRUCTIONS);
    out.push_str(&format!(
        "Organization: {} ({} boards)\n",
        metrics.organization_name,
        metrics.boards.len()
    ));
    push_totals(&mut out, &metrics.totals);
    for board in &metrics.boards {
        out.push_str(&format!("Board {}:\n", board.board_name));
        push_columns(&mut out, &board.columns);
    }
    out
}

/// Ask the AI client for a summary of `prompt`. Failures are logged and
/// returned as-is; there is no fallback or retry.
pub async fn summarize(client: &dyn SummaryClient, prompt: &str) -> Result<String, AnalyticsError> {
    match client.summarize(prompt).await {
        Ok(text) => Ok(text),
        Err(e) => {
            tracing::warn!(error = %e, "AI summary request failed");
            Err(e)
        }
    }
}
