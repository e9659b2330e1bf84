use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{AppDb, parse_enum};
use crate::models::*;

const BOARD_COLUMNS: &str = "id, organization_id, name, description, created_by, created_at";
const COLUMN_COLUMNS: &str = "id, board_id, name, position, wip_limit, is_start, is_done";
const TASK_COLUMNS: &str = "id, column_id, title, description, priority, position, assignee_id, due_date, parent_task_id, created_by, created_at, updated_at, started_at, completed_at";
const ACTIVITY_COLUMNS: &str =
    "id, task_id, actor_id, action, from_column_id, to_column_id, created_at";

fn board_from_row(row: &Row<'_>) -> rusqlite::Result<Board> {
    Ok(Board {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        created_by: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn column_from_row(row: &Row<'_>) -> rusqlite::Result<Column> {
    Ok(Column {
        id: row.get(0)?,
        board_id: row.get(1)?,
        name: row.get(2)?,
        position: row.get(3)?,
        wip_limit: row.get(4)?,
        is_start: row.get::<_, i64>(5)? != 0,
        is_done: row.get::<_, i64>(6)? != 0,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        column_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        priority: parse_enum(4, row.get(4)?)?,
        position: row.get(5)?,
        assignee_id: row.get(6)?,
        due_date: row.get(7)?,
        parent_task_id: row.get(8)?,
        created_by: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        started_at: row.get(12)?,
        completed_at: row.get(13)?,
    })
}

fn activity_from_row(row: &Row<'_>) -> rusqlite::Result<TaskActivity> {
    Ok(TaskActivity {
        id: row.get(0)?,
        task_id: row.get(1)?,
        actor_id: row.get(2)?,
        action: parse_enum(3, row.get(3)?)?,
        from_column_id: row.get(4)?,
        to_column_id: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Fields for a task insert; placement is decided by the store.
pub struct NewTask<'a> {
    pub column_id: i64,
    pub title: &'a str,
    pub description: &'a str,
    pub priority: Priority,
    pub assignee_id: Option<i64>,
    pub due_date: Option<&'a str>,
    pub parent_task_id: Option<i64>,
    pub created_by: Option<i64>,
}

impl AppDb {
    // ── Boards ────────────────────────────────────────────────────────

    pub fn create_board(
        &self,
        organization_id: i64,
        name: &str,
        description: &str,
        created_by: Option<i64>,
    ) -> Result<Board> {
        self.conn
            .execute(
                "INSERT INTO boards (organization_id, name, description, created_by) VALUES (?1, ?2, ?3, ?4)",
                params![organization_id, name, description, created_by],
            )
            .context("Failed to insert board")?;
        let id = self.conn.last_insert_rowid();
        self.get_board(id)?.context("Board not found after insert")
    }

    pub fn get_board(&self, id: i64) -> Result<Option<Board>> {
        self.conn
            .query_row(
                &format!("SELECT {BOARD_COLUMNS} FROM boards WHERE id = ?1"),
                params![id],
                board_from_row,
            )
            .optional()
            .context("Failed to query board")
    }

    pub fn list_boards(&self, organization_id: i64) -> Result<Vec<Board>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {BOARD_COLUMNS} FROM boards WHERE organization_id = ?1 ORDER BY id"
            ))
            .context("Failed to prepare list_boards")?;
        let rows = stmt
            .query_map(params![organization_id], board_from_row)
            .context("Failed to query boards")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read board row")
    }

    pub fn update_board(&self, id: i64, name: &str, description: &str) -> Result<Board> {
        self.conn
            .execute(
                "UPDATE boards SET name = ?1, description = ?2 WHERE id = ?3",
                params![name, description, id],
            )
            .context("Failed to update board")?;
        self.get_board(id)?.context("Board not found after update")
    }

    pub fn delete_board(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM boards WHERE id = ?1", params![id])
            .context("Failed to delete board")?;
        Ok(count > 0)
    }

    pub fn add_board_member(&self, board_id: i64, user_id: i64, role: BoardRole) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO board_members (board_id, user_id, role) VALUES (?1, ?2, ?3)
                 ON CONFLICT(board_id, user_id) DO UPDATE SET role = excluded.role",
                params![board_id, user_id, role.as_str()],
            )
            .context("Failed to insert board member")?;
        Ok(())
    }

    pub fn list_board_members(&self, board_id: i64) -> Result<Vec<BoardMember>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT board_id, user_id, role FROM board_members WHERE board_id = ?1 ORDER BY user_id",
            )
            .context("Failed to prepare list_board_members")?;
        let rows = stmt
            .query_map(params![board_id], |row| {
                Ok(BoardMember {
                    board_id: row.get(0)?,
                    user_id: row.get(1)?,
                    role: parse_enum(2, row.get(2)?)?,
                })
            })
            .context("Failed to query board members")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read board member row")
    }

    // ── Columns ───────────────────────────────────────────────────────

    pub fn create_column(
        &self,
        board_id: i64,
        name: &str,
        wip_limit: Option<i32>,
        is_start: bool,
        is_done: bool,
    ) -> Result<Column> {
        let max_pos: i32 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(position), -1) FROM board_columns WHERE board_id = ?1",
                params![board_id],
                |row| row.get(0),
            )
            .context("Failed to get max column position")?;
        self.conn
            .execute(
                "INSERT INTO board_columns (board_id, name, position, wip_limit, is_start, is_done)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![board_id, name, max_pos + 1, wip_limit, is_start, is_done],
            )
            .context("Failed to insert column")?;
        let id = self.conn.last_insert_rowid();
        self.get_column(id)?.context("Column not found after insert")
    }

    pub fn get_column(&self, id: i64) -> Result<Option<Column>> {
        self.conn
            .query_row(
                &format!("SELECT {COLUMN_COLUMNS} FROM board_columns WHERE id = ?1"),
                params![id],
                column_from_row,
            )
            .optional()
            .context("Failed to query column")
    }

    pub fn list_columns(&self, board_id: i64) -> Result<Vec<Column>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {COLUMN_COLUMNS} FROM board_columns WHERE board_id = ?1 ORDER BY position, id"
            ))
            .context("Failed to prepare list_columns")?;
        let rows = stmt
            .query_map(params![board_id], column_from_row)
            .context("Failed to query columns")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read column row")
    }

    pub fn update_column(
        &self,
        id: i64,
        name: &str,
        wip_limit: Option<i32>,
        is_start: bool,
        is_done: bool,
    ) -> Result<Column> {
        self.conn
            .execute(
                "UPDATE board_columns SET name = ?1, wip_limit = ?2, is_start = ?3, is_done = ?4 WHERE id = ?5",
                params![name, wip_limit, is_start, is_done, id],
            )
            .context("Failed to update column")?;
        self.get_column(id)?.context("Column not found after update")
    }

    pub fn set_column_position(&self, id: i64, position: i32) -> Result<()> {
        self.conn
            .execute(
                "UPDATE board_columns SET position = ?1 WHERE id = ?2",
                params![position, id],
            )
            .context("Failed to set column position")?;
        Ok(())
    }

    pub fn delete_column(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM board_columns WHERE id = ?1", params![id])
            .context("Failed to delete column")?;
        Ok(count > 0)
    }

    pub fn count_tasks_in_column(&self, column_id: i64) -> Result<i32> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE column_id = ?1",
                params![column_id],
                |row| row.get(0),
            )
            .context("Failed to count tasks in column")
    }

    // ── Tasks ─────────────────────────────────────────────────────────

    pub fn create_task(&self, new: &NewTask<'_>) -> Result<Task> {
        let max_pos: i32 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(position), -1) FROM tasks WHERE column_id = ?1",
                params![new.column_id],
                |row| row.get(0),
            )
            .context("Failed to get max task position")?;
        self.conn
            .execute(
                "INSERT INTO tasks (column_id, title, description, priority, position, assignee_id, due_date, parent_task_id, created_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    new.column_id,
                    new.title,
                    new.description,
                    new.priority.as_str(),
                    max_pos + 1,
                    new.assignee_id,
                    new.due_date,
                    new.parent_task_id,
                    new.created_by
                ],
            )
            .context("Failed to insert task")?;
        let id = self.conn.last_insert_rowid();
        self.get_task(id)?.context("Task not found after insert")
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        self.conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                task_from_row,
            )
            .optional()
            .context("Failed to query task")
    }

    pub fn list_tasks_in_column(&self, column_id: i64) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE column_id = ?1 ORDER BY position, id"
            ))
            .context("Failed to prepare list_tasks_in_column")?;
        let rows = stmt
            .query_map(params![column_id], task_from_row)
            .context("Failed to query tasks")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read task row")
    }

    pub fn list_tasks_for_board(&self, board_id: i64) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT t.id, t.column_id, t.title, t.description, t.priority, t.position, t.assignee_id,
                        t.due_date, t.parent_task_id, t.created_by, t.created_at, t.updated_at,
                        t.started_at, t.completed_at
                 FROM tasks t JOIN board_columns c ON c.id = t.column_id
                 WHERE c.board_id = ?1 ORDER BY c.position, t.position, t.id",
            )
            .context("Failed to prepare list_tasks_for_board")?;
        let rows = stmt
            .query_map(params![board_id], task_from_row)
            .context("Failed to query board tasks")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read task row")
    }

    pub fn list_subtasks(&self, parent_id: i64) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE parent_task_id = ?1 ORDER BY id"
            ))
            .context("Failed to prepare list_subtasks")?;
        let rows = stmt
            .query_map(params![parent_id], task_from_row)
            .context("Failed to query subtasks")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read task row")
    }

    /// Persist the editable fields of `task` (not its placement or stamps).
    pub fn save_task_fields(&self, task: &Task) -> Result<Task> {
        self.conn
            .execute(
                "UPDATE tasks SET title = ?1, description = ?2, priority = ?3, assignee_id = ?4,
                        due_date = ?5, parent_task_id = ?6, updated_at = datetime('now')
                 WHERE id = ?7",
                params![
                    task.title,
                    task.description,
                    task.priority.as_str(),
                    task.assignee_id,
                    task.due_date,
                    task.parent_task_id,
                    task.id
                ],
            )
            .context("Failed to update task")?;
        self.get_task(task.id)?.context("Task not found after update")
    }

    pub fn set_task_column(&self, id: i64, column_id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE tasks SET column_id = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![column_id, id],
            )
            .context("Failed to move task")?;
        Ok(())
    }

    /// Rewrite positions of the given tasks to 0..n in the given order.
    pub fn set_task_positions(&self, ordered_ids: &[i64]) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("UPDATE tasks SET position = ?1 WHERE id = ?2")
            .context("Failed to prepare set_task_positions")?;
        for (position, id) in ordered_ids.iter().enumerate() {
            stmt.execute(params![position as i32, id])
                .context("Failed to set task position")?;
        }
        Ok(())
    }

    /// Stamp `started_at` unless it is already set.
    pub fn mark_task_started(&self, id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE tasks SET started_at = datetime('now') WHERE id = ?1 AND started_at IS NULL",
                params![id],
            )
            .context("Failed to stamp started_at")?;
        Ok(())
    }

    /// Stamp `completed_at` unless it is already set.
    pub fn mark_task_completed(&self, id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE tasks SET completed_at = datetime('now') WHERE id = ?1 AND completed_at IS NULL",
                params![id],
            )
            .context("Failed to stamp completed_at")?;
        Ok(())
    }

    pub fn delete_task(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .context("Failed to delete task")?;
        Ok(count > 0)
    }

    pub fn board_id_for_column(&self, column_id: i64) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT board_id FROM board_columns WHERE id = ?1",
                params![column_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up column board")
    }

    pub fn board_id_for_task(&self, task_id: i64) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT c.board_id FROM tasks t JOIN board_columns c ON c.id = t.column_id WHERE t.id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up task board")
    }

    // ── Relations ─────────────────────────────────────────────────────

    pub fn relate_tasks(&self, a: i64, b: i64) -> Result<()> {
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        self.conn
            .execute(
                "INSERT OR IGNORE INTO task_relations (task_id, related_id) VALUES (?1, ?2)",
                params![low, high],
            )
            .context("Failed to relate tasks")?;
        Ok(())
    }

    pub fn unrelate_tasks(&self, a: i64, b: i64) -> Result<bool> {
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let count = self
            .conn
            .execute(
                "DELETE FROM task_relations WHERE task_id = ?1 AND related_id = ?2",
                params![low, high],
            )
            .context("Failed to unrelate tasks")?;
        Ok(count > 0)
    }

    pub fn list_related_tasks(&self, task_id: i64) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE id IN (
                    SELECT related_id FROM task_relations WHERE task_id = ?1
                    UNION SELECT task_id FROM task_relations WHERE related_id = ?1
                 ) ORDER BY id"
            ))
            .context("Failed to prepare list_related_tasks")?;
        let rows = stmt
            .query_map(params![task_id], task_from_row)
            .context("Failed to query related tasks")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read task row")
    }

    // ── Activity ──────────────────────────────────────────────────────

    pub fn insert_activity(
        &self,
        task_id: i64,
        actor_id: Option<i64>,
        action: ActivityAction,
        from_column_id: Option<i64>,
        to_column_id: Option<i64>,
    ) -> Result<TaskActivity> {
        self.conn
            .execute(
                "INSERT INTO task_activity (task_id, actor_id, action, from_column_id, to_column_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![task_id, actor_id, action.as_str(), from_column_id, to_column_id],
            )
            .context("Failed to insert task activity")?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                &format!("SELECT {ACTIVITY_COLUMNS} FROM task_activity WHERE id = ?1"),
                params![id],
                activity_from_row,
            )
            .context("Task activity not found after insert")
    }

    pub fn list_activity(&self, task_id: i64) -> Result<Vec<TaskActivity>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {ACTIVITY_COLUMNS} FROM task_activity WHERE task_id = ?1 ORDER BY id"
            ))
            .context("Failed to prepare list_activity")?;
        let rows = stmt
            .query_map(params![task_id], activity_from_row)
            .context("Failed to query task activity")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read activity row")
    }
}
