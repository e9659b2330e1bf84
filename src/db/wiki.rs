use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{AppDb, parse_enum};
use crate::models::*;

const CATEGORY_COLUMNS: &str = "id, organization_id, name, description";
const PAGE_COLUMNS: &str = "id, organization_id, category_id, title, slug, content, version, created_by, updated_by, created_at, updated_at";
const VERSION_COLUMNS: &str = "id, page_id, version_number, title, content, edited_by, created_at";
const MEETING_COLUMNS: &str =
    "id, organization_id, board_id, title, meeting_date, content, created_by, created_at";

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<WikiCategory> {
    Ok(WikiCategory {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
    })
}

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<WikiPage> {
    Ok(WikiPage {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        category_id: row.get(2)?,
        title: row.get(3)?,
        slug: row.get(4)?,
        content: row.get(5)?,
        version: row.get(6)?,
        created_by: row.get(7)?,
        updated_by: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<WikiPageVersion> {
    Ok(WikiPageVersion {
        id: row.get(0)?,
        page_id: row.get(1)?,
        version_number: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        edited_by: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<WikiLink> {
    Ok(WikiLink {
        id: row.get(0)?,
        page_id: row.get(1)?,
        target_type: parse_enum(2, row.get(2)?)?,
        target_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn meeting_from_row(row: &Row<'_>) -> rusqlite::Result<MeetingNotes> {
    Ok(MeetingNotes {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        board_id: row.get(2)?,
        title: row.get(3)?,
        meeting_date: row.get(4)?,
        content: row.get(5)?,
        created_by: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl AppDb {
    // ── Categories ────────────────────────────────────────────────────

    pub fn create_category(&self, organization_id: i64, name: &str, description: &str) -> Result<WikiCategory> {
        self.conn
            .execute(
                "INSERT INTO wiki_categories (organization_id, name, description) VALUES (?1, ?2, ?3)",
                params![organization_id, name, description],
            )
            .context("Failed to insert wiki category")?;
        let id = self.conn.last_insert_rowid();
        self.get_category(id)?
            .context("Wiki category not found after insert")
    }

    pub fn get_category(&self, id: i64) -> Result<Option<WikiCategory>> {
        self.conn
            .query_row(
                &format!("SELECT {CATEGORY_COLUMNS} FROM wiki_categories WHERE id = ?1"),
                params![id],
                category_from_row,
            )
            .optional()
            .context("Failed to query wiki category")
    }

    pub fn category_name_exists(&self, organization_id: i64, name: &str, except_id: Option<i64>) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM wiki_categories
                 WHERE organization_id = ?1 AND name = ?2 AND id IS NOT ?3",
                params![organization_id, name, except_id],
                |row| row.get(0),
            )
            .context("Failed to check category name")
    }

    pub fn list_categories(&self, organization_id: i64) -> Result<Vec<WikiCategory>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {CATEGORY_COLUMNS} FROM wiki_categories WHERE organization_id = ?1 ORDER BY name"
            ))
            .context("Failed to prepare list_categories")?;
        let rows = stmt
            .query_map(params![organization_id], category_from_row)
            .context("Failed to query wiki categories")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read wiki category row")
    }

    pub fn update_category(&self, id: i64, name: &str, description: &str) -> Result<WikiCategory> {
        self.conn
            .execute(
                "UPDATE wiki_categories SET name = ?1, description = ?2 WHERE id = ?3",
                params![name, description, id],
            )
            .context("Failed to update wiki category")?;
        self.get_category(id)?
            .context("Wiki category not found after update")
    }

    pub fn delete_category(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM wiki_categories WHERE id = ?1", params![id])
            .context("Failed to delete wiki category")?;
        Ok(count > 0)
    }

    // ── Pages ─────────────────────────────────────────────────────────

    pub fn create_page(
        &self,
        organization_id: i64,
        category_id: Option<i64>,
        title: &str,
        slug: &str,
        content: &str,
        created_by: Option<i64>,
    ) -> Result<WikiPage> {
        self.conn
            .execute(
                "INSERT INTO wiki_pages (organization_id, category_id, title, slug, content, created_by, updated_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![organization_id, category_id, title, slug, content, created_by],
            )
            .context("Failed to insert wiki page")?;
        let id = self.conn.last_insert_rowid();
        self.get_page(id)?.context("Wiki page not found after insert")
    }

    pub fn get_page(&self, id: i64) -> Result<Option<WikiPage>> {
        self.conn
            .query_row(
                &format!("SELECT {PAGE_COLUMNS} FROM wiki_pages WHERE id = ?1"),
                params![id],
                page_from_row,
            )
            .optional()
            .context("Failed to query wiki page")
    }

    pub fn get_page_by_slug(&self, organization_id: i64, slug: &str) -> Result<Option<WikiPage>> {
        self.conn
            .query_row(
                &format!("SELECT {PAGE_COLUMNS} FROM wiki_pages WHERE organization_id = ?1 AND slug = ?2"),
                params![organization_id, slug],
                page_from_row,
            )
            .optional()
            .context("Failed to query wiki page by slug")
    }

    pub fn slug_exists(&self, organization_id: i64, slug: &str) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM wiki_pages WHERE organization_id = ?1 AND slug = ?2",
                params![organization_id, slug],
                |row| row.get(0),
            )
            .context("Failed to check wiki slug")
    }

    /// Pages of an organization, optionally narrowed by category and a
    /// case-insensitive substring of title or content.
    pub fn list_pages(
        &self,
        organization_id: i64,
        category_id: Option<i64>,
        query: Option<&str>,
    ) -> Result<Vec<WikiPage>> {
        let pattern = query.map(|q| format!("%{}%", escape_like(&q.to_lowercase())));
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {PAGE_COLUMNS} FROM wiki_pages
                 WHERE organization_id = ?1
                   AND (?2 IS NULL OR category_id = ?2)
                   AND (?3 IS NULL OR lower(title) LIKE ?3 ESCAPE '\\' OR lower(content) LIKE ?3 ESCAPE '\\')
                 ORDER BY title, id"
            ))
            .context("Failed to prepare list_pages")?;
        let rows = stmt
            .query_map(params![organization_id, category_id, pattern], page_from_row)
            .context("Failed to query wiki pages")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read wiki page row")
    }

    /// Overwrite the current revision of a page and set its version counter.
    pub fn save_page_revision(
        &self,
        id: i64,
        title: &str,
        content: &str,
        category_id: Option<i64>,
        version: i32,
        updated_by: Option<i64>,
    ) -> Result<WikiPage> {
        self.conn
            .execute(
                "UPDATE wiki_pages SET title = ?1, content = ?2, category_id = ?3, version = ?4,
                        updated_by = ?5, updated_at = datetime('now')
                 WHERE id = ?6",
                params![title, content, category_id, version, updated_by, id],
            )
            .context("Failed to update wiki page")?;
        self.get_page(id)?.context("Wiki page not found after update")
    }

    pub fn delete_page(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM wiki_pages WHERE id = ?1", params![id])
            .context("Failed to delete wiki page")?;
        Ok(count > 0)
    }

    // ── Versions ──────────────────────────────────────────────────────

    pub fn insert_page_version(
        &self,
        page_id: i64,
        version_number: i32,
        title: &str,
        content: &str,
        edited_by: Option<i64>,
    ) -> Result<WikiPageVersion> {
        self.conn
            .execute(
                "INSERT INTO wiki_page_versions (page_id, version_number, title, content, edited_by)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![page_id, version_number, title, content, edited_by],
            )
            .context("Failed to insert wiki page version")?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                &format!("SELECT {VERSION_COLUMNS} FROM wiki_page_versions WHERE id = ?1"),
                params![id],
                version_from_row,
            )
            .context("Wiki page version not found after insert")
    }

    pub fn list_page_versions(&self, page_id: i64) -> Result<Vec<WikiPageVersion>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {VERSION_COLUMNS} FROM wiki_page_versions WHERE page_id = ?1 ORDER BY version_number"
            ))
            .context("Failed to prepare list_page_versions")?;
        let rows = stmt
            .query_map(params![page_id], version_from_row)
            .context("Failed to query wiki page versions")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read wiki page version row")
    }

    pub fn get_page_version(&self, page_id: i64, version_number: i32) -> Result<Option<WikiPageVersion>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {VERSION_COLUMNS} FROM wiki_page_versions WHERE page_id = ?1 AND version_number = ?2"
                ),
                params![page_id, version_number],
                version_from_row,
            )
            .optional()
            .context("Failed to query wiki page version")
    }

    // ── Links ─────────────────────────────────────────────────────────

    pub fn create_link(&self, page_id: i64, target_type: LinkTarget, target_id: i64) -> Result<WikiLink> {
        self.conn
            .execute(
                "INSERT INTO wiki_links (page_id, target_type, target_id) VALUES (?1, ?2, ?3)
                 ON CONFLICT(page_id, target_type, target_id) DO NOTHING",
                params![page_id, target_type.as_str(), target_id],
            )
            .context("Failed to insert wiki link")?;
        self.conn
            .query_row(
                "SELECT id, page_id, target_type, target_id, created_at FROM wiki_links
                 WHERE page_id = ?1 AND target_type = ?2 AND target_id = ?3",
                params![page_id, target_type.as_str(), target_id],
                link_from_row,
            )
            .context("Wiki link not found after insert")
    }

    pub fn get_link(&self, id: i64) -> Result<Option<WikiLink>> {
        self.conn
            .query_row(
                "SELECT id, page_id, target_type, target_id, created_at FROM wiki_links WHERE id = ?1",
                params![id],
                link_from_row,
            )
            .optional()
            .context("Failed to query wiki link")
    }

    pub fn list_links_for_page(&self, page_id: i64) -> Result<Vec<WikiLink>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, page_id, target_type, target_id, created_at FROM wiki_links
                 WHERE page_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_links_for_page")?;
        let rows = stmt
            .query_map(params![page_id], link_from_row)
            .context("Failed to query wiki links")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read wiki link row")
    }

    pub fn list_pages_linked_to(&self, target_type: LinkTarget, target_id: i64) -> Result<Vec<WikiPage>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {PAGE_COLUMNS} FROM wiki_pages WHERE id IN (
                    SELECT page_id FROM wiki_links WHERE target_type = ?1 AND target_id = ?2
                 ) ORDER BY title, id"
            ))
            .context("Failed to prepare list_pages_linked_to")?;
        let rows = stmt
            .query_map(params![target_type.as_str(), target_id], page_from_row)
            .context("Failed to query linked wiki pages")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read wiki page row")
    }

    /// Drop links pointing at a task that is about to be deleted.
    pub fn delete_links_to_task(&self, task_id: i64) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM wiki_links WHERE target_type = 'task' AND target_id = ?1",
                params![task_id],
            )
            .context("Failed to delete wiki links to task")
    }

    /// Drop links pointing at a board or any of its tasks.
    pub fn delete_links_to_board(&self, board_id: i64) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM wiki_links
                 WHERE (target_type = 'board' AND target_id = ?1)
                    OR (target_type = 'task' AND target_id IN (
                        SELECT t.id FROM tasks t
                        JOIN board_columns c ON c.id = t.column_id
                        WHERE c.board_id = ?1))",
                params![board_id],
            )
            .context("Failed to delete wiki links to board")
    }

    pub fn delete_link(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM wiki_links WHERE id = ?1", params![id])
            .context("Failed to delete wiki link")?;
        Ok(count > 0)
    }

    // ── Attachments ───────────────────────────────────────────────────

    pub fn create_attachment(
        &self,
        page_id: i64,
        filename: &str,
        stored_path: &str,
        size_bytes: i64,
        uploaded_by: Option<i64>,
    ) -> Result<WikiAttachment> {
        self.conn
            .execute(
                "INSERT INTO wiki_attachments (page_id, filename, stored_path, size_bytes, uploaded_by)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![page_id, filename, stored_path, size_bytes, uploaded_by],
            )
            .context("Failed to insert wiki attachment")?;
        let id = self.conn.last_insert_rowid();
        self.list_attachments(page_id)?
            .into_iter()
            .find(|a| a.id == id)
            .context("Wiki attachment not found after insert")
    }

    /// Stored paths of every attachment on the organization's pages.
    pub fn list_org_attachment_paths(&self, organization_id: i64) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT a.stored_path FROM wiki_attachments a
                 JOIN wiki_pages p ON p.id = a.page_id
                 WHERE p.organization_id = ?1 ORDER BY a.id",
            )
            .context("Failed to prepare list_org_attachment_paths")?;
        let rows = stmt
            .query_map(params![organization_id], |row| row.get(0))
            .context("Failed to query attachment paths")?;
        rows.collect::<rusqlite::Result<Vec<String>>>()
            .context("Failed to read attachment path")
    }

    pub fn list_attachments(&self, page_id: i64) -> Result<Vec<WikiAttachment>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, page_id, filename, stored_path, size_bytes, uploaded_by, created_at
                 FROM wiki_attachments WHERE page_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_attachments")?;
        let rows = stmt
            .query_map(params![page_id], |row| {
                Ok(WikiAttachment {
                    id: row.get(0)?,
                    page_id: row.get(1)?,
                    filename: row.get(2)?,
                    stored_path: row.get(3)?,
                    size_bytes: row.get(4)?,
                    uploaded_by: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })
            .context("Failed to query wiki attachments")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read wiki attachment row")
    }

    // ── Meeting notes ─────────────────────────────────────────────────

    pub fn create_meeting(
        &self,
        organization_id: i64,
        board_id: Option<i64>,
        title: &str,
        meeting_date: &str,
        content: &str,
        created_by: Option<i64>,
    ) -> Result<MeetingNotes> {
        self.conn
            .execute(
                "INSERT INTO meeting_notes (organization_id, board_id, title, meeting_date, content, created_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![organization_id, board_id, title, meeting_date, content, created_by],
            )
            .context("Failed to insert meeting notes")?;
        let id = self.conn.last_insert_rowid();
        self.get_meeting(id)?
            .context("Meeting notes not found after insert")
    }

    pub fn get_meeting(&self, id: i64) -> Result<Option<MeetingNotes>> {
        self.conn
            .query_row(
                &format!("SELECT {MEETING_COLUMNS} FROM meeting_notes WHERE id = ?1"),
                params![id],
                meeting_from_row,
            )
            .optional()
            .context("Failed to query meeting notes")
    }

    pub fn list_meetings(&self, organization_id: i64) -> Result<Vec<MeetingNotes>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {MEETING_COLUMNS} FROM meeting_notes WHERE organization_id = ?1
                 ORDER BY meeting_date DESC, id DESC"
            ))
            .context("Failed to prepare list_meetings")?;
        let rows = stmt
            .query_map(params![organization_id], meeting_from_row)
            .context("Failed to query meeting notes")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read meeting notes row")
    }

    pub fn delete_meeting(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM meeting_notes WHERE id = ?1", params![id])
            .context("Failed to delete meeting notes")?;
        Ok(count > 0)
    }

    pub fn add_meeting_attendee(&self, meeting_id: i64, user_id: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO meeting_attendees (meeting_id, user_id) VALUES (?1, ?2)",
                params![meeting_id, user_id],
            )
            .context("Failed to insert meeting attendee")?;
        Ok(())
    }

    pub fn add_meeting_task(&self, meeting_id: i64, task_id: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO meeting_tasks (meeting_id, task_id) VALUES (?1, ?2)",
                params![meeting_id, task_id],
            )
            .context("Failed to insert meeting action item")?;
        Ok(())
    }

    pub fn list_meeting_attendees(&self, meeting_id: i64) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT u.id, u.email, u.username, u.first_name, u.last_name, u.created_at
                 FROM meeting_attendees a JOIN users u ON u.id = a.user_id
                 WHERE a.meeting_id = ?1 ORDER BY u.id",
            )
            .context("Failed to prepare list_meeting_attendees")?;
        let rows = stmt
            .query_map(params![meeting_id], |row| {
                Ok(User {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    username: row.get(2)?,
                    first_name: row.get(3)?,
                    last_name: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })
            .context("Failed to query meeting attendees")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read attendee row")
    }

    pub fn list_meeting_task_ids(&self, meeting_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT task_id FROM meeting_tasks WHERE meeting_id = ?1 ORDER BY task_id")
            .context("Failed to prepare list_meeting_task_ids")?;
        let rows = stmt
            .query_map(params![meeting_id], |row| row.get(0))
            .context("Failed to query meeting action items")?;
        rows.collect::<rusqlite::Result<Vec<i64>>>()
            .context("Failed to read action item row")
    }
}

/// Escape `%`, `_` and `\` so user input matches literally under
/// `LIKE .. ESCAPE '\'`.
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
