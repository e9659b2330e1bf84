//! Organization wiki: categories, versioned pages, links, attachments and
//! meeting notes.
//!
//! A page starts at version 1 with no history. Every save that changes the
//! title or the content first snapshots the revision being replaced into
//! `wiki_page_versions` (numbered with the version it had) and then bumps
//! the page's version by one. Saves that change neither produce no row.

use chrono::NaiveDate;
use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, html};
use serde::Deserialize;

use crate::db::AppDb;
use crate::errors::WikiError;
use crate::models::*;

const SLUG_MAX_LEN: usize = 80;

/// Lowercase `title` and collapse every run of non-alphanumerics into `-`.
pub fn slugify(title: &str, max_len: usize) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let slug = if slug.len() > max_len {
        slug[..max_len].trim_end_matches('-').to_string()
    } else {
        slug
    };
    if slug.is_empty() {
        "page".to_string()
    } else {
        slug
    }
}

/// First free slug for `title` in the organization: `base`, `base-2`, ...
pub fn unique_slug(db: &AppDb, org_id: i64, title: &str) -> Result<String, WikiError> {
    let base = slugify(title, SLUG_MAX_LEN);
    let mut candidate = base.clone();
    let mut n = 2;
    while db.slug_exists(org_id, &candidate)? {
        let suffix = format!("-{}", n);
        let keep = SLUG_MAX_LEN.saturating_sub(suffix.len()).min(base.len());
        candidate = format!("{}{}", base[..keep].trim_end_matches('-'), suffix);
        n += 1;
    }
    Ok(candidate)
}

const SAFE_URL_SCHEMES: [&str; 3] = ["http", "https", "mailto"];

/// Relative URLs and the `http`, `https` and `mailto` schemes.
pub fn is_safe_url(url: &str) -> bool {
    let compact: String = url
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && !c.is_control())
        .collect();
    match compact.find([':', '/', '?', '#']) {
        Some(i) if compact[i..].starts_with(':') => {
            let scheme = compact[..i].to_ascii_lowercase();
            SAFE_URL_SCHEMES.contains(&scheme.as_str())
        }
        _ => true,
    }
}

fn neutralize(url: CowStr<'_>) -> CowStr<'_> {
    if is_safe_url(&url) { url } else { CowStr::Borrowed("#") }
}

/// Render page markdown to HTML. Raw HTML in the source is escaped and
/// links or images with unsafe URL schemes point at `#`.
pub fn render_markdown(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(markdown, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Link {
            link_type,
            dest_url: neutralize(dest_url),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) => Event::Start(Tag::Image {
            link_type,
            dest_url: neutralize(dest_url),
            title,
            id,
        }),
        other => other,
    });
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Standalone HTML document for the server-rendered page view.
pub fn render_page_html(page: &WikiPage) -> String {
    let title = escape_html(&page.title);
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n</head>\n<body>\n<article class=\"wiki-page\">\n<h1>{title}</h1>\n<p class=\"meta\">Version {version} &middot; updated {updated}</p>\n{body}</article>\n</body>\n</html>\n",
        version = page.version,
        updated = escape_html(&page.updated_at),
        body = render_markdown(&page.content),
    )
}

// ── Inputs ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageInput {
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub category_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub category_id: Option<Option<i64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkInput {
    pub target_type: LinkTarget,
    pub target_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeetingInput {
    pub title: String,
    pub meeting_date: String,
    #[serde(default)]
    pub content: String,
    pub board_id: Option<i64>,
    #[serde(default)]
    pub attendee_ids: Vec<i64>,
    #[serde(default)]
    pub task_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageFilter {
    pub category: Option<i64>,
    pub q: Option<String>,
}

// ── Access ────────────────────────────────────────────────────────────

fn ensure_member(db: &AppDb, actor_id: i64, org_id: i64) -> Result<(), WikiError> {
    match db.get_profile(actor_id)? {
        Some(profile) if profile.organization_id == org_id => Ok(()),
        _ => Err(WikiError::Forbidden { org_id }),
    }
}

fn require_page(db: &AppDb, actor_id: i64, page_id: i64) -> Result<WikiPage, WikiError> {
    let page = db
        .get_page(page_id)?
        .ok_or(WikiError::PageNotFound { id: page_id })?;
    ensure_member(db, actor_id, page.organization_id)?;
    Ok(page)
}

fn require_category(db: &AppDb, actor_id: i64, category_id: i64) -> Result<WikiCategory, WikiError> {
    let category = db
        .get_category(category_id)?
        .ok_or(WikiError::CategoryNotFound { id: category_id })?;
    ensure_member(db, actor_id, category.organization_id)?;
    Ok(category)
}

fn check_category(db: &AppDb, org_id: i64, category_id: Option<i64>) -> Result<(), WikiError> {
    let Some(id) = category_id else {
        return Ok(());
    };
    match db.get_category(id)? {
        None => Err(WikiError::CategoryNotFound { id }),
        Some(c) if c.organization_id != org_id => Err(WikiError::ForeignTarget {
            target: "category",
            id,
        }),
        Some(_) => Ok(()),
    }
}

fn target_org(db: &AppDb, target: LinkTarget, id: i64) -> Result<Option<i64>, WikiError> {
    let board_id = match target {
        LinkTarget::Board => Some(id),
        LinkTarget::Task => db.board_id_for_task(id)?,
    };
    match board_id {
        Some(board_id) => Ok(db.get_board(board_id)?.map(|b| b.organization_id)),
        None => Ok(None),
    }
}

fn check_target(db: &AppDb, org_id: i64, target: LinkTarget, id: i64) -> Result<(), WikiError> {
    if target_org(db, target, id)? == Some(org_id) {
        Ok(())
    } else {
        Err(WikiError::ForeignTarget {
            target: target.as_str(),
            id,
        })
    }
}

// ── Categories ────────────────────────────────────────────────────────

pub fn create_category(
    db: &AppDb,
    actor_id: i64,
    org_id: i64,
    input: &CategoryInput,
) -> Result<WikiCategory, WikiError> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(WikiError::MissingField("name"));
    }
    ensure_member(db, actor_id, org_id)?;
    if db.category_name_exists(org_id, name, None)? {
        return Err(WikiError::DuplicateCategory(name.to_string()));
    }
    Ok(db.create_category(org_id, name, input.description.trim())?)
}

pub fn list_categories(db: &AppDb, actor_id: i64, org_id: i64) -> Result<Vec<WikiCategory>, WikiError> {
    ensure_member(db, actor_id, org_id)?;
    Ok(db.list_categories(org_id)?)
}

pub fn update_category(
    db: &AppDb,
    actor_id: i64,
    category_id: i64,
    update: &CategoryUpdate,
) -> Result<WikiCategory, WikiError> {
    let category = require_category(db, actor_id, category_id)?;
    let name = match update.name.as_deref().map(str::trim) {
        Some("") => return Err(WikiError::MissingField("name")),
        Some(n) => n,
        None => category.name.as_str(),
    };
    if db.category_name_exists(category.organization_id, name, Some(category_id))? {
        return Err(WikiError::DuplicateCategory(name.to_string()));
    }
    let description = update
        .description
        .as_deref()
        .map(str::trim)
        .unwrap_or(&category.description);
    Ok(db.update_category(category_id, name, description)?)
}

pub fn delete_category(db: &AppDb, actor_id: i64, category_id: i64) -> Result<(), WikiError> {
    require_category(db, actor_id, category_id)?;
    db.delete_category(category_id)?;
    Ok(())
}

// ── Pages ─────────────────────────────────────────────────────────────

pub fn create_page(
    db: &AppDb,
    actor_id: i64,
    org_id: i64,
    input: &PageInput,
) -> Result<WikiPage, WikiError> {
    let title = input.title.trim();
    if title.is_empty() {
        return Err(WikiError::MissingField("title"));
    }
    db.atomic(|db| {
        ensure_member(db, actor_id, org_id)?;
        check_category(db, org_id, input.category_id)?;
        let slug = unique_slug(db, org_id, title)?;
        let page = db.create_page(org_id, input.category_id, title, &slug, &input.content, Some(actor_id))?;
        tracing::info!(page_id = page.id, org_id, %slug, "created wiki page");
        Ok(page)
    })
}

pub fn list_pages(
    db: &AppDb,
    actor_id: i64,
    org_id: i64,
    filter: &PageFilter,
) -> Result<Vec<WikiPage>, WikiError> {
    ensure_member(db, actor_id, org_id)?;
    let query = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty());
    Ok(db.list_pages(org_id, filter.category, query)?)
}

pub fn get_page(db: &AppDb, actor_id: i64, page_id: i64) -> Result<WikiPage, WikiError> {
    require_page(db, actor_id, page_id)
}

pub fn get_page_by_slug(db: &AppDb, actor_id: i64, org_id: i64, slug: &str) -> Result<WikiPage, WikiError> {
    ensure_member(db, actor_id, org_id)?;
    db.get_page_by_slug(org_id, slug)?
        .ok_or_else(|| WikiError::SlugNotFound {
            slug: slug.to_string(),
        })
}

/// Persist a new revision of `page`, snapshotting the old one when the
/// title or content actually changes.
fn save_revision(
    db: &AppDb,
    page: &WikiPage,
    title: &str,
    content: &str,
    category_id: Option<i64>,
    actor_id: i64,
) -> Result<WikiPage, WikiError> {
    let changed = title != page.title || content != page.content;
    if !changed {
        if category_id == page.category_id {
            return Ok(page.clone());
        }
        return Ok(db.save_page_revision(page.id, title, content, category_id, page.version, page.updated_by)?);
    }

    db.insert_page_version(page.id, page.version, &page.title, &page.content, page.updated_by)?;
    let saved = db.save_page_revision(page.id, title, content, category_id, page.version + 1, Some(actor_id))?;
    tracing::debug!(page_id = page.id, version = saved.version, "saved wiki revision");
    Ok(saved)
}

pub fn update_page(
    db: &AppDb,
    actor_id: i64,
    page_id: i64,
    update: &PageUpdate,
) -> Result<WikiPage, WikiError> {
    db.atomic(|db| {
        let page = require_page(db, actor_id, page_id)?;
        let title = match update.title.as_deref().map(str::trim) {
            Some("") => return Err(WikiError::MissingField("title")),
            Some(t) => t,
            None => page.title.as_str(),
        };
        let content = update.content.as_deref().unwrap_or(&page.content);
        let category_id = update.category_id.unwrap_or(page.category_id);
        check_category(db, page.organization_id, category_id)?;
        save_revision(db, &page, title, content, category_id, actor_id)
    })
}

/// Delete a page. Returns the stored paths of its attachments.
pub fn delete_page(db: &AppDb, actor_id: i64, page_id: i64) -> Result<Vec<String>, WikiError> {
    db.atomic(|db| {
        require_page(db, actor_id, page_id)?;
        let stored = db
            .list_attachments(page_id)?
            .into_iter()
            .map(|a| a.stored_path)
            .collect();
        db.delete_page(page_id)?;
        Ok(stored)
    })
}

pub fn list_versions(db: &AppDb, actor_id: i64, page_id: i64) -> Result<Vec<WikiPageVersion>, WikiError> {
    require_page(db, actor_id, page_id)?;
    Ok(db.list_page_versions(page_id)?)
}

pub fn get_version(
    db: &AppDb,
    actor_id: i64,
    page_id: i64,
    version: i32,
) -> Result<WikiPageVersion, WikiError> {
    require_page(db, actor_id, page_id)?;
    db.get_page_version(page_id, version)?
        .ok_or(WikiError::VersionNotFound { page_id, version })
}

/// Make revision `version` current again. This is an ordinary save, so the
/// revision being replaced is itself kept in history.
pub fn restore_version(db: &AppDb, actor_id: i64, page_id: i64, version: i32) -> Result<WikiPage, WikiError> {
    db.atomic(|db| {
        let page = require_page(db, actor_id, page_id)?;
        let snapshot = db
            .get_page_version(page_id, version)?
            .ok_or(WikiError::VersionNotFound { page_id, version })?;
        save_revision(db, &page, &snapshot.title, &snapshot.content, page.category_id, actor_id)
    })
}

// ── Links ─────────────────────────────────────────────────────────────

pub fn add_link(db: &AppDb, actor_id: i64, page_id: i64, input: &LinkInput) -> Result<WikiLink, WikiError> {
    let page = require_page(db, actor_id, page_id)?;
    check_target(db, page.organization_id, input.target_type, input.target_id)?;
    Ok(db.create_link(page_id, input.target_type, input.target_id)?)
}

pub fn list_links(db: &AppDb, actor_id: i64, page_id: i64) -> Result<Vec<WikiLink>, WikiError> {
    require_page(db, actor_id, page_id)?;
    Ok(db.list_links_for_page(page_id)?)
}

pub fn delete_link(db: &AppDb, actor_id: i64, link_id: i64) -> Result<(), WikiError> {
    let link = db
        .get_link(link_id)?
        .ok_or(WikiError::LinkNotFound { id: link_id })?;
    require_page(db, actor_id, link.page_id)?;
    db.delete_link(link_id)?;
    Ok(())
}

/// Pages in the actor's organization that link to a task or board.
pub fn pages_linked_to(
    db: &AppDb,
    actor_id: i64,
    target: LinkTarget,
    target_id: i64,
) -> Result<Vec<WikiPage>, WikiError> {
    let org_id = target_org(db, target, target_id)?.ok_or(WikiError::ForeignTarget {
        target: target.as_str(),
        id: target_id,
    })?;
    ensure_member(db, actor_id, org_id)?;
    Ok(db.list_pages_linked_to(target, target_id)?)
}

// ── Attachments ───────────────────────────────────────────────────────

/// Record an attachment whose bytes were already written to `stored_path`.
pub fn record_attachment(
    db: &AppDb,
    actor_id: i64,
    page_id: i64,
    filename: &str,
    stored_path: &str,
    size_bytes: i64,
) -> Result<WikiAttachment, WikiError> {
    require_page(db, actor_id, page_id)?;
    Ok(db.create_attachment(page_id, filename, stored_path, size_bytes, Some(actor_id))?)
}

pub fn list_attachments(db: &AppDb, actor_id: i64, page_id: i64) -> Result<Vec<WikiAttachment>, WikiError> {
    require_page(db, actor_id, page_id)?;
    Ok(db.list_attachments(page_id)?)
}

// ── Meeting notes ─────────────────────────────────────────────────────

pub fn create_meeting(
    db: &AppDb,
    actor_id: i64,
    org_id: i64,
    input: &MeetingInput,
) -> Result<MeetingDetail, WikiError> {
    let title = input.title.trim();
    if title.is_empty() {
        return Err(WikiError::MissingField("title"));
    }
    let meeting_date = NaiveDate::parse_from_str(input.meeting_date.trim(), "%Y-%m-%d")
        .map_err(|_| WikiError::InvalidDate(input.meeting_date.clone()))?
        .format("%Y-%m-%d")
        .to_string();

    db.atomic(|db| {
        ensure_member(db, actor_id, org_id)?;
        if let Some(board_id) = input.board_id {
            check_target(db, org_id, LinkTarget::Board, board_id)?;
        }
        for user_id in &input.attendee_ids {
            match db.get_profile(*user_id)? {
                Some(p) if p.organization_id == org_id => {}
                _ => {
                    return Err(WikiError::ForeignTarget {
                        target: "user",
                        id: *user_id,
                    });
                }
            }
        }
        for task_id in &input.task_ids {
            check_target(db, org_id, LinkTarget::Task, *task_id)?;
        }

        let notes = db.create_meeting(
            org_id,
            input.board_id,
            title,
            &meeting_date,
            &input.content,
            Some(actor_id),
        )?;
        for user_id in &input.attendee_ids {
            db.add_meeting_attendee(notes.id, *user_id)?;
        }
        for task_id in &input.task_ids {
            db.add_meeting_task(notes.id, *task_id)?;
        }
        meeting_detail(db, notes)
    })
}

fn meeting_detail(db: &AppDb, notes: MeetingNotes) -> Result<MeetingDetail, WikiError> {
    let attendees = db.list_meeting_attendees(notes.id)?;
    let mut action_items = Vec::new();
    for task_id in db.list_meeting_task_ids(notes.id)? {
        if let Some(task) = db.get_task(task_id)? {
            action_items.push(task);
        }
    }
    Ok(MeetingDetail {
        notes,
        attendees,
        action_items,
    })
}

pub fn get_meeting(db: &AppDb, actor_id: i64, meeting_id: i64) -> Result<MeetingDetail, WikiError> {
    let notes = db
        .get_meeting(meeting_id)?
        .ok_or(WikiError::MeetingNotFound { id: meeting_id })?;
    ensure_member(db, actor_id, notes.organization_id)?;
    meeting_detail(db, notes)
}

pub fn list_meetings(db: &AppDb, actor_id: i64, org_id: i64) -> Result<Vec<MeetingNotes>, WikiError> {
    ensure_member(db, actor_id, org_id)?;
    Ok(db.list_meetings(org_id)?)
}

pub fn delete_meeting(db: &AppDb, actor_id: i64, meeting_id: i64) -> Result<(), WikiError> {
    let notes = db
        .get_meeting(meeting_id)?
        .ok_or(WikiError::MeetingNotFound { id: meeting_id })?;
    ensure_member(db, actor_id, notes.organization_id)?;
    db.delete_meeting(meeting_id)?;
    Ok(())
}
