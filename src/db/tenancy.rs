use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::AppDb;
use crate::models::{Member, Organization, User, UserProfile};

const USER_COLUMNS: &str = "id, email, username, first_name, last_name, created_at";
const ORG_COLUMNS: &str = "id, name, domain, created_by, created_at";
const PROFILE_COLUMNS: &str = "user_id, organization_id, is_admin, picture, joined_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn org_from_row(row: &Row<'_>) -> rusqlite::Result<Organization> {
    Ok(Organization {
        id: row.get(0)?,
        name: row.get(1)?,
        domain: row.get(2)?,
        created_by: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        user_id: row.get(0)?,
        organization_id: row.get(1)?,
        is_admin: row.get::<_, i64>(2)? != 0,
        picture: row.get(3)?,
        joined_at: row.get(4)?,
    })
}

impl AppDb {
    // ── Users ─────────────────────────────────────────────────────────

    pub fn create_user(
        &self,
        email: &str,
        username: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<User> {
        self.conn
            .execute(
                "INSERT INTO users (email, username, first_name, last_name) VALUES (?1, ?2, ?3, ?4)",
                params![email, username, first_name, last_name],
            )
            .context("Failed to insert user")?;
        let id = self.conn.last_insert_rowid();
        self.get_user(id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()
            .context("Failed to query user")
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
                user_from_row,
            )
            .optional()
            .context("Failed to query user by email")
    }

    pub fn username_exists(&self, username: &str) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .context("Failed to check username")
    }

    pub fn update_user_names(&self, id: i64, first_name: &str, last_name: &str) -> Result<User> {
        self.conn
            .execute(
                "UPDATE users SET first_name = ?1, last_name = ?2 WHERE id = ?3",
                params![first_name, last_name, id],
            )
            .context("Failed to update user names")?;
        self.get_user(id)?.context("User not found after update")
    }

    // ── Organizations ─────────────────────────────────────────────────

    pub fn create_organization(
        &self,
        name: &str,
        domain: &str,
        created_by: Option<i64>,
    ) -> Result<Organization> {
        self.conn
            .execute(
                "INSERT INTO organizations (name, domain, created_by) VALUES (?1, ?2, ?3)",
                params![name, domain, created_by],
            )
            .context("Failed to insert organization")?;
        let id = self.conn.last_insert_rowid();
        self.get_organization(id)?
            .context("Organization not found after insert")
    }

    pub fn get_organization(&self, id: i64) -> Result<Option<Organization>> {
        self.conn
            .query_row(
                &format!("SELECT {ORG_COLUMNS} FROM organizations WHERE id = ?1"),
                params![id],
                org_from_row,
            )
            .optional()
            .context("Failed to query organization")
    }

    /// Organizations registered for `domain`, oldest first (ties by id).
    pub fn find_organizations_by_domain(&self, domain: &str) -> Result<Vec<Organization>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {ORG_COLUMNS} FROM organizations WHERE domain = ?1 ORDER BY created_at, id"
            ))
            .context("Failed to prepare find_organizations_by_domain")?;
        let rows = stmt
            .query_map(params![domain], org_from_row)
            .context("Failed to query organizations by domain")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read organization row")
    }

    pub fn update_organization(&self, id: i64, name: &str, domain: &str) -> Result<Organization> {
        self.conn
            .execute(
                "UPDATE organizations SET name = ?1, domain = ?2 WHERE id = ?3",
                params![name, domain, id],
            )
            .context("Failed to update organization")?;
        self.get_organization(id)?
            .context("Organization not found after update")
    }

    pub fn delete_organization(&self, id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM organizations WHERE id = ?1", params![id])
            .context("Failed to delete organization")?;
        Ok(count > 0)
    }

    // ── Profiles ──────────────────────────────────────────────────────

    pub fn create_profile(&self, user_id: i64, organization_id: i64, is_admin: bool) -> Result<UserProfile> {
        self.conn
            .execute(
                "INSERT INTO user_profiles (user_id, organization_id, is_admin) VALUES (?1, ?2, ?3)",
                params![user_id, organization_id, is_admin],
            )
            .context("Failed to insert user profile")?;
        self.get_profile(user_id)?
            .context("Profile not found after insert")
    }

    pub fn get_profile(&self, user_id: i64) -> Result<Option<UserProfile>> {
        self.conn
            .query_row(
                &format!("SELECT {PROFILE_COLUMNS} FROM user_profiles WHERE user_id = ?1"),
                params![user_id],
                profile_from_row,
            )
            .optional()
            .context("Failed to query user profile")
    }

    pub fn set_profile_admin(&self, user_id: i64, is_admin: bool) -> Result<UserProfile> {
        self.conn
            .execute(
                "UPDATE user_profiles SET is_admin = ?1 WHERE user_id = ?2",
                params![is_admin, user_id],
            )
            .context("Failed to update admin flag")?;
        self.get_profile(user_id)?
            .context("Profile not found after admin update")
    }

    pub fn set_profile_picture(&self, user_id: i64, picture: &str) -> Result<UserProfile> {
        self.conn
            .execute(
                "UPDATE user_profiles SET picture = ?1 WHERE user_id = ?2",
                params![picture, user_id],
            )
            .context("Failed to update profile picture")?;
        self.get_profile(user_id)?
            .context("Profile not found after picture update")
    }

    /// Stored picture paths of the organization's members.
    pub fn list_org_picture_paths(&self, organization_id: i64) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT picture FROM user_profiles
                 WHERE organization_id = ?1 AND picture IS NOT NULL ORDER BY user_id",
            )
            .context("Failed to prepare list_org_picture_paths")?;
        let rows = stmt
            .query_map(params![organization_id], |row| row.get(0))
            .context("Failed to query profile pictures")?;
        rows.collect::<rusqlite::Result<Vec<String>>>()
            .context("Failed to read profile picture path")
    }

    pub fn delete_profile(&self, user_id: i64) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM user_profiles WHERE user_id = ?1", params![user_id])
            .context("Failed to delete user profile")?;
        Ok(count > 0)
    }

    pub fn count_admins(&self, organization_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM user_profiles WHERE organization_id = ?1 AND is_admin = 1",
                params![organization_id],
                |row| row.get(0),
            )
            .context("Failed to count admins")
    }

    pub fn list_members(&self, organization_id: i64) -> Result<Vec<Member>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT u.id, u.email, u.username, u.first_name, u.last_name, u.created_at,
                        p.is_admin, p.joined_at
                 FROM user_profiles p JOIN users u ON u.id = p.user_id
                 WHERE p.organization_id = ?1 ORDER BY u.id",
            )
            .context("Failed to prepare list_members")?;
        let rows = stmt
            .query_map(params![organization_id], |row| {
                Ok(Member {
                    user: user_from_row(row)?,
                    is_admin: row.get::<_, i64>(6)? != 0,
                    joined_at: row.get(7)?,
                })
            })
            .context("Failed to query members")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read member row")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_fetch_user() -> Result<()> {
        let db = AppDb::new_in_memory()?;
        let user = db.create_user("ann@example.com", "ann", "Ann", "Lee")?;
        assert!(user.id > 0);
        assert!(!user.created_at.is_empty());

        let fetched = db.get_user(user.id)?.expect("user should exist");
        assert_eq!(fetched, user);
        assert!(db.username_exists("ann")?);
        assert!(!db.username_exists("bob")?);
        Ok(())
    }

    #[test]
    fn test_duplicate_email_rejected() -> Result<()> {
        let db = AppDb::new_in_memory()?;
        db.create_user("ann@example.com", "ann", "", "")?;
        assert!(db.create_user("ann@example.com", "ann2", "", "").is_err());
        Ok(())
    }

    #[test]
    fn test_find_organizations_by_domain_oldest_first() -> Result<()> {
        let db = AppDb::new_in_memory()?;
        let first = db.create_organization("First", "example.com", None)?;
        let second = db.create_organization("Second", "example.com", None)?;
        db.create_organization("Other", "other.com", None)?;

        let found = db.find_organizations_by_domain("example.com")?;
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, first.id);
        assert_eq!(found[1].id, second.id);
        Ok(())
    }

    #[test]
    fn test_delete_organization_cascades_profiles() -> Result<()> {
        let db = AppDb::new_in_memory()?;
        let user = db.create_user("ann@example.com", "ann", "", "")?;
        let org = db.create_organization("Acme", "example.com", Some(user.id))?;
        db.create_profile(user.id, org.id, true)?;
        assert_eq!(db.count_admins(org.id)?, 1);

        assert!(db.delete_organization(org.id)?);
        assert!(db.get_profile(user.id)?.is_none());
        assert!(db.get_user(user.id)?.is_some());
        Ok(())
    }

    #[test]
    fn test_list_members_includes_admin_flag() -> Result<()> {
        let db = AppDb::new_in_memory()?;
        let org = db.create_organization("Acme", "example.com", None)?;
        let a = db.create_user("a@example.com", "a", "", "")?;
        let b = db.create_user("b@example.com", "b", "", "")?;
        db.create_profile(a.id, org.id, true)?;
        db.create_profile(b.id, org.id, false)?;

        let members = db.list_members(org.id)?;
        assert_eq!(members.len(), 2);
        assert!(members[0].is_admin);
        assert!(!members[1].is_admin);
        Ok(())
    }
}
