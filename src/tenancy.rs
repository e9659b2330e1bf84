//! Organization tenancy.
//!
//! Every organization is identified by an email domain. A user belongs to at
//! most one organization through their `UserProfile`; membership is only
//! possible when the user's email domain equals the organization's domain.
//!
//! Signup runs [`register_user`], which creates the account and then calls
//! [`resolve_tenancy`] explicitly: if organizations exist for the email
//! domain the user joins the oldest one as a regular member, otherwise the
//! caller is told to send the user through the organization-choice flow.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::db::AppDb;
use crate::errors::TenancyError;
use crate::models::{Account, Member, Organization, User, UserProfile};

static DOMAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$").unwrap()
});

static USERNAME_STRIP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9._-]").unwrap());

/// Normalize and validate an organization domain.
pub fn validate_domain(domain: &str) -> Result<String, TenancyError> {
    let normalized = domain.trim().trim_end_matches('.').to_lowercase();
    if normalized.len() > 253 || !DOMAIN_REGEX.is_match(&normalized) {
        return Err(TenancyError::InvalidDomain(domain.to_string()));
    }
    Ok(normalized)
}

/// Lowercased domain part of an email address.
pub fn email_domain(email: &str) -> Result<String, TenancyError> {
    let email = email.trim();
    let (local, domain) = email
        .rsplit_once('@')
        .ok_or_else(|| TenancyError::InvalidEmail(email.to_string()))?;
    if local.is_empty() || local.contains(char::is_whitespace) {
        return Err(TenancyError::InvalidEmail(email.to_string()));
    }
    validate_domain(domain).map_err(|_| TenancyError::InvalidEmail(email.to_string()))
}

/// Derive a unique username from the local part of an email address.
pub fn populate_username(db: &AppDb, email: &str) -> Result<String, TenancyError> {
    let local = email.trim().rsplit_once('@').map(|(l, _)| l).unwrap_or(email);
    let mut base = USERNAME_STRIP
        .replace_all(&local.to_lowercase(), "")
        .into_owned();
    if base.is_empty() {
        base = "user".to_string();
    }

    let mut candidate = base.clone();
    let mut suffix = 1;
    while db.username_exists(&candidate)? {
        candidate = format!("{}{}", base, suffix);
        suffix += 1;
    }
    Ok(candidate)
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// What happened to a freshly registered user.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignupOutcome {
    /// An organization already owns the email domain; the user joined it.
    Joined {
        organization: Organization,
        profile: UserProfile,
    },
    /// No organization matches; the user must create or pick one.
    NeedsOrganization { domain: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub user: User,
    pub outcome: SignupOutcome,
}

pub fn register_user(db: &AppDb, new: &NewUser) -> Result<Registration, TenancyError> {
    let email = new.email.trim().to_lowercase();
    email_domain(&email)?;

    db.atomic(|db| {
        if db.get_user_by_email(&email)?.is_some() {
            return Err(TenancyError::EmailTaken(email.clone()));
        }
        let username = populate_username(db, &email)?;
        let user = db.create_user(&email, &username, new.first_name.trim(), new.last_name.trim())?;
        let outcome = resolve_tenancy(db, &user)?;
        tracing::info!(user_id = user.id, joined = matches!(outcome, SignupOutcome::Joined { .. }), "registered user");
        Ok(Registration { user, outcome })
    })
}

/// Attach `user` to the oldest organization registered for their email
/// domain, if any.
pub fn resolve_tenancy(db: &AppDb, user: &User) -> Result<SignupOutcome, TenancyError> {
    if let Some(profile) = db.get_profile(user.id)? {
        let organization = db
            .get_organization(profile.organization_id)?
            .ok_or(TenancyError::OrganizationNotFound {
                id: profile.organization_id,
            })?;
        return Ok(SignupOutcome::Joined {
            organization,
            profile,
        });
    }

    let domain = email_domain(&user.email)?;
    match db.find_organizations_by_domain(&domain)?.into_iter().next() {
        Some(organization) => {
            let profile = db.create_profile(user.id, organization.id, false)?;
            Ok(SignupOutcome::Joined {
                organization,
                profile,
            })
        }
        None => Ok(SignupOutcome::NeedsOrganization { domain }),
    }
}

pub fn account(db: &AppDb, user_id: i64) -> Result<Account, TenancyError> {
    let user = db
        .get_user(user_id)?
        .ok_or(TenancyError::UserNotFound { id: user_id })?;
    let profile = db.get_profile(user_id)?;
    Ok(Account { user, profile })
}

/// Organizations a user could pick during the organization-choice flow.
pub fn lookup_domain(db: &AppDb, domain: &str) -> Result<Vec<Organization>, TenancyError> {
    let domain = validate_domain(domain)?;
    Ok(db.find_organizations_by_domain(&domain)?)
}

fn load_organization(db: &AppDb, org_id: i64) -> Result<Organization, TenancyError> {
    db.get_organization(org_id)?
        .ok_or(TenancyError::OrganizationNotFound { id: org_id })
}

/// The user's profile, provided it belongs to `org_id`.
pub fn require_member(db: &AppDb, user_id: i64, org_id: i64) -> Result<UserProfile, TenancyError> {
    match db.get_profile(user_id)? {
        Some(profile) if profile.organization_id == org_id => Ok(profile),
        _ => Err(TenancyError::NotMember { user_id, org_id }),
    }
}

pub fn require_admin(
    db: &AppDb,
    user_id: i64,
    org_id: i64,
    action: &'static str,
) -> Result<UserProfile, TenancyError> {
    let profile = require_member(db, user_id, org_id)?;
    if !profile.is_admin {
        return Err(TenancyError::AdminRequired { action });
    }
    Ok(profile)
}

fn ensure_domain_matches(email: &str, org_domain: &str) -> Result<(), TenancyError> {
    let email_domain = email_domain(email)?;
    if email_domain != org_domain {
        return Err(TenancyError::DomainMismatch {
            email_domain,
            org_domain: org_domain.to_string(),
        });
    }
    Ok(())
}

/// Create an organization and make `actor` its first admin.
pub fn create_organization(
    db: &AppDb,
    actor: &User,
    name: &str,
    domain: &str,
) -> Result<(Organization, UserProfile), TenancyError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TenancyError::MissingField("name"));
    }
    let domain = validate_domain(domain)?;
    ensure_domain_matches(&actor.email, &domain)?;

    db.atomic(|db| {
        if db.get_profile(actor.id)?.is_some() {
            return Err(TenancyError::AlreadyMember { user_id: actor.id });
        }
        let organization = db.create_organization(name, &domain, Some(actor.id))?;
        let profile = db.create_profile(actor.id, organization.id, true)?;
        tracing::info!(org_id = organization.id, %domain, "created organization");
        Ok((organization, profile))
    })
}

pub fn join_organization(db: &AppDb, actor: &User, org_id: i64) -> Result<UserProfile, TenancyError> {
    db.atomic(|db| {
        let organization = load_organization(db, org_id)?;
        if db.get_profile(actor.id)?.is_some() {
            return Err(TenancyError::AlreadyMember { user_id: actor.id });
        }
        ensure_domain_matches(&actor.email, &organization.domain)?;
        let profile = db.create_profile(actor.id, org_id, false)?;
        tracing::info!(org_id, user_id = actor.id, "user joined organization");
        Ok(profile)
    })
}

pub fn get_organization(db: &AppDb, actor_id: i64, org_id: i64) -> Result<Organization, TenancyError> {
    let organization = load_organization(db, org_id)?;
    require_member(db, actor_id, org_id)?;
    Ok(organization)
}

/// Rename an organization and/or move it to a new domain.
///
/// A domain change is rejected while any member's email address would stop
/// matching the organization.
pub fn update_organization(
    db: &AppDb,
    actor_id: i64,
    org_id: i64,
    name: Option<&str>,
    domain: Option<&str>,
) -> Result<Organization, TenancyError> {
    db.atomic(|db| {
        let current = load_organization(db, org_id)?;
        require_admin(db, actor_id, org_id, "edit the organization")?;

        let name = match name.map(str::trim) {
            Some("") => return Err(TenancyError::MissingField("name")),
            Some(n) => n.to_string(),
            None => current.name.clone(),
        };
        let domain = match domain {
            Some(d) => validate_domain(d)?,
            None => current.domain.clone(),
        };

        if domain != current.domain {
            let mismatched: Vec<String> = db
                .list_members(org_id)?
                .into_iter()
                .filter(|m| email_domain(&m.user.email).map(|d| d != domain).unwrap_or(true))
                .map(|m| m.user.email)
                .collect();
            if !mismatched.is_empty() {
                return Err(TenancyError::DomainChangeBlocked {
                    domain,
                    emails: mismatched,
                });
            }
        }

        Ok(db.update_organization(org_id, &name, &domain)?)
    })
}

/// Delete an organization with everything it owns. Returns the stored
/// upload paths (wiki attachments and member pictures) for the caller to
/// remove from the media directory.
pub fn delete_organization(db: &AppDb, actor_id: i64, org_id: i64) -> Result<Vec<String>, TenancyError> {
    db.atomic(|db| {
        load_organization(db, org_id)?;
        require_admin(db, actor_id, org_id, "delete the organization")?;
        let mut stored = db.list_org_attachment_paths(org_id)?;
        stored.extend(db.list_org_picture_paths(org_id)?);
        db.delete_organization(org_id)?;
        tracing::info!(org_id, actor_id, files = stored.len(), "deleted organization");
        Ok(stored)
    })
}

pub fn list_members(db: &AppDb, actor_id: i64, org_id: i64) -> Result<Vec<Member>, TenancyError> {
    load_organization(db, org_id)?;
    require_member(db, actor_id, org_id)?;
    Ok(db.list_members(org_id)?)
}

pub fn remove_member(db: &AppDb, actor_id: i64, org_id: i64, user_id: i64) -> Result<(), TenancyError> {
    db.atomic(|db| {
        require_admin(db, actor_id, org_id, "remove members")?;
        let target = require_member(db, user_id, org_id)?;
        if target.is_admin && db.count_admins(org_id)? <= 1 {
            return Err(TenancyError::LastAdmin { org_id });
        }
        db.delete_profile(user_id)?;
        Ok(())
    })
}

pub fn set_admin(
    db: &AppDb,
    actor_id: i64,
    org_id: i64,
    user_id: i64,
    is_admin: bool,
) -> Result<UserProfile, TenancyError> {
    db.atomic(|db| {
        require_admin(db, actor_id, org_id, "change admin rights")?;
        let target = require_member(db, user_id, org_id)?;
        if target.is_admin && !is_admin && db.count_admins(org_id)? <= 1 {
            return Err(TenancyError::LastAdmin { org_id });
        }
        Ok(db.set_profile_admin(user_id, is_admin)?)
    })
}

pub fn update_names(
    db: &AppDb,
    user_id: i64,
    first_name: Option<&str>,
    last_name: Option<&str>,
) -> Result<User, TenancyError> {
    let user = db
        .get_user(user_id)?
        .ok_or(TenancyError::UserNotFound { id: user_id })?;
    let first = first_name.map(str::trim).unwrap_or(&user.first_name);
    let last = last_name.map(str::trim).unwrap_or(&user.last_name);
    Ok(db.update_user_names(user_id, first, last)?)
}

/// Point the user's profile at a stored picture (path relative to the
/// media directory).
pub fn set_profile_picture(db: &AppDb, user_id: i64, picture: &str) -> Result<UserProfile, TenancyError> {
    if db.get_profile(user_id)?.is_none() {
        return Err(TenancyError::NoOrganization { user_id });
    }
    Ok(db.set_profile_picture(user_id, picture)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup(db: &AppDb, email: &str) -> Registration {
        register_user(
            db,
            &NewUser {
                email: email.to_string(),
                first_name: String::new(),
                last_name: String::new(),
            },
        )
        .unwrap()
    }

    fn founder(db: &AppDb, email: &str, domain: &str) -> (User, Organization) {
        let reg = signup(db, email);
        let (org, _) = create_organization(db, &reg.user, "Acme", domain).unwrap();
        (reg.user, org)
    }

    #[test]
    fn test_validate_domain() {
        assert_eq!(validate_domain(" Example.COM ").unwrap(), "example.com");
        assert_eq!(validate_domain("eu.corp-1.io").unwrap(), "eu.corp-1.io");
        for bad in ["", "localhost", "-bad.com", "bad-.com", "a..com", "exa mple.com", "x.c"] {
            assert!(validate_domain(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_email_domain() {
        assert_eq!(email_domain("A@Example.com").unwrap(), "example.com");
        assert!(email_domain("no-at-sign").is_err());
        assert!(email_domain("@example.com").is_err());
        assert!(email_domain("a@nodot").is_err());
    }

    #[test]
    fn test_populate_username_dedupes() -> anyhow::Result<()> {
        let db = AppDb::new_in_memory()?;
        assert_eq!(populate_username(&db, "J.Doe+tag@example.com")?, "j.doetag");
        db.create_user("jdoe@a.com", "jdoe", "", "")?;
        db.create_user("jdoe@b.com", "jdoe1", "", "")?;
        assert_eq!(populate_username(&db, "jdoe@c.com")?, "jdoe2");
        assert_eq!(populate_username(&db, "+++@c.com")?, "user");
        Ok(())
    }

    #[test]
    fn test_signup_auto_links_to_matching_organization() -> anyhow::Result<()> {
        let db = AppDb::new_in_memory()?;
        let org = db.create_organization("Example", "example.com", None)?;

        let reg = signup(&db, "a@example.com");
        match reg.outcome {
            SignupOutcome::Joined {
                organization,
                profile,
            } => {
                assert_eq!(organization.id, org.id);
                assert_eq!(profile.organization_id, org.id);
                assert!(!profile.is_admin);
            }
            other => panic!("expected Joined, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_signup_without_match_needs_organization() -> anyhow::Result<()> {
        let db = AppDb::new_in_memory()?;
        db.create_organization("Example", "example.com", None)?;

        let reg = signup(&db, "a@other.com");
        assert!(matches!(
            reg.outcome,
            SignupOutcome::NeedsOrganization { ref domain } if domain == "other.com"
        ));
        assert!(db.get_profile(reg.user.id)?.is_none());
        Ok(())
    }

    #[test]
    fn test_signup_tie_resolves_to_oldest_organization() -> anyhow::Result<()> {
        let db = AppDb::new_in_memory()?;
        let newer = db.create_organization("Newer", "example.com", None)?;
        let older = db.create_organization("Older", "example.com", None)?;
        db.conn.execute(
            "UPDATE organizations SET created_at = '2001-01-01 00:00:00' WHERE id = ?1",
            rusqlite::params![older.id],
        )?;

        let reg = signup(&db, "a@example.com");
        let profile = db.get_profile(reg.user.id)?.unwrap();
        assert_eq!(profile.organization_id, older.id);
        assert_ne!(profile.organization_id, newer.id);
        Ok(())
    }

    #[test]
    fn test_duplicate_signup_rejected() -> anyhow::Result<()> {
        let db = AppDb::new_in_memory()?;
        signup(&db, "a@example.com");
        let err = register_user(
            &db,
            &NewUser {
                email: "A@example.com".into(),
                first_name: String::new(),
                last_name: String::new(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, TenancyError::EmailTaken(_)));
        Ok(())
    }

    #[test]
    fn test_create_organization_requires_matching_domain() -> anyhow::Result<()> {
        let db = AppDb::new_in_memory()?;
        let reg = signup(&db, "a@example.com");
        let err = create_organization(&db, &reg.user, "Acme", "acme.io").unwrap_err();
        assert!(matches!(err, TenancyError::DomainMismatch { .. }));

        let (org, profile) = create_organization(&db, &reg.user, "Acme", "Example.com")?;
        assert_eq!(org.domain, "example.com");
        assert!(profile.is_admin);

        let err = create_organization(&db, &reg.user, "Again", "example.com").unwrap_err();
        assert!(matches!(err, TenancyError::AlreadyMember { .. }));
        Ok(())
    }

    #[test]
    fn test_join_organization_checks_domain() -> anyhow::Result<()> {
        let db = AppDb::new_in_memory()?;
        let (_, org) = founder(&db, "boss@example.com", "example.com");
        let outsider = db.create_user("x@other.com", "x", "", "")?;
        let err = join_organization(&db, &outsider, org.id).unwrap_err();
        assert!(matches!(err, TenancyError::DomainMismatch { .. }));

        let insider = db.create_user("y@example.com", "y", "", "")?;
        let profile = join_organization(&db, &insider, org.id)?;
        assert!(!profile.is_admin);
        Ok(())
    }

    #[test]
    fn test_domain_change_blocked_when_members_mismatch() -> anyhow::Result<()> {
        let db = AppDb::new_in_memory()?;
        let (boss, org) = founder(&db, "boss@example.com", "example.com");
        signup(&db, "dev@example.com");

        let err = update_organization(&db, boss.id, org.id, None, Some("example.org")).unwrap_err();
        match err {
            TenancyError::DomainChangeBlocked { emails, .. } => {
                assert_eq!(emails.len(), 2);
            }
            other => panic!("expected DomainChangeBlocked, got {other:?}"),
        }
        assert_eq!(db.get_organization(org.id)?.unwrap().domain, "example.com");

        let renamed = update_organization(&db, boss.id, org.id, Some("Acme Inc"), Some("EXAMPLE.com"))?;
        assert_eq!(renamed.name, "Acme Inc");
        assert_eq!(renamed.domain, "example.com");
        Ok(())
    }

    #[test]
    fn test_non_member_cannot_update_organization() -> anyhow::Result<()> {
        let db = AppDb::new_in_memory()?;
        let (boss, org) = founder(&db, "boss@example.com", "example.com");
        remove_member(&db, boss.id, org.id, boss.id).unwrap_err();

        let stranger = db.create_user("s@example.com", "s", "", "")?;
        let err = update_organization(&db, stranger.id, org.id, Some("Hijack"), None).unwrap_err();
        assert!(matches!(err, TenancyError::NotMember { .. }));
        Ok(())
    }

    #[test]
    fn test_admin_rules() -> anyhow::Result<()> {
        let db = AppDb::new_in_memory()?;
        let (boss, org) = founder(&db, "boss@example.com", "example.com");
        let dev = signup(&db, "dev@example.com").user;

        let err = remove_member(&db, dev.id, org.id, boss.id).unwrap_err();
        assert!(matches!(err, TenancyError::AdminRequired { .. }));

        let err = set_admin(&db, boss.id, org.id, boss.id, false).unwrap_err();
        assert!(matches!(err, TenancyError::LastAdmin { .. }));

        set_admin(&db, boss.id, org.id, dev.id, true)?;
        set_admin(&db, dev.id, org.id, boss.id, false)?;
        remove_member(&db, dev.id, org.id, boss.id)?;
        assert!(db.get_profile(boss.id)?.is_none());
        assert_eq!(list_members(&db, dev.id, org.id)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_delete_organization_admin_only() -> anyhow::Result<()> {
        let db = AppDb::new_in_memory()?;
        let (boss, org) = founder(&db, "boss@example.com", "example.com");
        let dev = signup(&db, "dev@example.com").user;

        set_profile_picture(&db, dev.id, "profiles/2/dev.png")?;

        assert!(delete_organization(&db, dev.id, org.id).is_err());
        let stored = delete_organization(&db, boss.id, org.id)?;
        assert_eq!(stored, vec!["profiles/2/dev.png".to_string()]);
        assert!(db.get_profile(dev.id)?.is_none());
        assert!(matches!(
            account(&db, dev.id)?.profile,
            None
        ));
        Ok(())
    }

    #[test]
    fn test_lookup_domain() -> anyhow::Result<()> {
        let db = AppDb::new_in_memory()?;
        founder(&db, "boss@example.com", "example.com");
        assert_eq!(lookup_domain(&db, "EXAMPLE.com")?.len(), 1);
        assert!(lookup_domain(&db, "other.com")?.is_empty());
        assert!(lookup_domain(&db, "not a domain").is_err());
        Ok(())
    }

    #[test]
    fn test_profile_picture_requires_organization() -> anyhow::Result<()> {
        let db = AppDb::new_in_memory()?;
        let loner = signup(&db, "solo@nowhere.org");
        assert!(matches!(
            set_profile_picture(&db, loner.user.id, "profiles/1/a.png"),
            Err(TenancyError::NoOrganization { .. })
        ));

        let (boss, _) = founder(&db, "boss@example.com", "example.com");
        let profile = set_profile_picture(&db, boss.id, "profiles/1/a.png")?;
        assert_eq!(profile.picture.as_deref(), Some("profiles/1/a.png"));
        Ok(())
    }
}
