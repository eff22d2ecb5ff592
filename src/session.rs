//! Active user identity.
//!
//! The store reads the user through `UserProvider` at every operation so a
//! login, logout or family switch is observed immediately.
//!
//! CLI resolution order for each field:
//! 1) explicit flag
//! 2) environment (`FAMTASK_UID`, `FAMTASK_FAMILY`, `FAMTASK_ROLE`, `FAMTASK_NAME`)
//! 3) `[session]` in `.famtask.toml`

use std::sync::RwLock;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::model::{Role, User};

pub trait UserProvider: Send + Sync {
    fn current_user(&self) -> Option<User>;
}

/// Mutable login state shared with the store.
#[derive(Debug, Default)]
pub struct Session {
    user: RwLock<Option<User>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(user: User) -> Self {
        Self {
            user: RwLock::new(Some(user)),
        }
    }

    pub fn sign_in(&self, user: User) {
        *self.user.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(user);
    }

    pub fn sign_out(&self) {
        *self.user.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

impl UserProvider for Session {
    fn current_user(&self) -> Option<User> {
        self.user
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Explicit values supplied on the command line.
#[derive(Debug, Default, Clone)]
pub struct SessionArgs<'a> {
    pub uid: Option<&'a str>,
    pub family: Option<&'a str>,
    pub role: Option<&'a str>,
    pub name: Option<&'a str>,
}

/// Resolve the acting user from flags, environment and config.
pub fn resolve_user(args: &SessionArgs<'_>, config: &SessionConfig) -> Result<User> {
    let uid = pick(args.uid, "FAMTASK_UID", config.uid.as_deref()).ok_or_else(|| {
        Error::NoSession("no user id; pass --uid, set FAMTASK_UID or session.uid".to_string())
    })?;
    let family = pick(args.family, "FAMTASK_FAMILY", config.family_id.as_deref());
    let role = pick(args.role, "FAMTASK_ROLE", Some(config.role.as_str()))
        .unwrap_or_else(|| "admin".to_string())
        .parse::<Role>()?;
    let name = pick(args.name, "FAMTASK_NAME", config.name.as_deref());

    Ok(User {
        uid,
        family_id: family,
        role,
        name,
    })
}

fn pick(explicit: Option<&str>, env_key: &str, configured: Option<&str>) -> Option<String> {
    if let Some(value) = non_empty(explicit) {
        return Some(value.to_string());
    }
    if let Ok(value) = std::env::var(env_key) {
        if let Some(value) = non_empty(Some(value.as_str())) {
            return Some(value.to_string());
        }
    }
    non_empty(configured).map(str::to_string)
}

fn non_empty(input: Option<&str>) -> Option<&str> {
    input.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_reflects_sign_in_and_out() {
        let session = Session::new();
        assert!(session.current_user().is_none());

        session.sign_in(User::new("u1", "fam", Role::Parent));
        assert_eq!(session.current_user().map(|u| u.uid), Some("u1".to_string()));

        session.sign_out();
        assert!(session.current_user().is_none());
    }

    #[test]
    fn explicit_values_win_over_config() {
        let config = SessionConfig {
            uid: Some("config-user".to_string()),
            family_id: Some("config-fam".to_string()),
            role: "admin".to_string(),
            name: None,
        };
        let args = SessionArgs {
            uid: Some("cli-user"),
            family: Some("cli-fam"),
            role: Some("dependent"),
            name: Some("Kid"),
        };
        let user = resolve_user(&args, &config).expect("user");
        assert_eq!(user.uid, "cli-user");
        assert_eq!(user.family(), Some("cli-fam"));
        assert_eq!(user.role, Role::Dependent);
        assert_eq!(user.display_name(), "Kid");
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = SessionConfig {
            uid: Some("config-user".to_string()),
            ..SessionConfig::default()
        };
        let args = SessionArgs {
            uid: Some("   "),
            role: Some("parent"),
            ..SessionArgs::default()
        };
        let user = resolve_user(&args, &config).expect("user");
        assert_eq!(user.uid, "config-user");
        assert_eq!(user.role, Role::Parent);
    }

    #[test]
    fn invalid_role_is_rejected() {
        let config = SessionConfig {
            uid: Some("u".to_string()),
            ..SessionConfig::default()
        };
        let args = SessionArgs {
            role: Some("owner"),
            ..SessionArgs::default()
        };
        assert!(matches!(
            resolve_user(&args, &config),
            Err(Error::InvalidArgument(_))
        ));
    }
}
