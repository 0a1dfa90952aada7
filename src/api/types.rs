use serde::{Deserialize, Serialize};
use std::fmt;

use super::cookie::CookieJar;

/// Login, password and optional organization for one desired session
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
    #[serde(default)]
    pub organization: Option<String>,
}

impl Credentials {
    pub fn new(login: &str, password: &str) -> Self {
        Self {
            login: login.to_string(),
            password: password.to_string(),
            organization: None,
        }
    }

    pub fn with_organization(mut self, organization: &str) -> Self {
        self.organization = Some(organization.to_string());
        self
    }

    /// Both login and password present.
    pub fn appears_valid(&self) -> bool {
        !self.login.trim().is_empty() && !self.password.is_empty()
    }

    /// Split `user@example.com|https://host:port` into the login and an
    /// override base URL.
    pub fn endpoint(&self) -> (&str, Option<&str>) {
        match self.login.split_once('|') {
            Some((login, uri)) if !uri.trim().is_empty() => (login, Some(uri.trim())),
            Some((login, _)) => (login, None),
            None => (self.login.as_str(), None),
        }
    }
}

// Keep the password out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("organization", &self.organization)
            .finish()
    }
}

/// Organization the account belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub full_member: bool,
}

/// Photographer registered with an organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photographer {
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
}

impl Photographer {
    pub fn full_name(&self) -> String {
        [self.first_name.as_str(), self.last_name.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Local view of the authenticated session.
///
/// Holding a token or cookie only means a login succeeded at some point;
/// server-side expiry is discovered when a later call fails.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub(crate) token: Option<String>,
    pub(crate) cookies: CookieJar,
    pub(crate) active_org_id: Option<String>,
    pub(crate) orgs: Vec<Organization>,
    pub(crate) single_user: bool,
    pub(crate) first_name: String,
    pub(crate) last_name: String,
}

impl Session {
    pub fn is_logged_in(&self) -> bool {
        self.token.is_some() || !self.cookies.is_empty()
    }

    pub fn organizations(&self) -> &[Organization] {
        &self.orgs
    }

    pub fn active_org(&self) -> Option<&Organization> {
        let id = self.active_org_id.as_deref()?;
        self.orgs.iter().find(|o| o.id == id)
    }

    pub fn find_org(&self, name: &str) -> Option<&Organization> {
        self.orgs.iter().find(|o| o.name == name)
    }

    pub fn single_user_access(&self) -> bool {
        self.is_logged_in() && self.single_user
    }

    pub fn multi_user_access(&self) -> bool {
        !self.orgs.is_empty()
    }

    pub fn full_name(&self) -> String {
        [self.first_name.as_str(), self.last_name.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub(crate) fn clear_auth(&mut self) {
        self.token = None;
        self.cookies.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_override() {
        let plain = Credentials::new("me@example.com", "pw");
        assert_eq!(plain.endpoint(), ("me@example.com", None));

        let staged = Credentials::new("me@example.com|https://staging.example.com:8443", "pw");
        assert_eq!(
            staged.endpoint(),
            ("me@example.com", Some("https://staging.example.com:8443"))
        );

        let dangling = Credentials::new("me@example.com| ", "pw");
        assert_eq!(dangling.endpoint(), ("me@example.com", None));
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::new("me@example.com", "hunter2");
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("me@example.com"));
    }

    #[test]
    fn test_appears_valid() {
        assert!(Credentials::new("me", "pw").appears_valid());
        assert!(!Credentials::new(" ", "pw").appears_valid());
        assert!(!Credentials::new("me", "").appears_valid());
    }

    #[test]
    fn test_photographer_full_name() {
        let both = Photographer {
            user_id: "U1".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
        };
        let last_only = Photographer {
            user_id: "U2".into(),
            first_name: String::new(),
            last_name: "Daguerre".into(),
        };
        assert_eq!(both.full_name(), "Ada Lovelace");
        assert_eq!(last_only.full_name(), "Daguerre");
    }
}
