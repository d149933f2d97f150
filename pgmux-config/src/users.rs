use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Users and passwords backends authenticate with.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Users {
    #[serde(default)]
    pub users: Vec<User>,
}

impl Users {
    /// Find credentials for a (database, user) pair. An entry without a database
    /// matches any database.
    pub fn find(&self, database: &str, user: &str) -> Option<&User> {
        self.users
            .iter()
            .find(|u| u.name == user && u.database.as_deref() == Some(database))
            .or_else(|| {
                self.users
                    .iter()
                    .find(|u| u.name == user && u.database.is_none())
            })
    }

    pub fn check(&self) {
        for user in &self.users {
            if user.password.is_none() {
                warn!(
                    "user \"{}\" doesn't have a password, only trust authentication will work",
                    user.name
                );
            }
        }
    }
}

/// User entry.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct User {
    /// User name.
    pub name: String,
    /// Database name. Matches all databases when omitted.
    pub database: Option<String>,
    /// Password.
    pub password: Option<String>,
}

impl User {
    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_find_user() {
        let users = Users {
            users: vec![
                User {
                    name: "svc".into(),
                    database: None,
                    password: Some("any".into()),
                },
                User {
                    name: "svc".into(),
                    database: Some("app".into()),
                    password: Some("app".into()),
                },
            ],
        };

        assert_eq!(users.find("app", "svc").unwrap().password(), "app");
        assert_eq!(users.find("other", "svc").unwrap().password(), "any");
        assert!(users.find("app", "nobody").is_none());
    }
}
