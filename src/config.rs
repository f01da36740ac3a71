//! Provisioning configuration with documented defaults.

use std::time::Duration;

/// Default CockroachDB image tag.
pub const DEFAULT_IMAGE: &str = "cockroachdb/cockroach:v24.1.5";

/// Default SQL port exposed by the CockroachDB image.
pub const DEFAULT_SQL_PORT: &str = "26257";

/// How long we wait for the server to accept connections before giving up.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for one provisioning call.
///
/// Every knob is an explicit field on this value; there is no process-wide
/// mutable state shared between tests. `Default` supplies the documented
/// defaults, so a test usually only names the database it wants:
///
/// ```rust
/// use roachbox::BoxConfig;
///
/// let config = BoxConfig::new("test");
/// assert_eq!(config.sql_port, "26257");
/// ```
#[derive(Debug, Clone)]
pub struct BoxConfig {
    /// Container image to run.
    pub image: String,
    /// SQL port inside the container. The readiness wait and all DSNs use it.
    pub sql_port: String,
    /// Arguments passed to the container entrypoint.
    pub startup_args: Vec<String>,
    /// Database the returned pool is scoped to. Created if it does not exist.
    pub database: String,
    /// SQL user for both the maintenance and the primary connection.
    pub user: String,
    /// Optional password. `None` (or empty) yields an unauthenticated DSN.
    pub password: Option<String>,
    /// Bound on the post-start readiness wait.
    pub readiness_timeout: Duration,
}

impl Default for BoxConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            sql_port: DEFAULT_SQL_PORT.to_string(),
            startup_args: vec!["start-single-node".to_string(), "--insecure".to_string()],
            database: "postgres".to_string(),
            user: "root".to_string(),
            password: None,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
        }
    }
}

impl BoxConfig {
    /// Default configuration scoped to the given database.
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = BoxConfig::default();
        assert_eq!(config.image, DEFAULT_IMAGE);
        assert_eq!(config.sql_port, "26257");
        assert_eq!(config.database, "postgres");
        assert_eq!(config.user, "root");
        assert!(config.password.is_none());
        assert_eq!(config.readiness_timeout, Duration::from_secs(10));
    }

    #[test]
    fn new_overrides_only_the_database() {
        let config = BoxConfig::new("test");
        assert_eq!(config.database, "test");
        assert_eq!(config.image, DEFAULT_IMAGE);
        assert_eq!(
            config.startup_args,
            vec!["start-single-node".to_string(), "--insecure".to_string()]
        );
    }
}
