//! Mapping from `sqlx` failures to the relay error taxonomy.

use sqlx::error::DatabaseError;
use tablelink_core::error::RelayError;

// Authentication, missing database, and missing schema mean the relay is
// not configured; retrying will not help.
const CONFIGURATION_CODES: &[&str] = &["28000", "28P01", "3D000", "42P01"];

fn map_database_error(err: &dyn DatabaseError) -> RelayError {
    if err.is_unique_violation() {
        return RelayError::Validation(err.message().to_owned());
    }
    match err.code() {
        Some(code) if CONFIGURATION_CODES.contains(&code.as_ref()) => {
            RelayError::Configuration(err.message().to_owned())
        }
        // Connection exceptions, admin shutdown, too many connections.
        Some(code) if code.starts_with("08") || code == "57P01" || code == "53300" => {
            RelayError::Transport(err.message().to_owned())
        }
        _ => RelayError::Infrastructure(err.message().to_owned()),
    }
}

/// Classifies a `sqlx` error as configuration, transport, validation, or
/// infrastructure.
#[must_use]
pub fn map_sqlx_error(err: sqlx::Error) -> RelayError {
    match err {
        sqlx::Error::Configuration(source) => RelayError::Configuration(source.to_string()),
        sqlx::Error::Database(db) => map_database_error(db.as_ref()),
        sqlx::Error::Io(source) => RelayError::Transport(source.to_string()),
        sqlx::Error::Tls(source) => RelayError::Transport(source.to_string()),
        sqlx::Error::PoolTimedOut => {
            RelayError::Transport("timed out waiting for a database connection".into())
        }
        sqlx::Error::PoolClosed => {
            RelayError::Configuration("database connection pool is closed".into())
        }
        sqlx::Error::Protocol(message) => RelayError::Transport(message),
        other => RelayError::Infrastructure(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeouts_are_transient() {
        assert!(map_sqlx_error(sqlx::Error::PoolTimedOut).is_transient());
        assert!(
            map_sqlx_error(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused"
            )))
            .is_transient()
        );
    }

    #[test]
    fn test_closed_pool_is_a_configuration_error() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolClosed),
            RelayError::Configuration(_)
        ));
    }

    #[test]
    fn test_other_errors_are_infrastructure() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            RelayError::Infrastructure(_)
        ));
    }
}
