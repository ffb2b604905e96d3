use thiserror::Error;
use uuid::Uuid;

/// Core error types for l3fw
#[derive(Debug, Error)]
pub enum Error {
    /// Input validation failed
    #[error("validation error in {field}: {message}")]
    Validation { field: String, message: String },

    /// A referenced rule, policy or group does not exist
    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },

    /// A filter-table object (chain, table) was missing when an edit needed it
    #[error("lookup error: {0}")]
    Lookup(String),

    /// External command execution failed
    #[error("command error: {message}")]
    Command {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Opaque apply failure. The underlying cause has been logged with the
    /// firewall-group id; callers only see that the driver failed.
    #[error("internal firewall driver error (firewall group {firewall_group})")]
    Driver { firewall_group: Uuid },

    /// Internal logic error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for an [`Error::Validation`] with owned strings.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Shorthand for an [`Error::NotFound`] on a resource id.
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            resource,
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message() {
        let err = Error::validation("source_port", "source port requires tcp or udp");
        assert_eq!(
            err.to_string(),
            "validation error in source_port: source port requires tcp or udp"
        );
    }

    #[test]
    fn test_not_found_message() {
        let id = Uuid::nil();
        let err = Error::not_found("firewall rule", id);
        assert!(err.to_string().contains("firewall rule"));
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_driver_error_is_opaque() {
        let fwg = Uuid::new_v4();
        let err = Error::Driver { firewall_group: fwg };
        let msg = err.to_string();
        assert!(msg.contains(&fwg.to_string()));
        // No hint of the underlying cause
        assert!(!msg.contains("lookup"));
        assert!(!msg.contains("command"));
    }
}
