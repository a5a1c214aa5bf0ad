use thiserror::Error;

/// Navigation error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavError {
    #[error("Waypoint resolution failed: {0}")]
    WaypointResolution(String),

    #[error("Route query failed: {0}")]
    RouteQuery(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result type for navigation operations
pub type NavResult<T> = Result<T, NavError>;

impl From<std::io::Error> for NavError {
    fn from(err: std::io::Error) -> Self {
        NavError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for NavError {
    fn from(err: serde_json::Error) -> Self {
        NavError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for NavError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NavError::Http("Network timeout".to_string())
        } else if let Some(status) = err.status() {
            NavError::Http(format!("status {}", status.as_u16()))
        } else {
            NavError::Http(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = NavError::WaypointResolution("no results for 'nowhere'".to_string());
        assert_eq!(
            err.to_string(),
            "Waypoint resolution failed: no results for 'nowhere'"
        );
        assert_eq!(NavError::Http("status 401".into()).to_string(), "HTTP error: status 401");
    }

    #[test]
    fn test_json_error_maps_to_parse() {
        let err: NavError = serde_json::from_str::<Vec<f64>>("{").unwrap_err().into();
        assert!(matches!(err, NavError::Parse(_)));
    }
}
