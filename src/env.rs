//! Runtime environment detection.
//!
//! Single source of truth for whether the process runs under a test
//! harness, based on the `EXTLINK_ENV` environment variable.
//!
//! # Environment Variable
//!
//! Set `EXTLINK_ENV` to one of:
//! - `test` - Test mode (crash handlers are not installed)
//! - `development` or `dev` - Development mode
//! - (anything else or unset) - Production mode

/// Runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Development environment.
    Development,
    /// Test environment - leaves signal dispositions alone.
    Test,
}

impl Environment {
    /// Detect current environment from `EXTLINK_ENV`.
    #[must_use]
    pub fn current() -> Self {
        Self::from_value(std::env::var("EXTLINK_ENV").ok().as_deref())
    }

    fn from_value(value: Option<&str>) -> Self {
        match value {
            Some("test") => Self::Test,
            Some("development") | Some("dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` if this is the test environment.
    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }

    /// Returns `true` if fatal-signal handlers should be installed.
    #[must_use]
    pub fn installs_crash_handler(self) -> bool {
        !self.is_test()
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_display() {
        assert_eq!(Environment::Production.to_string(), "production");
        assert_eq!(Environment::Development.to_string(), "development");
        assert_eq!(Environment::Test.to_string(), "test");
    }

    #[test]
    fn test_environment_from_value() {
        assert_eq!(Environment::from_value(Some("test")), Environment::Test);
        assert_eq!(Environment::from_value(Some("dev")), Environment::Development);
        assert_eq!(Environment::from_value(Some("staging")), Environment::Production);
        assert_eq!(Environment::from_value(None), Environment::Production);
    }

    #[test]
    fn test_crash_handler_only_outside_tests() {
        assert!(!Environment::Test.installs_crash_handler());
        assert!(Environment::Production.installs_crash_handler());
        assert!(Environment::Development.installs_crash_handler());
    }
}
