use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TransferError;
use crate::types::ConnectionKind;

/// How a connection authenticates.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Integrated / trusted authentication of the running process.
    Integrated,
    /// Explicit login.
    Login { user: String, password: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Integrated => f.write_str("Integrated"),
            Credentials::Login { user, .. } => f
                .debug_struct("Login")
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// Where and how to connect. Immutable once a connection is established;
/// connecting with a different profile tears down both connection kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub server: String,
    pub catalog: String,
    pub credentials: Credentials,
    pub port: Option<u16>,
    pub instance_name: Option<String>,
}

impl ConnectionProfile {
    /// Profile using integrated authentication.
    #[must_use]
    pub fn integrated(server: impl Into<String>, catalog: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            catalog: catalog.into(),
            credentials: Credentials::Integrated,
            port: None,
            instance_name: None,
        }
    }

    /// Profile using an explicit login. Missing user or password falls back to
    /// integrated authentication.
    #[must_use]
    pub fn with_login(
        server: impl Into<String>,
        catalog: impl Into<String>,
        user: Option<String>,
        password: Option<String>,
    ) -> Self {
        let mut profile = Self::integrated(server, catalog);
        if let (Some(user), Some(password)) = (user, password) {
            profile.credentials = Credentials::Login { user, password };
        }
        profile
    }

    #[must_use]
    pub fn builder(server: impl Into<String>, catalog: impl Into<String>) -> ProfileBuilder {
        ProfileBuilder::new(server, catalog)
    }

    #[must_use]
    pub fn is_integrated(&self) -> bool {
        matches!(self.credentials, Credentials::Integrated)
    }

    /// Connection string for the given connection kind, password redacted.
    ///
    /// Suitable for logs and error messages.
    #[must_use]
    pub fn describe(&self, kind: ConnectionKind) -> String {
        let mut out = match kind {
            ConnectionKind::Primary => String::new(),
            ConnectionKind::Cursor => "Provider=SQLOLEDB;".to_string(),
        };
        out.push_str(&format!(
            "Data Source={};Initial Catalog={};",
            self.server, self.catalog
        ));
        match &self.credentials {
            Credentials::Integrated => out.push_str("Integrated Security=SSPI"),
            Credentials::Login { user, .. } => {
                out.push_str(&format!("User ID={user};Password=****"));
            }
        }
        if kind == ConnectionKind::Primary {
            out.push_str(";MultipleActiveResultSets=True");
        }
        out
    }
}

/// Fluent builder for [`ConnectionProfile`].
#[derive(Debug, Clone)]
pub struct ProfileBuilder {
    profile: ConnectionProfile,
}

impl ProfileBuilder {
    #[must_use]
    pub fn new(server: impl Into<String>, catalog: impl Into<String>) -> Self {
        Self {
            profile: ConnectionProfile::integrated(server, catalog),
        }
    }

    #[must_use]
    pub fn login(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.profile.credentials = Credentials::Login {
            user: user.into(),
            password: password.into(),
        };
        self
    }

    #[must_use]
    pub fn port(mut self, port: Option<u16>) -> Self {
        self.profile.port = port;
        self
    }

    #[must_use]
    pub fn instance_name(mut self, instance_name: Option<String>) -> Self {
        self.profile.instance_name = instance_name;
        self
    }

    #[must_use]
    pub fn finish(self) -> ConnectionProfile {
        self.profile
    }
}

/// Engine-wide tunables. Every field has a default, so partial JSON is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub command_timeout_secs: u64,
    pub bulk_copy_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Rows per committed bulk-copy batch; 0 commits once at the end.
    pub bulk_batch_size: usize,
    /// Rows buffered between a database worker and its consumer.
    pub row_channel_capacity: usize,
    /// Auto-generated sheet names removed from exported workbooks.
    pub default_sheet_names: Vec<String>,
    /// Placeholder sheets a freshly created workbook starts with.
    pub new_workbook_sheets: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 2000,
            bulk_copy_timeout_secs: 2000,
            connect_timeout_secs: 5000,
            bulk_batch_size: 0,
            row_channel_capacity: 256,
            default_sheet_names: vec!["Sheet1".into(), "Sheet2".into(), "Sheet3".into()],
            new_workbook_sheets: 3,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document.
    ///
    /// # Errors
    /// Returns `TransferError::ConfigError` if the document is invalid.
    pub fn from_json_str(json: &str) -> Result<Self, TransferError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file.
    ///
    /// # Errors
    /// Returns `TransferError::ConfigError` if the file cannot be read or parsed.
    pub fn from_json_file(path: &Path) -> Result<Self, TransferError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            TransferError::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    fn validate(&self) -> Result<(), TransferError> {
        if self.row_channel_capacity == 0 {
            return Err(TransferError::ConfigError(
                "row_channel_capacity must be at least 1".into(),
            ));
        }
        if self.new_workbook_sheets == 0 {
            return Err(TransferError::ConfigError(
                "new_workbook_sheets must be at least 1".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    #[must_use]
    pub fn bulk_copy_timeout(&self) -> Duration {
        Duration::from_secs(self.bulk_copy_timeout_secs)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_falls_back_to_integrated_without_password() {
        let p = ConnectionProfile::with_login("S", "C", Some("sa".into()), None);
        assert!(p.is_integrated());
        let p = ConnectionProfile::with_login("S", "C", Some("sa".into()), Some("pw".into()));
        assert!(!p.is_integrated());
    }

    #[test]
    fn describe_never_leaks_password() {
        let p = ConnectionProfile::builder("S", "C").login("sa", "hunter2").finish();
        let primary = p.describe(ConnectionKind::Primary);
        assert!(primary.contains("User ID=sa"));
        assert!(!primary.contains("hunter2"));
        assert!(!format!("{p:?}").contains("hunter2"));
        assert!(p.describe(ConnectionKind::Cursor).starts_with("Provider=SQLOLEDB;"));
        let trusted = ConnectionProfile::integrated("S", "C").describe(ConnectionKind::Primary);
        assert!(trusted.contains("Integrated Security=SSPI"));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = EngineConfig::from_json_str(r#"{"bulk_batch_size": 500}"#).unwrap();
        assert_eq!(cfg.bulk_batch_size, 500);
        assert_eq!(cfg.command_timeout_secs, 2000);
        assert_eq!(cfg.default_sheet_names.len(), 3);
        assert!(EngineConfig::from_json_str(r#"{"row_channel_capacity": 0}"#).is_err());
        assert!(EngineConfig::from_json_str("not json").is_err());
    }
}
