use crate::prelude::*;

use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "ENTITY_PORTER";
pub const DEFAULT_CLIENT_ID: &str = "entity-porter";

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}
fn default_read_timeout_secs() -> u64 {
    10
}
fn default_write_timeout_secs() -> u64 {
    30
}
fn default_transfer_timeout_secs() -> u64 {
    60
}
fn default_slow_request_warn_secs() -> u64 {
    20
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Settings {
    /// OAuth client id used for the password and refresh-token grants.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    /// Signed-url downloads and object-storage uploads.
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,
    #[serde(default = "default_slow_request_warn_secs")]
    pub slow_request_warn_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            read_timeout_secs: default_read_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            transfer_timeout_secs: default_transfer_timeout_secs(),
            slow_request_warn_secs: default_slow_request_warn_secs(),
        }
    }
}

impl Settings {
    /// Defaults, then the optional config file, then `ENTITY_PORTER_*`
    /// environment variables.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = config_file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings: Settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            client_bail!("client_id must not be empty");
        }
        for (name, value) in [
            ("read_timeout_secs", self.read_timeout_secs),
            ("write_timeout_secs", self.write_timeout_secs),
            ("transfer_timeout_secs", self.transfer_timeout_secs),
        ] {
            if value == 0 {
                client_bail!("{name} must be > 0");
            }
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    pub fn slow_request_threshold(&self) -> Duration {
        Duration::from_secs(self.slow_request_warn_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "client_id = \"ops-team\"\nread_timeout_secs = 5").unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.client_id, "ops-team");
        assert_eq!(settings.read_timeout(), Duration::from_secs(5));
        assert_eq!(settings.write_timeout_secs, 30);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "transfer_timeout_secs = 0").unwrap();

        let err = Settings::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("transfer_timeout_secs"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
