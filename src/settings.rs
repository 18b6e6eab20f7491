use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, StatsError};

pub const CONFIG_PATH_ENV: &str = "TACSTATS_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "tacstats.json";
pub const DEFAULT_STATS_FILE_NAME: &str = "stats.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSettings {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_address: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSettings {
    pub log_directory: PathBuf,
    pub offsets_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats_path: Option<PathBuf>,
    #[serde(default)]
    pub servers: Vec<ServerSettings>,
    #[serde(default = "default_announce_joins")]
    pub announce_joins: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
}

fn default_announce_joins() -> bool {
    true
}

impl StatsSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw_json =
            std::fs::read_to_string(path).map_err(|error| StatsError::io(path, error))?;
        let settings = serde_json::from_str::<StatsSettings>(&raw_json).map_err(|source| {
            StatsError::Json {
                path: path.to_path_buf(),
                source,
            }
        })?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.log_directory.as_os_str().is_empty() {
            return Err(StatsError::Config("logDirectory must not be empty".to_string()));
        }
        if self.offsets_path.as_os_str().is_empty() {
            return Err(StatsError::Config("offsetsPath must not be empty".to_string()));
        }

        for (index, server) in self.servers.iter().enumerate() {
            if server.id.trim().is_empty() {
                return Err(StatsError::Config(format!("servers[{index}].id must not be empty")));
            }
            let duplicate = self.servers[..index]
                .iter()
                .any(|other| other.id == server.id);
            if duplicate {
                return Err(StatsError::Config(format!(
                    "server id '{}' is listed more than once",
                    server.id
                )));
            }
        }

        Ok(())
    }

    /// Stats snapshot location; defaults to a file beside the offsets book.
    pub fn stats_path(&self) -> PathBuf {
        self.stats_path
            .clone()
            .filter(|value| !value.as_os_str().is_empty())
            .unwrap_or_else(|| self.offsets_path.with_file_name(DEFAULT_STATS_FILE_NAME))
    }

    pub fn display_name(&self, server_id: &str) -> Option<&str> {
        self.server(server_id).map(|server| server.name.as_str())
    }

    pub fn server(&self, server_id: &str) -> Option<&ServerSettings> {
        self.servers.iter().find(|server| server.id == server_id)
    }
}

/// Config path from the first CLI argument, then the environment, then the
/// working directory default.
pub fn resolve_config_path(cli_argument: Option<String>) -> PathBuf {
    cli_argument
        .filter(|value| !value.trim().is_empty())
        .or_else(|| {
            std::env::var(CONFIG_PATH_ENV)
                .ok()
                .filter(|value| !value.trim().is_empty())
        })
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::{resolve_config_path, StatsSettings};
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_directory() -> std::path::PathBuf {
        let timestamp_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_nanos())
            .unwrap_or(0);
        let process_id = std::process::id();
        std::env::temp_dir().join(format!("tacstats_settings_test_{process_id}_{timestamp_nanos}"))
    }

    fn write_config(content: &str) -> (PathBuf, PathBuf) {
        let temp_directory = unique_temp_directory();
        std::fs::create_dir_all(&temp_directory).expect("Failed to create temp directory");
        let config_path = temp_directory.join("tacstats.json");
        std::fs::write(&config_path, content).expect("Failed to write config");
        (temp_directory, config_path)
    }

    #[test]
    fn loads_camel_case_config_with_defaults() {
        let (temp_directory, config_path) = write_config(
            r#"{
                "logDirectory": "/srv/insurgency/logs",
                "offsetsPath": "/var/lib/tacstats/offsets.json",
                "servers": [
                    { "id": "coop-east", "name": "East Coop", "queryAddress": "127.0.0.1:27131" }
                ]
            }"#,
        );

        let settings = StatsSettings::load(&config_path).expect("Expected config to load");
        assert!(settings.announce_joins);
        assert_eq!(settings.log_filter, None);
        assert_eq!(
            settings.stats_path(),
            settings.offsets_path.with_file_name("stats.json")
        );
        assert_eq!(settings.display_name("coop-east"), Some("East Coop"));
        assert_eq!(settings.display_name("coop-west"), None);
        assert_eq!(
            settings
                .server("coop-east")
                .and_then(|server| server.query_address.as_deref()),
            Some("127.0.0.1:27131")
        );

        std::fs::remove_dir_all(&temp_directory).expect("Failed to remove temp directory");
    }

    #[test]
    fn rejects_duplicate_server_ids() {
        let (temp_directory, config_path) = write_config(
            r#"{
                "logDirectory": "/srv/insurgency/logs",
                "offsetsPath": "offsets.json",
                "servers": [
                    { "id": "coop-east", "name": "East" },
                    { "id": "coop-east", "name": "East again" }
                ]
            }"#,
        );

        assert!(StatsSettings::load(&config_path).is_err());

        std::fs::remove_dir_all(&temp_directory).expect("Failed to remove temp directory");
    }

    #[test]
    fn cli_argument_wins_over_default() {
        assert_eq!(
            resolve_config_path(Some("/etc/tacstats.json".to_string())),
            PathBuf::from("/etc/tacstats.json")
        );
    }
}
