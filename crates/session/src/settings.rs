use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::{env, fs};

use snafu::{ResultExt, Snafu};

pub const KEY_API_KEY: &str = "api_key";
pub const KEY_MODEL: &str = "model";
pub const KEY_BASE_URL: &str = "base_url";
pub const KEY_STREAM: &str = "stream";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory {}", path.display()))]
    CreateSettingsDirectory {
        stage: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[snafu(display("failed to write settings to {}", path.display()))]
    WriteSettings {
        stage: &'static str,
        path: PathBuf,
        source: io::Error,
    },
}

pub type SettingsResult<T> = Result<T, SettingsError>;

/// String-keyed settings with write-through persistence.
///
/// The on-disk format is one `key=value` per line; blank lines and `#`
/// comments are ignored. A missing file is the empty store, every `set`
/// rewrites the whole file.
#[derive(Debug)]
pub struct SettingsStore {
    values: BTreeMap<String, String>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(env::temp_dir)
            .join("tangent")
            .join("settings.conf")
    }

    pub fn open(config_path: PathBuf) -> Self {
        let values = Self::read_values(&config_path);
        Self {
            values,
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::open(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// The stored value, or `default` when the key is absent.
    pub fn get(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> SettingsResult<()> {
        self.values.insert(key.into(), value.into());
        self.persist()
    }

    pub fn remove(&mut self, key: &str) -> SettingsResult<()> {
        if self.values.remove(key).is_none() {
            return Ok(());
        }
        self.persist()
    }

    fn persist(&self) -> SettingsResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).context(CreateSettingsDirectorySnafu {
                stage: "persist-settings",
                path: parent.to_path_buf(),
            })?;
        }
        fs::write(&self.config_path, Self::render(&self.values)).context(WriteSettingsSnafu {
            stage: "persist-settings",
            path: self.config_path.clone(),
        })
    }

    fn read_values(path: &Path) -> BTreeMap<String, String> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => {
                tracing::info!(path = %path.display(), "no settings file, starting empty");
                return BTreeMap::new();
            }
        };
        Self::parse(&content)
    }

    fn parse(content: &str) -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                tracing::warn!(line, "skipping malformed settings line");
                continue;
            };
            values.insert(key.trim().to_string(), value.trim().to_string());
        }
        values
    }

    fn render(values: &BTreeMap<String, String>) -> String {
        let mut out = String::from("# tangent settings\n");
        for (key, value) in values {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_reads_as_defaults() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::open(dir.path().join("settings.conf"));
        assert!(!store.contains(KEY_MODEL));
        assert_eq!(store.get(KEY_MODEL, "gpt-3.5-turbo"), "gpt-3.5-turbo");
    }

    #[test]
    fn set_persists_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.conf");

        let mut store = SettingsStore::open(path.clone());
        store.set(KEY_MODEL, "gpt-4").unwrap();
        store.set(KEY_STREAM, "true").unwrap();

        let reloaded = SettingsStore::open(path);
        assert_eq!(reloaded.get(KEY_MODEL, ""), "gpt-4");
        assert_eq!(reloaded.get(KEY_STREAM, "false"), "true");
    }

    #[test]
    fn remove_deletes_the_key_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.conf");

        let mut store = SettingsStore::open(path.clone());
        store.set(KEY_API_KEY, "sk-test").unwrap();
        store.remove(KEY_API_KEY).unwrap();

        let reloaded = SettingsStore::open(path);
        assert!(!reloaded.contains(KEY_API_KEY));
    }

    #[test]
    fn parser_ignores_comments_and_keeps_equals_in_values() {
        let values = SettingsStore::parse(
            "# header\n\nmodel = gpt-4\nbase_url=http://h/v1?a=b\nbroken line\n",
        );
        assert_eq!(values.get("model").unwrap(), "gpt-4");
        assert_eq!(values.get("base_url").unwrap(), "http://h/v1?a=b");
        assert_eq!(values.len(), 2);
    }
}
