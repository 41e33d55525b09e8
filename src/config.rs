use std::{collections::HashMap, path::PathBuf};

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

const ENV_PREFIX: &str = "AUTOBLOG";
const CONFIG_FILE: &str = ".config/autoblog/install.toml";

/// Settings read from `$HOME/.config/autoblog/install.toml` and `AUTOBLOG_*` variables.
/// Command line flags are applied on top by the caller.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InstallerConfig {
    pub repository_url: Option<String>,
    pub install_dir: Option<PathBuf>,
    pub auto_update: bool,
    pub non_interactive: bool,
    pub prompt_timeout_secs: Option<u64>,
    pub min_free_space_mb: Option<u64>,
}

impl InstallerConfig {
    /// Reads `file` instead of the default location when given.
    pub fn load(file: Option<PathBuf>) -> anyhow::Result<Self> {
        let file = file.or_else(|| home::home_dir().map(|home| home.join(CONFIG_FILE)));
        let raw_config = RawConfig::load(file, None)?;

        Ok(Self {
            repository_url: raw_config.repository_url,
            install_dir: raw_config.install_dir,
            auto_update: raw_config.auto_update.unwrap_or(false),
            non_interactive: raw_config.non_interactive.unwrap_or(false),
            prompt_timeout_secs: raw_config.prompt_timeout,
            min_free_space_mb: raw_config.min_free_space_mb,
        })
    }
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct RawConfig {
    repository_url: Option<String>,
    install_dir: Option<PathBuf>,
    auto_update: Option<bool>,
    non_interactive: Option<bool>,
    prompt_timeout: Option<u64>,
    min_free_space_mb: Option<u64>,
}

impl RawConfig {
    fn load(
        file: Option<PathBuf>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(
                File::from(file)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }
        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn load_empty() {
        let env = HashMap::from([]);
        let config = RawConfig::load(None, Some(env)).unwrap();
        assert_eq!(config, RawConfig::default())
    }

    #[test]
    fn load_environment() {
        let env = HashMap::from([
            (
                "AUTOBLOG_REPOSITORY_URL".to_owned(),
                "https://example.com/fork.git".to_owned(),
            ),
            ("AUTOBLOG_INSTALL_DIR".to_owned(), "/opt/autoblog".to_owned()),
            ("AUTOBLOG_AUTO_UPDATE".to_owned(), "true".to_owned()),
            ("AUTOBLOG_NON_INTERACTIVE".to_owned(), "1".to_owned()),
            ("AUTOBLOG_PROMPT_TIMEOUT".to_owned(), "5".to_owned()),
        ]);
        let config = RawConfig::load(None, Some(env)).unwrap();
        assert_eq!(
            config,
            RawConfig {
                repository_url: Some("https://example.com/fork.git".to_owned()),
                install_dir: Some("/opt/autoblog".into()),
                auto_update: Some(true),
                non_interactive: Some(true),
                prompt_timeout: Some(5),
                min_free_space_mb: None,
            }
        )
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("install.toml");
        std::fs::write(
            &file,
            "install_dir = \"/srv/autoblog\"\nauto_update = false\nmin_free_space_mb = 100\n",
        )
        .unwrap();
        let env = HashMap::from([("AUTOBLOG_AUTO_UPDATE".to_owned(), "yes".to_owned())]);
        let config = RawConfig::load(Some(file), Some(env)).unwrap();
        assert_eq!(config.install_dir, Some("/srv/autoblog".into()));
        assert_eq!(config.auto_update, Some(true));
        assert_eq!(config.min_free_space_mb, Some(100));
    }
}
