use serde::Deserialize;
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub debug: Option<bool>,
    pub api_key: Option<String>,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            debug: None,
            api_key: None,
            database_url: default_database_url(),
            chat_model: default_chat_model(),
            data_dir: None,
        }
    }
}

fn default_database_url() -> String {
    "sqlite:gemchat.db".to_string()
}

fn default_chat_model() -> String {
    "gemini-2.5-flash".to_string()
}

impl Config {
    pub fn load() -> Self {
        let mut cfg = Self::load_from_files();

        // Environment variables win over config files.
        if let Ok(api_key) = env::var("GEMINI_API_KEY") {
            cfg.api_key = Some(api_key);
        }
        if let Some(debug_env) = env::var("GEMCHAT_DEBUG")
            .ok()
            .and_then(|s| s.parse::<bool>().ok())
        {
            cfg.debug = Some(debug_env);
        }

        log::debug!("Loaded config: {:?}", cfg);
        cfg
    }

    fn load_from_files() -> Self {
        let mut config = Config::default();

        let config_paths = [
            dirs::home_dir().map(|p| p.join(".gemchat.json")),
            dirs::config_dir().map(|p| p.join("gemchat/config.json")),
            Some(PathBuf::from("./.gemchat.json")),
        ];

        // Later paths take precedence, so a project-local file overrides
        // the per-user one.
        for path in config_paths.iter().flatten() {
            if !path.exists() {
                continue;
            }
            match fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str::<Config>(&content) {
                    Ok(loaded) => {
                        config.merge(loaded);
                        log::info!("Loaded config from: {:?}", path);
                    }
                    Err(e) => log::warn!("Failed to parse config file at {:?}: {}", path, e),
                },
                Err(e) => log::warn!("Failed to read config file at {:?}: {}", path, e),
            }
        }
        config
    }

    fn merge(&mut self, other: Config) {
        if other.debug.is_some() {
            self.debug = other.debug;
        }
        if other.api_key.is_some() {
            self.api_key = other.api_key;
        }
        if other.database_url != default_database_url() && !other.database_url.is_empty() {
            self.database_url = other.database_url;
        }
        if other.chat_model != default_chat_model() && !other.chat_model.is_empty() {
            self.chat_model = other.chat_model;
        }
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
    }

    /// Directory where viewed and generated images are written.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|p| p.join("gemchat"))
                .unwrap_or_else(|| PathBuf::from(".gemchat"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_defaults_when_overlay_is_default() {
        let mut base = Config::default();
        base.merge(Config::default());
        assert_eq!(base.database_url, default_database_url());
        assert_eq!(base.chat_model, default_chat_model());
    }

    #[test]
    fn merge_takes_overlay_values_when_set() {
        let mut base = Config::default();
        let overlay: Config = serde_json::from_str(
            r#"{"apiKey":"k","databaseUrl":"sqlite:other.db","chatModel":"gemini-2.5-pro"}"#,
        )
        .unwrap();
        base.merge(overlay);
        assert_eq!(base.api_key.as_deref(), Some("k"));
        assert_eq!(base.database_url, "sqlite:other.db");
        assert_eq!(base.chat_model, "gemini-2.5-pro");
    }
}
