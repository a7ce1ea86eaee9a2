//! System-wide source: `[env]` table in `$XDG_CONFIG_HOME/<app>/config.toml`,
//! the lowest-precedence layer (a machine-wide default an operator sets once,
//! e.g. a shared `LLM_PROVIDER`/`AGENT_ORG_ID` for every agentrt invocation
//! on a box).

use std::collections::HashMap;
use std::path::PathBuf;

use crate::source::EnvSource;
use crate::LoadError;

pub struct XdgSource {
    app_name: String,
}

impl XdgSource {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self { app_name: app_name.into() }
    }

    fn config_path(&self) -> Result<Option<PathBuf>, LoadError> {
        let base = cross_xdg::BaseDirs::new().map_err(|e| LoadError::XdgPath(e.to_string()))?;
        let path = base.config_home().join(&self.app_name).join("config.toml");
        Ok(path.exists().then_some(path))
    }
}

#[derive(serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, String>,
}

impl EnvSource for XdgSource {
    fn load(&self) -> Result<HashMap<String, String>, LoadError> {
        let Some(path) = self.config_path()? else {
            return Ok(HashMap::new());
        };
        let content = std::fs::read_to_string(&path).map_err(LoadError::XdgRead)?;
        let parsed: ConfigFile = toml::from_str(&content)?;
        Ok(parsed.env)
    }
}
