//! Loads the agent runtime's environment from `$XDG_CONFIG_HOME/agentrt/config.toml`
//! and a project `.env`, applies it to the process with precedence
//! **existing env > .env > XDG**, then parses the specific variables the
//! runtime cares about into a [`RuntimeConfig`].

mod dotenv;
mod source;
mod xdg_toml;

use std::collections::HashSet;
use std::path::Path;

use thiserror::Error;

use dotenv::DotenvSource;
use source::EnvSource;
use xdg_toml::XdgSource;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("xdg config path: {0}")]
    XdgPath(String),
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// The env vars this runtime reads at startup (spec §3 "Configuration"),
/// parsed once after [`load_and_apply`] has merged every source.
#[derive(Clone, Debug, Default)]
pub struct RuntimeConfig {
    pub llm_provider: Option<String>,
    pub llm_model: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub data_dir: Option<String>,
    pub database_url: Option<String>,
    pub port: Option<u16>,
    pub agent_org_id: Option<String>,
    pub agent_user_id: Option<String>,
    pub agent_project_id: Option<String>,
}

impl RuntimeConfig {
    fn from_process_env() -> Self {
        Self {
            llm_provider: std::env::var("LLM_PROVIDER").ok(),
            llm_model: std::env::var("LLM_MODEL").ok(),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            data_dir: std::env::var("DATA_DIR").ok(),
            database_url: std::env::var("DATABASE_URL").ok(),
            port: std::env::var("PORT").ok().and_then(|p| p.parse().ok()),
            agent_org_id: std::env::var("AGENT_ORG_ID").ok(),
            agent_user_id: std::env::var("AGENT_USER_ID").ok(),
            agent_project_id: std::env::var("AGENT_PROJECT_ID").ok(),
        }
    }
}

/// Merges `app_name`'s XDG `config.toml` and an optional project `.env` into
/// the process environment (existing env vars are never overwritten), then
/// reads back the runtime's own variables into a [`RuntimeConfig`].
///
/// * `app_name`: XDG app directory, e.g. `"agentrt"`.
/// * `override_dir`: look for `.env` here instead of the current directory.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<RuntimeConfig, LoadError> {
    let sources: Vec<Box<dyn EnvSource>> = vec![Box::new(DotenvSource::new(override_dir)), Box::new(XdgSource::new(app_name))];

    // Precedence is source order: a key already supplied by an earlier
    // source is never overwritten by a later one.
    let mut merged = std::collections::HashMap::new();
    for source in &sources {
        for (k, v) in source.load()? {
            merged.entry(k).or_insert(v);
        }
    }

    let already_set: HashSet<String> = merged.keys().filter(|k| std::env::var(k).is_ok()).cloned().collect();
    for (key, value) in merged {
        if !already_set.contains(&key) {
            std::env::set_var(key, value);
        }
    }

    Ok(RuntimeConfig::from_process_env())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn restore_var(key: &str, prev: Option<String>) {
        match prev {
            Some(v) => env::set_var(key, v),
            None => env::remove_var(key),
        }
    }

    #[test]
    fn existing_env_wins_over_every_source() {
        env::set_var("LLM_PROVIDER", "openai");
        let config = load_and_apply("agentrt", None).unwrap();
        assert_eq!(config.llm_provider.as_deref(), Some("openai"));
        env::remove_var("LLM_PROVIDER");
    }

    #[test]
    fn no_config_anywhere_still_succeeds() {
        let r = load_and_apply("agentrt-nonexistent-app-xyz", None::<&std::path::Path>);
        assert!(r.is_ok());
    }

    #[test]
    fn dotenv_outranks_xdg_for_the_same_key() {
        let xdg_dir = tempfile::tempdir().unwrap();
        let app_dir = xdg_dir.path().join("agentrt");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "[env]\nLLM_PROVIDER = \"from_xdg\"\n").unwrap();

        let dotenv_dir = tempfile::tempdir().unwrap();
        std::fs::write(dotenv_dir.path().join(".env"), "LLM_PROVIDER=from_dotenv\n").unwrap();

        let prev_xdg = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", xdg_dir.path());
        env::remove_var("LLM_PROVIDER");

        let config = load_and_apply("agentrt", Some(dotenv_dir.path())).unwrap();
        env::remove_var("LLM_PROVIDER");
        restore_var("XDG_CONFIG_HOME", prev_xdg);

        assert_eq!(config.llm_provider.as_deref(), Some("from_dotenv"));
    }

    #[test]
    fn xdg_applies_when_dotenv_has_no_match() {
        let xdg_dir = tempfile::tempdir().unwrap();
        let app_dir = xdg_dir.path().join("agentrt");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "[env]\nAGENT_ORG_ID = \"org-xdg\"\n").unwrap();

        let empty_dir = tempfile::tempdir().unwrap();

        let prev_xdg = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", xdg_dir.path());
        env::remove_var("AGENT_ORG_ID");

        let config = load_and_apply("agentrt", Some(empty_dir.path())).unwrap();
        env::remove_var("AGENT_ORG_ID");
        restore_var("XDG_CONFIG_HOME", prev_xdg);

        assert_eq!(config.agent_org_id.as_deref(), Some("org-xdg"));
    }

    #[test]
    fn port_parses_as_u16() {
        let dotenv_dir = tempfile::tempdir().unwrap();
        std::fs::write(dotenv_dir.path().join(".env"), "PORT=8080\n").unwrap();
        env::remove_var("PORT");

        let config = load_and_apply("agentrt-nonexistent-app-xyz", Some(dotenv_dir.path())).unwrap();
        env::remove_var("PORT");

        assert_eq!(config.port, Some(8080));
    }

    #[test]
    fn malformed_xdg_toml_propagates_as_an_error() {
        let xdg_dir = tempfile::tempdir().unwrap();
        let app_dir = xdg_dir.path().join("agentrt");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "invalid [[[\n").unwrap();

        let prev_xdg = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", xdg_dir.path());

        let result = load_and_apply("agentrt", None::<&std::path::Path>);
        restore_var("XDG_CONFIG_HOME", prev_xdg);

        assert!(matches!(result, Err(LoadError::XdgParse(_))));
    }
}
