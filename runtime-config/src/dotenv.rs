//! Project-local `.env` source: `KEY=VALUE` lines in the working directory
//! (or a caller-supplied directory, for an agent working outside its repo).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::source::{unquote, EnvSource};
use crate::LoadError;

pub struct DotenvSource {
    dir: Option<PathBuf>,
}

impl DotenvSource {
    pub fn new(dir: Option<&Path>) -> Self {
        Self { dir: dir.map(Path::to_path_buf) }
    }

    fn file_path(&self) -> Option<PathBuf> {
        let dir = self.dir.clone().or_else(|| std::env::current_dir().ok())?;
        let candidate = dir.join(".env");
        candidate.is_file().then_some(candidate)
    }
}

impl EnvSource for DotenvSource {
    fn load(&self) -> Result<HashMap<String, String>, LoadError> {
        let Some(path) = self.file_path() else {
            return Ok(HashMap::new());
        };
        let content = std::fs::read_to_string(&path).map_err(LoadError::DotenvRead)?;
        Ok(parse(&content))
    }
}

/// `KEY=VALUE` per line; blank lines and `#`-prefixed lines (after trim) are
/// skipped. No line continuation or multiline values, matching the env vars
/// this runtime actually reads (`LLM_PROVIDER`, API keys, `DATA_DIR`, ...) —
/// none of which need more than a single scalar line.
fn parse(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), unquote(v.trim())))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_and_model_lines() {
        let m = parse("LLM_PROVIDER=openai\nLLM_MODEL=gpt-4o-mini\n");
        assert_eq!(m.get("LLM_PROVIDER"), Some(&"openai".to_string()));
        assert_eq!(m.get("LLM_MODEL"), Some(&"gpt-4o-mini".to_string()));
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let m = parse("\n# an API key, not checked in\nOPENAI_API_KEY=sk-test\n  \n");
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("OPENAI_API_KEY"), Some(&"sk-test".to_string()));
    }

    #[test]
    fn double_quoted_value_is_unwrapped() {
        let m = parse(r#"DATABASE_URL="./data/runs.sqlite3""#);
        assert_eq!(m.get("DATABASE_URL"), Some(&"./data/runs.sqlite3".to_string()));
    }

    #[test]
    fn single_quoted_value_is_unwrapped() {
        let m = parse("AGENT_ORG_ID='org with spaces'");
        assert_eq!(m.get("AGENT_ORG_ID"), Some(&"org with spaces".to_string()));
    }

    #[test]
    fn line_without_equals_is_ignored() {
        let m = parse("not a valid line\nPORT=8080\n");
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("PORT"), Some(&"8080".to_string()));
    }

    #[test]
    fn empty_key_is_ignored() {
        let m = parse("=orphan_value\nPORT=9090\n");
        assert_eq!(m.len(), 1);
        assert_eq!(m.get("PORT"), Some(&"9090".to_string()));
    }

    #[test]
    fn empty_content_yields_empty_map() {
        assert!(parse("").is_empty());
    }

    #[test]
    fn empty_value_is_kept_as_empty_string() {
        let m = parse("ANTHROPIC_API_KEY=\nPORT=8080\n");
        assert_eq!(m.get("ANTHROPIC_API_KEY"), Some(&"".to_string()));
        assert_eq!(m.get("PORT"), Some(&"8080".to_string()));
    }

    #[test]
    fn empty_double_quoted_value() {
        let m = parse(r#"DATA_DIR="""#);
        assert_eq!(m.get("DATA_DIR"), Some(&"".to_string()));
    }

    #[test]
    fn escaped_quote_inside_double_quoted_value() {
        let m = parse(r#"LLM_MODEL="say \"hi\"""#);
        assert_eq!(m.get("LLM_MODEL"), Some(&"say \"hi\"".to_string()));
    }

    #[test]
    fn missing_file_yields_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let m = DotenvSource::new(Some(dir.path())).load().unwrap();
        assert!(m.is_empty());
    }

    #[test]
    fn reads_file_from_given_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "AGENT_USER_ID=u-1\nAGENT_PROJECT_ID=p-1\n").unwrap();
        let m = DotenvSource::new(Some(dir.path())).load().unwrap();
        assert_eq!(m.get("AGENT_USER_ID"), Some(&"u-1".to_string()));
        assert_eq!(m.get("AGENT_PROJECT_ID"), Some(&"p-1".to_string()));
    }
}
