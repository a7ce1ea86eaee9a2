//! `EnvSource`: one place configuration key-value pairs can come from, ranked
//! by [`load_and_apply`] at the call site rather than hardcoded per-source.

use std::collections::HashMap;

use crate::LoadError;

pub trait EnvSource {
    /// Returns this source's key-value pairs, or an empty map if the
    /// underlying file is simply absent (only a read/parse failure errors).
    fn load(&self) -> Result<HashMap<String, String>, LoadError>;
}

pub(crate) fn unquote(raw: &str) -> String {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return raw[1..raw.len() - 1].replace("\\\"", "\"");
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return raw[1..raw.len() - 1].to_string();
    }
    raw.to_string()
}
