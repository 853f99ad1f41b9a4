use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Server options read from `zls.json`. Unknown fields are ignored so older
/// config files keep working.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub zig_exe_path: Option<PathBuf>,
    pub zig_lib_path: Option<PathBuf>,
    pub build_runner_path: Option<PathBuf>,
    pub warn_style: bool,
    pub enable_semantic_tokens: bool,
    pub enable_snippets: bool,
    pub operator_completions: bool,
    pub skip_std_references: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            zig_exe_path: None,
            zig_lib_path: None,
            build_runner_path: None,
            warn_style: false,
            enable_semantic_tokens: true,
            enable_snippets: false,
            operator_completions: true,
            skip_std_references: false,
        }
    }
}

impl Config {
    /// `zls.json` from the platform config directory, then next to the
    /// server executable. Missing or unreadable files fall back to defaults.
    pub fn load() -> Config {
        for dir in candidate_dirs() {
            let path = dir.join("zls.json");
            if let Some(config) = Config::from_file(&path) {
                return config;
            }
        }
        Config::default()
    }

    pub fn from_file(path: &Path) -> Option<Config> {
        let raw = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(config) => Some(config),
            Err(err) => {
                eprintln!("zls: ignoring malformed config at {}: {err}", path.display());
                None
            }
        }
    }

    /// Path of the zig binary: the configured absolute path when valid,
    /// otherwise a PATH search for the configured (or default) name.
    pub fn resolved_zig_path(&self) -> Option<PathBuf> {
        if let Some(configured) = &self.zig_exe_path {
            if configured.is_absolute() && configured.is_file() {
                return Some(configured.clone());
            }
            let name = configured.as_os_str();
            if let Some(found) = find_in_path(Path::new(name)) {
                return Some(found);
            }
        }
        find_in_path(Path::new("zig"))
    }
}

fn candidate_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(config_dir) = dirs::config_dir() {
        dirs.push(config_dir);
    }
    if let Ok(exe) = env::current_exe() {
        if let Some(parent) = exe.parent() {
            dirs.push(parent.to_path_buf());
        }
    }
    dirs
}

fn find_in_path(name: &Path) -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert!(!config.warn_style);
        assert!(config.enable_semantic_tokens);
        assert!(!config.enable_snippets);
        assert!(config.operator_completions);
        assert!(!config.skip_std_references);
    }

    #[test]
    fn reads_partial_config_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("zls.json");
        fs::write(&path, r#"{ "warn_style": true, "zig_lib_path": "/opt/zig/lib" }"#)
            .expect("write config");
        let config = Config::from_file(&path).expect("config");
        assert!(config.warn_style);
        assert_eq!(config.zig_lib_path.as_deref(), Some(Path::new("/opt/zig/lib")));
        assert!(config.enable_semantic_tokens);
    }

    #[test]
    fn malformed_config_is_skipped() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("zls.json");
        fs::write(&path, "{ not json").expect("write config");
        assert!(Config::from_file(&path).is_none());
    }
}
