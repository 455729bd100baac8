//! Layered YAML configuration for lockbump.
//!
//! Three flat key/value layers are merged into one [`EffectiveConfig`]:
//!
//! 1. built-in defaults (`data/default.yaml`, compiled into the library),
//! 2. optional user overrides at `<data_dir>/__user_config__.yaml`,
//! 3. required per-target overrides at `<data_dir>/<target>.yaml`.
//!
//! Later layers win key by key; nested values are replaced wholesale, never
//! deep-merged. The per-target layer is what names the repository, so its
//! absence is fatal ([`ConfigError::Missing`]).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::stamp;

/// Built-in default layer.
const DEFAULT_CONFIG: &str = include_str!("../data/default.yaml");

/// File name of the optional user override layer inside the data directory.
pub const USER_CONFIG_FILE: &str = "__user_config__.yaml";

/// Keys that must be set (non-null) after merging.
const REQUIRED_KEYS: &[&str] = &[
    "commiter_name",
    "commiter_email",
    "github_account",
    "url",
    "type",
    "base_remote_branch",
    "pull_request_base",
    "timestamp_format",
];

/// Keys with a built-in fallback; a null value selects the fallback.
const OPTIONAL_KEYS: &[&str] = &[
    "pull_request_body",
    "bundler_parallel_number",
    "github_api_url",
];

/// Keys whose values must be YAML strings.
const STRING_KEYS: &[&str] = &[
    "commiter_name",
    "commiter_email",
    "github_account",
    "url",
    "type",
    "base_remote_branch",
    "pull_request_body",
    "pull_request_base",
    "timestamp_format",
    "github_api_url",
];

// ---------------------------------------------------------------------------
// Effective config
// ---------------------------------------------------------------------------

/// The merged, validated settings for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    /// Author name used for the update commit.
    pub commiter_name: String,

    /// Author email used for the update commit.
    pub commiter_email: String,

    /// Account that owns the token (and the fork, for `fork` targets).
    pub github_account: String,

    /// Canonical upstream URL of the target repository.
    pub url: String,

    /// Relationship to the target: `fork`, `shared` or `private`.
    ///
    /// Kept as the raw string; it is only interpreted by
    /// [`crate::git::remote_url`] so an invalid value surfaces as
    /// [`crate::errors::AuthError::InvalidType`].
    #[serde(rename = "type")]
    pub repo_type: String,

    /// Remote ref the feature branch starts from (e.g. `origin/master`).
    pub base_remote_branch: String,

    /// Pull request body text.
    #[serde(default)]
    pub pull_request_body: String,

    /// Branch the pull request targets.
    pub pull_request_base: String,

    /// strftime pattern for the run timestamp.
    pub timestamp_format: String,

    /// Bundler `--jobs` hint; values above 1 enable parallel installs.
    #[serde(default = "default_parallel_number")]
    pub bundler_parallel_number: u32,

    /// GitHub REST API base URL.
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,
}

fn default_parallel_number() -> u32 {
    1
}
fn default_github_api_url() -> String {
    "https://api.github.com".into()
}

impl EffectiveConfig {
    /// Build the typed view from a merged mapping and validate it.
    ///
    /// Keys this struct does not model are ignored.
    pub fn from_mapping(mut merged: Mapping) -> Result<Self, ConfigError> {
        for key in REQUIRED_KEYS {
            match merged.get(*key) {
                None | Some(Value::Null) => return Err(ConfigError::MissingKey((*key).into())),
                Some(_) => {}
            }
        }
        // An optional key written without a value falls back to its default.
        for key in OPTIONAL_KEYS {
            if matches!(merged.get(*key), Some(Value::Null)) {
                merged.remove(*key);
            }
        }
        check_value_types(&merged)?;

        let config: EffectiveConfig = serde_yaml::from_value(Value::Mapping(merged))
            .map_err(|e| ConfigError::InvalidValue {
                field: "configuration".into(),
                detail: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate values that serde cannot check on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "url".into(),
                detail: "repository url must not be empty".into(),
            });
        }
        if self.base_remote_branch.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "base_remote_branch".into(),
                detail: "base remote branch must not be empty".into(),
            });
        }
        stamp::validate_format(&self.timestamp_format)?;
        Ok(())
    }
}

/// Reject values of the wrong YAML type, naming the key.
fn check_value_types(merged: &Mapping) -> Result<(), ConfigError> {
    let wrong_type = |key: &str, expected: &str, found: &Value| ConfigError::InvalidValue {
        field: key.to_string(),
        detail: format!("expected {expected}, found {}", describe(found)),
    };
    for key in STRING_KEYS {
        match merged.get(*key) {
            Some(value) if !value.is_string() => {
                return Err(wrong_type(*key, "a string", value));
            }
            _ => {}
        }
    }
    if let Some(value) = merged.get("bundler_parallel_number") {
        if value.as_u64().and_then(|n| u32::try_from(n).ok()).is_none() {
            return Err(wrong_type("bundler_parallel_number", "a non-negative integer", value));
        }
    }
    Ok(())
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "nothing".into(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string '{s}'"),
        Value::Sequence(_) => "a list".into(),
        Value::Mapping(_) => "a mapping".into(),
        Value::Tagged(tagged) => format!("tagged value {}", tagged.tag),
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolves the effective configuration for a target from the data directory.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    data_dir: PathBuf,
    defaults: Mapping,
}

impl ConfigResolver {
    /// Create a resolver using the built-in default layer.
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let defaults = parse_layer(DEFAULT_CONFIG, Path::new("<built-in default.yaml>"))?
            .unwrap_or_default();
        Ok(Self::with_defaults(data_dir, defaults))
    }

    /// Create a resolver with an explicit default layer.
    pub fn with_defaults(data_dir: impl Into<PathBuf>, defaults: Mapping) -> Self {
        Self {
            data_dir: data_dir.into(),
            defaults,
        }
    }

    pub fn user_config_path(&self) -> PathBuf {
        self.data_dir.join(USER_CONFIG_FILE)
    }

    pub fn target_config_path(&self, target: &str) -> PathBuf {
        self.data_dir.join(format!("{target}.yaml"))
    }

    /// Merge `default → user → target` and return the validated result.
    pub fn resolve(&self, target: &str) -> Result<EffectiveConfig, ConfigError> {
        validate_target_name(target)?;
        info!(target, data_dir = %self.data_dir.display(), "resolving configuration");

        let user = match load_layer(&self.user_config_path())? {
            Some(layer) => layer,
            None => {
                debug!("no user configuration layer");
                Mapping::new()
            }
        };

        let target_path = self.target_config_path(target);
        let per_target = load_layer(&target_path)?.ok_or_else(|| ConfigError::Missing {
            target: target.to_string(),
            path: target_path.clone(),
        })?;

        let merged = merge_layers([&self.defaults, &user, &per_target]);
        debug!(keys = merged.len(), "configuration layers merged");
        EffectiveConfig::from_mapping(merged)
    }
}

/// Shallow merge: keys are unioned and later layers overwrite earlier ones.
pub fn merge_layers<'a, I>(layers: I) -> Mapping
where
    I: IntoIterator<Item = &'a Mapping>,
{
    let mut merged = Mapping::new();
    for layer in layers {
        for (key, value) in layer {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Read a layer from disk. A missing file or an empty document is `None`.
fn load_layer(path: &Path) -> Result<Option<Mapping>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    debug!(path = %path.display(), "loading configuration layer");
    let contents = std::fs::read_to_string(path)?;
    parse_layer(&contents, path)
}

fn parse_layer(contents: &str, path: &Path) -> Result<Option<Mapping>, ConfigError> {
    let value: Value = serde_yaml::from_str(contents).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    match value {
        Value::Null => Ok(None),
        Value::Mapping(map) if map.is_empty() => Ok(None),
        Value::Mapping(map) => Ok(Some(map)),
        _ => Err(ConfigError::ParseError {
            path: path.to_path_buf(),
            detail: "top level must be a key/value mapping".into(),
        }),
    }
}

/// A target name becomes a file name and a workspace directory name, so it
/// must be a single path component.
fn validate_target_name(target: &str) -> Result<(), ConfigError> {
    if target.is_empty() || target == "." || target == ".." || target.contains(['/', '\\']) {
        return Err(ConfigError::InvalidValue {
            field: "build_for".into(),
            detail: format!("'{target}' is not a valid target name"),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Name of the environment variable holding a target's token.
///
/// `fenix-knight` maps to `TOKEN_FENIX_KNIGHT`.
pub fn token_env_key(target: &str) -> String {
    let normalized: String = target
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("TOKEN_{normalized}")
}

/// Read the token for `target` from the environment.
pub fn resolve_token(target: &str) -> Result<String, ConfigError> {
    let var = token_env_key(target);
    match std::env::var(&var) {
        Ok(val) if !val.is_empty() => {
            debug!(target, env_name = %var, "resolved token");
            Ok(val)
        }
        Ok(_) => {
            warn!(target, env_name = %var, "token variable is set but empty");
            Err(ConfigError::EnvVarMissing {
                var,
                target: target.into(),
            })
        }
        Err(_) => Err(ConfigError::EnvVarMissing {
            var,
            target: target.into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    fn mapping(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_builtin_defaults_parse() {
        let resolver = ConfigResolver::new("/nonexistent").unwrap();
        assert_eq!(
            resolver.defaults.get("timestamp_format"),
            Some(&Value::from("%Y%m%d%H%M%S"))
        );
        assert_eq!(resolver.defaults.get("type"), Some(&Value::from("fork")));
    }

    #[test]
    fn test_target_overrides_user_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            USER_CONFIG_FILE,
            "commiter_name: 'user-bot'\nbase_remote_branch: 'origin/trunk'\n",
        );
        write(
            dir.path(),
            "app.yaml",
            "url: 'https://github.com/acme/app.git'\nbase_remote_branch: 'origin/develop'\n",
        );

        let config = ConfigResolver::new(dir.path()).unwrap().resolve("app").unwrap();
        assert_eq!(config.base_remote_branch, "origin/develop");
        assert_eq!(config.commiter_name, "user-bot");
        assert_eq!(config.commiter_email, "lockbump@example.com");
        assert_eq!(config.url, "https://github.com/acme/app.git");
    }

    #[test]
    fn test_user_layer_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "app.yaml", "url: 'https://github.com/acme/app'\n");
        let config = ConfigResolver::new(dir.path()).unwrap().resolve("app").unwrap();
        assert_eq!(config.repo_type, "fork");
        assert_eq!(config.bundler_parallel_number, 1);
    }

    #[test]
    fn test_missing_target_layer() {
        let dir = tempfile::tempdir().unwrap();
        let result = ConfigResolver::new(dir.path()).unwrap().resolve("ghost");
        assert!(matches!(
            result,
            Err(ConfigError::Missing { ref target, .. }) if target == "ghost"
        ));
    }

    #[test]
    fn test_empty_target_layer_counts_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "app.yaml", "");
        let result = ConfigResolver::new(dir.path()).unwrap().resolve("app");
        assert!(matches!(result, Err(ConfigError::Missing { .. })));
    }

    #[test]
    fn test_required_key_missing() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "app.yaml", "commiter_name: 'x'\n");
        let result = ConfigResolver::new(dir.path()).unwrap().resolve("app");
        assert!(matches!(result, Err(ConfigError::MissingKey(ref k)) if k == "url"));
    }

    #[test]
    fn test_null_override_unsets_key() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "app.yaml",
            "url: 'https://github.com/acme/app'\ngithub_account: ~\n",
        );
        let result = ConfigResolver::new(dir.path()).unwrap().resolve("app");
        assert!(matches!(result, Err(ConfigError::MissingKey(ref k)) if k == "github_account"));
    }

    #[test]
    fn test_non_mapping_layer_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "app.yaml", "- a\n- b\n");
        let result = ConfigResolver::new(dir.path()).unwrap().resolve("app");
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_invalid_timestamp_format_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "app.yaml",
            "url: 'https://github.com/acme/app'\ntimestamp_format: '%Y-%m-%d %H:%M'\n",
        );
        let result = ConfigResolver::new(dir.path()).unwrap().resolve("app");
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "timestamp_format"
        ));
    }

    #[test]
    fn test_target_name_must_be_single_component() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ConfigResolver::new(dir.path()).unwrap();
        assert!(matches!(
            resolver.resolve("../etc/passwd"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(resolver.resolve(""), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "app.yaml",
            "url: 'https://github.com/acme/app'\nteam: 'platform'\n",
        );
        let config = ConfigResolver::new(dir.path()).unwrap().resolve("app").unwrap();
        assert_eq!(config.url, "https://github.com/acme/app");
    }

    #[test]
    fn test_empty_pull_request_body_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "app.yaml",
            "url: 'https://github.com/acme/app'\npull_request_body:\nbundler_parallel_number:\n",
        );
        let config = ConfigResolver::new(dir.path()).unwrap().resolve("app").unwrap();
        assert_eq!(config.pull_request_body, "");
        assert_eq!(config.bundler_parallel_number, 1);
    }

    #[test]
    fn test_wrong_value_type_names_the_key() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "app.yaml",
            "url: 'https://github.com/acme/app'\ngithub_account: 1234\n",
        );
        let err = ConfigResolver::new(dir.path())
            .unwrap()
            .resolve("app")
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, ref detail }
                if field == "github_account" && detail == "expected a string, found number 1234"
        ));
        assert!(err.to_string().contains("'github_account'"));
    }

    #[test]
    fn test_negative_parallel_number_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "app.yaml",
            "url: 'https://github.com/acme/app'\nbundler_parallel_number: -2\n",
        );
        let result = ConfigResolver::new(dir.path()).unwrap().resolve("app");
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "bundler_parallel_number"
        ));
    }

    #[test]
    fn test_merge_is_shallow() {
        let base = mapping("nested:\n  a: 1\n  b: 2\nkeep: true\n");
        let over = mapping("nested:\n  c: 3\n");
        let merged = merge_layers([&base, &over]);
        assert_eq!(merged.get("nested"), Some(&Value::Mapping(mapping("c: 3"))));
        assert_eq!(merged.get("keep"), Some(&Value::from(true)));
    }

    #[test]
    fn test_token_env_key() {
        assert_eq!(token_env_key("fenix-knight"), "TOKEN_FENIX_KNIGHT");
        assert_eq!(token_env_key("acme.app v2"), "TOKEN_ACME_APP_V2");
        assert_eq!(token_env_key("plain"), "TOKEN_PLAIN");
    }

    #[test]
    fn test_resolve_token() {
        std::env::set_var("TOKEN_LOCKBUMP_CFG_TEST", "ghp_abc");
        assert_eq!(resolve_token("lockbump-cfg-test").unwrap(), "ghp_abc");
        std::env::remove_var("TOKEN_LOCKBUMP_CFG_TEST");

        let result = resolve_token("lockbump-cfg-absent");
        assert!(matches!(
            result,
            Err(ConfigError::EnvVarMissing { ref var, .. }) if var == "TOKEN_LOCKBUMP_CFG_ABSENT"
        ));
    }
}
