use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File looked up in the working directory when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "branchctl.toml";

const ENV_DEFAULT_BRANCH: &str = "BRANCHCTL_DEFAULT_BRANCH";
const ENV_BRANCH_PREFIX: &str = "BRANCHCTL_BRANCH_PREFIX";
const ENV_DETECT_MODIFICATIONS: &str = "BRANCHCTL_DETECT_MODIFICATIONS";
const ENV_REPLACE_MODE: &str = "BRANCHCTL_REPLACE_MODE";

/// Behavioural knobs for a `ConversationTree`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Name of the branch created together with the root node.
    pub default_branch_name: String,
    /// Prefix for generated branch names ("Branch 2", "Branch 3", ...).
    pub branch_name_prefix: String,
    /// Maximum characters of message content shown in a breadcrumb label.
    pub breadcrumb_label_chars: usize,
    pub diff: DiffConfig,
    pub merge: MergeConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Report depth-aligned edit/regeneration pairs as `modified` instead of
    /// plain `added` on both sides.
    pub detect_modifications: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// What a `replace` merge does with the target's divergent nodes.
    pub replace_mode: ReplaceMode,
    /// Fail with `NothingToMerge` instead of returning the target leaf when
    /// the branches do not differ.
    pub fail_on_empty: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceMode {
    /// Move discarded nodes to the tree's undo log.
    #[default]
    Detach,
    /// Drop discarded nodes permanently.
    Delete,
}

impl FromStr for ReplaceMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "detach" => Ok(ReplaceMode::Detach),
            "delete" => Ok(ReplaceMode::Delete),
            other => Err(ConfigError::InvalidValue {
                key: "replace_mode".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            default_branch_name: "main".to_string(),
            branch_name_prefix: "Branch".to_string(),
            breadcrumb_label_chars: 40,
            diff: DiffConfig::default(),
            merge: MergeConfig::default(),
        }
    }
}

fn parse_bool_env(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

impl TreeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads the config from `path`, or from `branchctl.toml` in the working
    /// directory when no path is given, then applies environment overrides.
    ///
    /// An explicit path that cannot be read is an error; a missing default
    /// file just yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::read_file(path)?,
            None if Path::new(CONFIG_FILE_NAME).exists() => {
                Self::read_file(Path::new(CONFIG_FILE_NAME))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Loaded tree config file");
        Self::from_toml_str(&content)
    }

    /// Applies `BRANCHCTL_*` overrides resolved through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup(ENV_DEFAULT_BRANCH) {
            self.default_branch_name = name;
        }
        if let Some(prefix) = lookup(ENV_BRANCH_PREFIX) {
            self.branch_name_prefix = prefix;
        }
        if let Some(detect) = lookup(ENV_DETECT_MODIFICATIONS) {
            self.diff.detect_modifications = parse_bool_env(&detect);
        }
        if let Some(mode) = lookup(ENV_REPLACE_MODE) {
            self.merge.replace_mode = mode.parse()?;
        }
        Ok(())
    }
}
