// Copyright (c) The dotnet-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for dotnet-explorer.
//!
//! Settings are read from `.config/dotnet-explorer.toml` under the workspace root (or an
//! explicitly specified file) and layered on top of the embedded defaults in
//! `default-config.toml`. Unknown keys are reported as warnings, not errors.

use crate::{errors::ConfigError, test_filter::ExtraArguments, tree::TreeMode};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::{collections::BTreeSet, io, time::Duration};
use tracing::{debug, warn};

/// The path of the config file, relative to the workspace root.
pub const CONFIG_PATH: &str = ".config/dotnet-explorer.toml";

/// Resolved configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExplorerConfig {
    /// The workspace root every relative path is resolved against.
    pub workspace_root: Utf8PathBuf,

    /// Candidate project directories, resolved against the workspace root.
    pub test_project_paths: Vec<Utf8PathBuf>,

    /// Extra arguments for `test`.
    pub test_arguments: String,

    /// Extra arguments for discovery.
    pub discovery_arguments: String,

    /// Whether directories are built and tested in parallel.
    pub run_in_parallel: bool,

    /// The directory the shared results folder is created in.
    pub path_for_result_file: Utf8PathBuf,

    /// The shape of the test tree.
    pub tree_mode: TreeMode,

    /// The program used to build, test and discover.
    pub build_tool: String,

    /// Whether failing stack traces are mapped to problems.
    pub add_problems: bool,

    /// How long symbol lookups are retried for.
    pub symbol_lookup_timeout: Duration,
}

impl ExplorerConfig {
    /// Loads configuration for a workspace.
    ///
    /// If `config_file` is `None`, `.config/dotnet-explorer.toml` is read if it exists. An
    /// explicitly specified file must exist.
    pub fn from_workspace(
        workspace_root: &Utf8Path,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigError> {
        Self::from_workspace_with_warnings(workspace_root, config_file, &mut DefaultConfigWarnings)
    }

    fn from_workspace_with_warnings(
        workspace_root: &Utf8Path,
        config_file: Option<&Utf8Path>,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigError> {
        let (path, required) = match config_file {
            Some(path) => (path.to_owned(), true),
            None => (workspace_root.join(CONFIG_PATH), false),
        };
        let (user, user_path) = match DeserializedConfig::from_path(&path, required, warnings)? {
            Some(config) => (config, Some(path)),
            None => (DeserializedConfig::default(), None),
        };

        Self::resolve(workspace_root, user, user_path.as_deref())
    }

    fn resolve(
        workspace_root: &Utf8Path,
        user: DeserializedConfig,
        user_path: Option<&Utf8Path>,
    ) -> Result<Self, ConfigError> {
        let default = DeserializedConfig::from_embedded();
        let invalid = |key: &'static str, message: &str| ConfigError::InvalidValue {
            path: user_path.map_or_else(
                || Utf8PathBuf::from("<default config>"),
                Utf8Path::to_owned,
            ),
            key,
            message: message.to_owned(),
        };

        let test_project_paths: Vec<_> = user
            .test_project_path
            .or(default.test_project_path)
            .unwrap_or_default()
            .into_vec()
            .into_iter()
            .map(|path| resolve_path(workspace_root, &path))
            .collect();
        if test_project_paths.is_empty() {
            return Err(invalid(
                "test-project-path",
                "at least one directory is required",
            ));
        }

        let build_tool = user
            .build_tool
            .or(default.build_tool)
            .unwrap_or_default();
        if build_tool.trim().is_empty() {
            return Err(invalid("build-tool", "must not be empty"));
        }

        let path_for_result_file = match user.path_for_result_file {
            Some(path) => resolve_path(workspace_root, &path),
            None => Utf8PathBuf::try_from(std::env::temp_dir()).map_err(|_| {
                invalid(
                    "path-for-result-file",
                    "the system temporary directory is not valid UTF-8; set this explicitly",
                )
            })?,
        };

        Ok(Self {
            workspace_root: workspace_root.to_owned(),
            test_project_paths,
            test_arguments: user
                .test_arguments
                .or(default.test_arguments)
                .unwrap_or_default(),
            discovery_arguments: user
                .discovery_arguments
                .or(default.discovery_arguments)
                .unwrap_or_default(),
            run_in_parallel: user
                .run_in_parallel
                .or(default.run_in_parallel)
                .unwrap_or_default(),
            path_for_result_file,
            tree_mode: user.tree_mode.or(default.tree_mode).unwrap_or_default(),
            build_tool,
            add_problems: user
                .add_problems
                .or(default.add_problems)
                .unwrap_or(true),
            symbol_lookup_timeout: user
                .symbol_lookup_timeout
                .or(default.symbol_lookup_timeout)
                .unwrap_or_default(),
        })
    }

    /// Returns the parsed extra test arguments.
    pub fn extra_arguments(&self) -> ExtraArguments {
        ExtraArguments::parse(&self.test_arguments)
    }
}

fn resolve_path(workspace_root: &Utf8Path, path: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(path);
    if path.is_absolute() {
        path.to_owned()
    } else {
        workspace_root.join(path)
    }
}

trait ConfigWarnings {
    fn unknown_config_keys(&mut self, config_file: &Utf8Path, unknown: &BTreeSet<String>);
}

struct DefaultConfigWarnings;

impl ConfigWarnings for DefaultConfigWarnings {
    fn unknown_config_keys(&mut self, config_file: &Utf8Path, unknown: &BTreeSet<String>) {
        let keys = unknown.iter().map(String::as_str).collect::<Vec<_>>();
        let noun = if keys.len() == 1 { "key" } else { "keys" };
        warn!(
            "in config file {config_file}, ignoring unknown configuration {noun}: {}",
            keys.join(", ")
        );
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(path) => vec![path],
            Self::Many(paths) => paths,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeserializedConfig {
    #[serde(default)]
    test_project_path: Option<OneOrMany>,
    #[serde(default)]
    test_arguments: Option<String>,
    #[serde(default)]
    discovery_arguments: Option<String>,
    #[serde(default)]
    run_in_parallel: Option<bool>,
    #[serde(default)]
    path_for_result_file: Option<String>,
    #[serde(default)]
    tree_mode: Option<TreeMode>,
    #[serde(default)]
    build_tool: Option<String>,
    #[serde(default)]
    add_problems: Option<bool>,
    #[serde(default, with = "humantime_serde")]
    symbol_lookup_timeout: Option<Duration>,
}

impl DeserializedConfig {
    const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Parses the embedded default config.
    ///
    /// Panics if the embedded TOML is invalid or contains unknown keys.
    fn from_embedded() -> Self {
        let (config, unknown) = Self::deserialize_toml(Self::DEFAULT_CONFIG)
            .expect("embedded default config should be valid");
        if !unknown.is_empty() {
            panic!(
                "found unknown keys in default config: {}",
                unknown.into_iter().collect::<Vec<_>>().join(", ")
            );
        }
        config
    }

    /// Reads the config at `path`. Returns `Ok(None)` if the file doesn't exist and
    /// `required` is false.
    fn from_path(
        path: &Utf8Path,
        required: bool,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Option<Self>, ConfigError> {
        debug!("config: attempting to load from {path}");
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound && !required => {
                debug!("config: file does not exist at {path}");
                return Ok(None);
            }
            Err(error) => {
                return Err(ConfigError::Read {
                    path: path.to_owned(),
                    error,
                });
            }
        };

        let (config, unknown) =
            Self::deserialize_toml(&contents).map_err(|error| ConfigError::Parse {
                path: path.to_owned(),
                error,
            })?;
        if !unknown.is_empty() {
            warnings.unknown_config_keys(path, &unknown);
        }

        debug!("config: loaded successfully from {path}");
        Ok(Some(config))
    }

    fn deserialize_toml(contents: &str) -> Result<(Self, BTreeSet<String>), toml::de::Error> {
        let deserializer = toml::Deserializer::parse(contents)?;
        let mut unknown = BTreeSet::new();
        let config: DeserializedConfig = serde_ignored::deserialize(deserializer, |path| {
            unknown.insert(path.to_string());
        })?;
        Ok((config, unknown))
    }
}
