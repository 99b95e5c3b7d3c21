// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for mpitest.
//!
//! Configuration is layered: the embedded defaults, then `.config/mpitest.toml` under the package
//! root, then environment overrides.

use crate::errors::{
    ConfigParseError, ConfigParseErrorKind, MaxNprocsEnvError, ProcessLimitExceeded,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::{collections::BTreeSet, num::NonZeroUsize};
use tracing::{debug, warn};

/// Overall configuration for mpitest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MpiTestConfig {
    process_limit: ProcessLimit,
    launcher: LauncherConfig,
}

impl MpiTestConfig {
    /// The default location of the config within the package: `.config/mpitest.toml`.
    pub const CONFIG_PATH: &'static str = ".config/mpitest.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// The environment variable that overrides `max-nprocs`.
    pub const MAX_NPROCS_ENV: &'static str = "MPITEST_MAX_NPROCS";

    /// Reads the config from the default config and the repository config.
    ///
    /// If `config_file` is `None`, `<package_root>/.config/mpitest.toml` is read if it exists.
    /// If it is `Some`, that file must exist.
    pub fn from_sources(
        package_root: &Utf8Path,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = package_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };
        debug!("reading mpitest config from `{config_file}`");

        let builder = Self::make_default_config().add_source(source);
        let (config, ignored) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        if !ignored.is_empty() {
            let keys = ignored.into_iter().collect::<Vec<_>>().join(", ");
            warn!("ignoring unknown configuration keys in `{config_file}`: {keys}");
        }

        Ok(config.into_config())
    }

    /// Returns the default configuration.
    pub fn default_config() -> Self {
        let (config, _) = Self::build_and_deserialize_config(&Self::make_default_config())
            .unwrap_or_else(|error| panic!("default config is always valid: {error}"));
        config.into_config()
    }

    /// Applies the value of the [`Self::MAX_NPROCS_ENV`] environment variable.
    pub fn apply_env(self) -> Result<Self, MaxNprocsEnvError> {
        let value = match std::env::var(Self::MAX_NPROCS_ENV) {
            Ok(value) => Some(value),
            Err(std::env::VarError::NotPresent) => None,
            Err(std::env::VarError::NotUnicode(value)) => {
                return Err(MaxNprocsEnvError::new(value.to_string_lossy()));
            }
        };
        self.with_max_nprocs_env(value.as_deref())
    }

    /// Overrides the process limit with an environment value, if set and non-empty.
    pub fn with_max_nprocs_env(mut self, value: Option<&str>) -> Result<Self, MaxNprocsEnvError> {
        if let Some(value) = value.filter(|value| !value.trim().is_empty()) {
            let max = value
                .trim()
                .parse::<NonZeroUsize>()
                .map_err(|_| MaxNprocsEnvError::new(value))?;
            debug!("{} overrides max-nprocs: {max}", Self::MAX_NPROCS_ENV);
            self.process_limit = ProcessLimit::new(Some(max));
        }
        Ok(self)
    }

    /// Returns the process limit.
    pub fn process_limit(&self) -> ProcessLimit {
        self.process_limit
    }

    /// Returns the launcher configuration.
    pub fn launcher(&self) -> &LauncherConfig {
        &self.launcher
    }

    // ---
    // Helper methods
    // ---

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(MpiTestConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: MpiTestConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // The config crate also reports the key; drop it so the path is only shown once.
                let path = error.path().clone();
                let error = match error.into_inner() {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

/// Returns the root of the package whose tests are running.
///
/// This is `CARGO_MANIFEST_DIR` when set (as it is under `cargo test`), or the current directory.
pub fn package_root() -> Option<Utf8PathBuf> {
    let root = match std::env::var_os("CARGO_MANIFEST_DIR") {
        Some(dir) => dir.into(),
        None => std::env::current_dir().ok()?,
    };
    match Utf8PathBuf::try_from(root) {
        Ok(root) => Some(root),
        Err(error) => {
            warn!(
                "package root `{}` is not valid UTF-8, skipping repository config",
                error.as_path().display()
            );
            None
        }
    }
}

/// The maximum number of worker processes a single test variant may request.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ProcessLimit {
    max: Option<NonZeroUsize>,
}

impl ProcessLimit {
    /// No limit.
    pub const UNBOUNDED: Self = Self { max: None };

    /// Creates a new limit. `None` means unbounded.
    pub fn new(max: Option<NonZeroUsize>) -> Self {
        Self { max }
    }

    /// The maximum, or `None` if unbounded.
    pub fn max(&self) -> Option<NonZeroUsize> {
        self.max
    }

    /// Checks that `nprocs` is within the limit.
    pub fn check(&self, test_name: &str, nprocs: NonZeroUsize) -> Result<(), ProcessLimitExceeded> {
        match self.max {
            Some(max) if nprocs > max => Err(ProcessLimitExceeded::new(test_name, nprocs, max)),
            _ => Ok(()),
        }
    }
}

/// How to invoke the distributed launcher.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct LauncherConfig {
    /// The launcher program.
    pub program: String,

    /// Arguments passed to the launcher before the process count.
    pub args: Vec<String>,

    /// The flag that requests a number of processes, typically `-n`.
    pub nprocs_flag: String,

    /// Whether ranks other than 0 are passed `--quiet`.
    pub quiet_other_ranks: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct MpiTestConfigDeserialize {
    #[serde(default)]
    max_nprocs: Option<NonZeroUsize>,
    launcher: LauncherConfig,
}

impl MpiTestConfigDeserialize {
    fn into_config(self) -> MpiTestConfig {
        MpiTestConfig {
            process_limit: ProcessLimit::new(self.max_nprocs),
            launcher: self.launcher,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use camino_tempfile_ext::prelude::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = MpiTestConfig::default_config();
        assert_eq!(config.process_limit(), ProcessLimit::UNBOUNDED);
        assert_eq!(
            config.launcher(),
            &LauncherConfig {
                program: "mpiexec".to_owned(),
                args: vec![],
                nprocs_flag: "-n".to_owned(),
                quiet_other_ranks: true,
            }
        );
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let config = MpiTestConfig::from_sources(temp_dir.path(), None).unwrap();
        assert_eq!(config, MpiTestConfig::default_config());
    }

    #[test]
    fn test_config_file_layers_over_defaults() {
        let temp_dir = tempdir().unwrap();
        temp_dir
            .child(MpiTestConfig::CONFIG_PATH)
            .write_str(indoc! {r#"
                max-nprocs = 4

                [launcher]
                program = "srun"
                nprocs-flag = "--ntasks"
            "#})
            .unwrap();

        let config = MpiTestConfig::from_sources(temp_dir.path(), None).unwrap();
        assert_eq!(config.process_limit().max(), Some(nz(4)));
        assert_eq!(config.launcher().program, "srun");
        assert_eq!(config.launcher().nprocs_flag, "--ntasks");
        // Keys absent from the file keep their default values.
        assert!(config.launcher().quiet_other_ranks);
        assert!(config.launcher().args.is_empty());
    }

    #[test]
    fn test_explicit_config_file_must_exist() {
        let temp_dir = tempdir().unwrap();
        let missing = temp_dir.path().join("missing.toml");
        let error = MpiTestConfig::from_sources(temp_dir.path(), Some(&missing)).unwrap_err();
        assert_eq!(error.config_file(), missing.as_path());
        assert!(matches!(error.kind(), ConfigParseErrorKind::BuildError(_)));
    }

    #[test_case(
        indoc! {r#"
            max-nprocs = 0
        "#},
        "max-nprocs"
        ; "zero limit"
    )]
    #[test_case(
        indoc! {r#"
            [launcher]
            quiet-other-ranks = "sometimes"
        "#},
        "launcher.quiet-other-ranks"
        ; "wrong type"
    )]
    fn test_invalid_config(contents: &str, expected_path: &str) {
        let temp_dir = tempdir().unwrap();
        temp_dir
            .child(MpiTestConfig::CONFIG_PATH)
            .write_str(contents)
            .unwrap();

        let error = MpiTestConfig::from_sources(temp_dir.path(), None).unwrap_err();
        match error.kind() {
            ConfigParseErrorKind::DeserializeError(error) => {
                assert_eq!(error.path().to_string(), expected_path);
            }
            other => panic!("expected a deserialize error, found {other:?}"),
        }
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let temp_dir = tempdir().unwrap();
        temp_dir
            .child(MpiTestConfig::CONFIG_PATH)
            .write_str(indoc! {r#"
                max-procs = 4

                [launcher]
                program = "mpirun"
            "#})
            .unwrap();

        let config = MpiTestConfig::from_sources(temp_dir.path(), None).unwrap();
        assert_eq!(config.process_limit(), ProcessLimit::UNBOUNDED);
        assert_eq!(config.launcher().program, "mpirun");
    }

    #[test_case(None, None ; "unset")]
    #[test_case(Some(""), None ; "empty")]
    #[test_case(Some("2"), Some(2) ; "set")]
    #[test_case(Some(" 8 "), Some(8) ; "surrounding whitespace")]
    fn test_max_nprocs_env(value: Option<&str>, expected: Option<usize>) {
        let config = MpiTestConfig::default_config()
            .with_max_nprocs_env(value)
            .unwrap();
        assert_eq!(config.process_limit().max(), expected.map(nz));
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = tempdir().unwrap();
        temp_dir
            .child(MpiTestConfig::CONFIG_PATH)
            .write_str("max-nprocs = 16\n")
            .unwrap();

        let config = MpiTestConfig::from_sources(temp_dir.path(), None)
            .unwrap()
            .with_max_nprocs_env(Some("2"))
            .unwrap();
        assert_eq!(config.process_limit().max(), Some(nz(2)));
    }

    #[test_case("0" ; "zero")]
    #[test_case("-1" ; "negative")]
    #[test_case("four" ; "not a number")]
    fn test_invalid_max_nprocs_env(value: &str) {
        let error = MpiTestConfig::default_config()
            .with_max_nprocs_env(Some(value))
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            format!("invalid value for MPITEST_MAX_NPROCS: `{value}` (expected a positive integer)")
        );
    }

    #[test]
    fn test_process_limit_check() {
        let limit = ProcessLimit::new(Some(nz(2)));
        assert!(limit.check("test_sum", nz(1)).is_ok());
        assert!(limit.check("test_sum", nz(2)).is_ok());

        let error = limit.check("test_sum", nz(4)).unwrap_err();
        assert_eq!(error.test_name(), "test_sum");
        assert_eq!(error.nprocs(), nz(4));
        assert_eq!(error.max(), nz(2));

        assert!(ProcessLimit::UNBOUNDED.check("test_sum", nz(1024)).is_ok());
    }
}
