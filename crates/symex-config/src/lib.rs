// SPDX-License-Identifier: AGPL-3.0

//! Configuration for a `symex` exploration run.
//!
//! `Config` is `clap`-derived for the CLI binary and `serde`-derived for an
//! optional TOML config file merged underneath command-line overrides,
//! matching the teacher's `halmos.toml`-plus-flags layering.

use std::path::{Path as FsPath, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

/// Which active path `PathGroup::step` advances next. Mirrors
/// `symex_engine::Strategy`; kept as its own type here (rather than a
/// dependency on `symex-engine`) so this crate stays a leaf the engine
/// itself never needs to link against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    Bfs,
    Dfs,
}

/// Configuration for one `symex run`/`symex query` invocation (matches the
/// teacher's `Config` dataclass-derived-from-flags pattern, trimmed to the
/// fields this interpreter's exploration loop actually consumes).
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[clap(
    name = "symex",
    version,
    about = "Symbolic execution engine for a Python-like imperative subset",
    disable_version_flag = true
)]
pub struct Config {
    /// Path to the program's JSON AST.
    #[clap(value_name = "PROGRAM")]
    #[serde(skip)]
    pub program: PathBuf,

    /// Path to a TOML config file, merged underneath command-line flags.
    #[clap(long)]
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Scheduling policy for the path-group explorer.
    #[clap(long, value_enum, default_value_t = Strategy::Bfs)]
    #[serde(default)]
    pub strategy: Strategy,

    /// Maximum total paths a single run may spawn before the run errors out.
    #[clap(long, default_value_t = symex_constants::DEFAULT_MAX_PATHS)]
    #[serde(default = "default_max_paths")]
    pub max_paths: usize,

    /// Maximum statements a single path may execute before the run errors
    /// out (the wall-clock safety valve for a non-terminating program).
    #[clap(long, default_value_t = symex_constants::DEFAULT_MAX_STEPS)]
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Maximum completed passes of any one loop's body before its next
    /// iteration is refused, bounding unconditionally-looping programs the
    /// way the teacher's JUMPI handler bounds backward-branch unrolling.
    #[clap(long, default_value_t = symex_constants::DEFAULT_LOOP_UNROLL_BOUND)]
    #[serde(default = "default_loop_bound")]
    pub loop_bound: usize,

    /// Give up a single solver query after this many milliseconds, rather
    /// than letting a hard query stall the whole run. 0 disables the limit.
    #[clap(long, default_value_t = 10_000)]
    #[serde(default = "default_solver_timeout_ms")]
    pub solver_timeout_ms: u32,

    /// Verbosity level (repeatable: -v, -vv, -vvv).
    #[clap(short, long, action = clap::ArgAction::Count)]
    #[serde(default)]
    pub verbose: u8,
}

fn default_max_paths() -> usize {
    symex_constants::DEFAULT_MAX_PATHS
}

fn default_max_steps() -> usize {
    symex_constants::DEFAULT_MAX_STEPS
}

fn default_loop_bound() -> usize {
    symex_constants::DEFAULT_LOOP_UNROLL_BOUND
}

fn default_solver_timeout_ms() -> u32 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            program: PathBuf::new(),
            config: None,
            strategy: Strategy::default(),
            max_paths: default_max_paths(),
            max_steps: default_max_steps(),
            loop_bound: default_loop_bound(),
            solver_timeout_ms: default_solver_timeout_ms(),
            verbose: 0,
        }
    }
}

impl Config {
    /// Loads a TOML config file's `[global]` table, applying only the
    /// fields it mentions on top of `self` — command-line flags the user
    /// never set still carry their struct defaults, so a config file can't
    /// accidentally override a flag that was, in fact, passed explicitly.
    /// Callers therefore call this on a `Config::default()` built with only
    /// the file's settings, then `merge` the real CLI parse on top.
    pub fn from_file(path: &FsPath) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {path:?}"))?;
        let parsed: TomlConfig =
            toml::from_str(&content).with_context(|| format!("failed to parse config file: {path:?}"))?;
        parsed.into_config()
    }

    /// Merges command-line overrides (`other`) on top of a base config
    /// (typically loaded from a file via `from_file`). A flag left at its
    /// clap default on `other` does not clobber a non-default value `self`
    /// picked up from the file.
    pub fn merge(&mut self, other: Self) {
        self.program = other.program;
        if other.strategy != Strategy::default() {
            self.strategy = other.strategy;
        }
        if other.max_paths != default_max_paths() {
            self.max_paths = other.max_paths;
        }
        if other.max_steps != default_max_steps() {
            self.max_steps = other.max_steps;
        }
        if other.loop_bound != default_loop_bound() {
            self.loop_bound = other.loop_bound;
        }
        if other.solver_timeout_ms != default_solver_timeout_ms() {
            self.solver_timeout_ms = other.solver_timeout_ms;
        }
        if other.verbose > 0 {
            self.verbose = other.verbose;
        }
    }

    /// Resolves a config file path: the explicit `--config` flag, or else
    /// `<cwd>/symex.toml` if it exists.
    pub fn resolve_config_path(&self) -> Option<PathBuf> {
        if let Some(config) = &self.config {
            return Some(config.clone());
        }
        let default_path = PathBuf::from("symex.toml");
        default_path.exists().then_some(default_path)
    }
}

/// TOML configuration structure, deserialized loosely (unknown keys
/// ignored) so old config files tolerate new fields appearing over time.
#[derive(Debug, Deserialize)]
struct TomlConfig {
    #[serde(default)]
    global: TomlGlobal,
}

#[derive(Debug, Default, Deserialize)]
struct TomlGlobal {
    strategy: Option<Strategy>,
    max_paths: Option<usize>,
    max_steps: Option<usize>,
    loop_bound: Option<usize>,
    solver_timeout_ms: Option<u32>,
    verbose: Option<u8>,
}

impl TomlConfig {
    fn into_config(self) -> Result<Config> {
        let mut config = Config::default();
        let g = self.global;
        if let Some(v) = g.strategy {
            config.strategy = v;
        }
        if let Some(v) = g.max_paths {
            config.max_paths = v;
        }
        if let Some(v) = g.max_steps {
            config.max_steps = v;
        }
        if let Some(v) = g.loop_bound {
            config.loop_bound = v;
        }
        if let Some(v) = g.solver_timeout_ms {
            config.solver_timeout_ms = v;
        }
        if let Some(v) = g.verbose {
            config.verbose = v;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_constants() {
        let config = Config::default();
        assert_eq!(config.max_paths, symex_constants::DEFAULT_MAX_PATHS);
        assert_eq!(config.max_steps, symex_constants::DEFAULT_MAX_STEPS);
        assert_eq!(config.loop_bound, symex_constants::DEFAULT_LOOP_UNROLL_BOUND);
        assert_eq!(config.strategy, Strategy::Bfs);
    }

    #[test]
    fn merge_only_overrides_non_default_fields() {
        let mut base = Config { max_paths: 42, ..Config::default() };
        let cli = Config { program: PathBuf::from("prog.json"), ..Config::default() };
        base.merge(cli);
        assert_eq!(base.max_paths, 42, "file-provided value must survive a default-valued flag");
        assert_eq!(base.program, PathBuf::from("prog.json"));
    }

    #[test]
    fn merge_applies_an_explicit_override() {
        let mut base = Config { max_paths: 42, ..Config::default() };
        let cli = Config { max_paths: 7, ..Config::default() };
        base.merge(cli);
        assert_eq!(base.max_paths, 7);
    }

    #[test]
    fn from_file_parses_the_global_table() {
        let dir = std::env::temp_dir().join(format!("symex-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("symex.toml");
        std::fs::write(&path, "[global]\nmax_paths = 500\nstrategy = \"dfs\"\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.max_paths, 500);
        assert_eq!(config.strategy, Strategy::Dfs);
        std::fs::remove_dir_all(&dir).ok();
    }
}
