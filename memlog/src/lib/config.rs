use std::borrow::Cow;
use std::env;
use std::path::PathBuf;

use thiserror::Error;

use crate::attribute::{DEFAULT_MAX_DEPTH, INTERNAL_SYMBOLS};

/// Attribution prefix used when none is given at build time.
pub const DEFAULT_PATH_PREFIX: &str = "/home";

/// Each allocation is tagged with the source file, line and symbol of the
/// nearest caller in the stack trace whose file name has this
/// case-sensitive prefix. Set `MEM_LOG_PATH` while building to change it.
pub const BUILD_PATH_PREFIX: &str = match option_env!("MEM_LOG_PATH") {
    Some(prefix)    => prefix,
    None            => DEFAULT_PATH_PREFIX,
};

pub const PATH_VAR: &str    = "MEM_LOG_PATH";
pub const DEPTH_VAR: &str   = "MEM_LOG_DEPTH";
pub const SKIP_VAR: &str    = "MEM_LOG_SKIP";
pub const EXIT_VAR: &str    = "MEM_LOG_AT_EXIT";
pub const FILE_VAR: &str    = "MEM_LOG_FILE";
pub const STRICT_VAR: &str  = "MEM_LOG_STRICT";

/// What to do when the ledger detects a duplicate or unknown block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Violation {
    Ignore,
    /// Emit a diagnostic and carry on.
    Warn,
    /// Emit a diagnostic and abort the process. A global allocator must not
    /// unwind, so panicking is not an option.
    Abort,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var:        &'static str,
        value:      String,
        expected:   &'static str,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub path_prefix:    Cow<'static, str>,
    pub max_depth:      usize,
    /// Leading frames of every trace that are never considered.
    pub skip_frames:    usize,
    /// Symbols marking the logger's own frames, see
    /// [`crate::attribute::CallSiteAttributor::is_internal`].
    pub internal_symbols: &'static [&'static str],
    pub report_at_exit: bool,
    /// Where the exit report goes. Stdout if `None`.
    pub report_file:    Option<PathBuf>,
    pub violation:      Violation,
    /// Registers the interceptor as the process log, reachable from
    /// [`crate::print_log`] and the exit hook. Only meant for interceptors
    /// living in a `static`.
    pub process_wide:   bool,
    /// Whether the `MEM_LOG_*` environment variables override the above.
    pub read_env:       bool,
}

impl Config {
    /// The configuration of the process-wide logger.
    pub const fn builtin() -> Self {
        Self::builtin_for(INTERNAL_SYMBOLS)
    }

    /// Same as [`Config::builtin`], for a logger embedded in some other
    /// machinery whose frames must be skipped too.
    pub const fn builtin_for(internal_symbols: &'static [&'static str]) -> Self {
        Self {
            path_prefix:    Cow::Borrowed(BUILD_PATH_PREFIX),
            max_depth:      DEFAULT_MAX_DEPTH,
            skip_frames:    1,
            internal_symbols,
            report_at_exit: true,
            report_file:    None,
            violation:      Violation::Warn,
            process_wide:   true,
            read_env:       true,
        }
    }

    /// A self-contained configuration: no environment, no exit report, not
    /// registered as the process log.
    pub const fn scoped(path_prefix: &'static str) -> Self {
        Self {
            path_prefix:    Cow::Borrowed(path_prefix),
            max_depth:      DEFAULT_MAX_DEPTH,
            skip_frames:    1,
            internal_symbols: INTERNAL_SYMBOLS,
            report_at_exit: false,
            report_file:    None,
            violation:      Violation::Warn,
            process_wide:   false,
            read_env:       false,
        }
    }

    pub fn with_skip(mut self, skip_frames: usize) -> Self {
        self.skip_frames = skip_frames;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_violation(mut self, violation: Violation) -> Self {
        self.violation = violation;
        self
    }

    /// Applies the environment overrides, if enabled. Bad values are
    /// reported and leave the corresponding setting untouched.
    pub fn resolve(self) -> (Self, Vec<ConfigError>) {
        if self.read_env {
            self.overridden_by(|var| env::var(var).ok())
        } else {
            (self, vec![])
        }
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn overridden_by<F>(mut self, lookup: F) -> (Self, Vec<ConfigError>)
    where F: Fn(&str) -> Option<String> {
        let mut errors = vec![];

        if let Some(prefix) = lookup(PATH_VAR) {
            self.path_prefix = Cow::Owned(prefix);
        }
        if let Some(value) = lookup(DEPTH_VAR) {
            match parse_count(DEPTH_VAR, value) {
                Ok(0)       => errors.push(ConfigError::Invalid {
                    var:        DEPTH_VAR,
                    value:      "0".to_string(),
                    expected:   "a positive integer",
                }),
                Ok(depth)   => self.max_depth = depth,
                Err(e)      => errors.push(e),
            }
        }
        if let Some(value) = lookup(SKIP_VAR) {
            match parse_count(SKIP_VAR, value) {
                Ok(skip)    => self.skip_frames = skip,
                Err(e)      => errors.push(e),
            }
        }
        if let Some(value) = lookup(EXIT_VAR) {
            match parse_switch(EXIT_VAR, value) {
                Ok(on)      => self.report_at_exit = on,
                Err(e)      => errors.push(e),
            }
        }
        if let Some(path) = lookup(FILE_VAR) {
            self.report_file = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        if let Some(value) = lookup(STRICT_VAR) {
            match parse_switch(STRICT_VAR, value) {
                Ok(true)    => self.violation = Violation::Abort,
                Ok(false)   => {},
                Err(e)      => errors.push(e),
            }
        }

        (self, errors)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::builtin()
    }
}

fn parse_count(var: &'static str, value: String) -> Result<usize, ConfigError> {
    value.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { var, value, expected: "a non-negative integer" })
}

fn parse_switch(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on"     => Ok(true),
        "0" | "false" | "no" | "off"    => Ok(false),
        _                               => Err(ConfigError::Invalid { var, value, expected: "one of 0/1/true/false" }),
    }
}
