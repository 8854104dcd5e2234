// SPDX-License-Identifier: AGPL-3.0

//! Logging for the exploration loop: colored, deduplicated human-facing
//! lines routed through `tracing` so the CLI's `EnvFilter` governs what
//! actually reaches the terminal. Every line can be tagged with the id of
//! the path that produced it, since `PathGroup` interleaves many paths'
//! output and an untagged line is ambiguous about which one it came from.

use colored::*;
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::Mutex;

/// Base URL for this project's warning-code reference pages.
pub const WARNINGS_BASE_URL: &str = "https://github.com/symex-rs/symex/wiki/warnings";

/// Error codes surfaced in warnings, one per `symex_exceptions::SymError`
/// variant plus a budget-exhaustion code for the explorer's own limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    UnsupportedAst,
    TypeClash,
    SymbolicConstraintMissing,
    ArityError,
    SolverError,
    Internal,
    Budget,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCode::UnsupportedAst => "unsupported-ast",
            ErrorCode::TypeClash => "type-clash",
            ErrorCode::SymbolicConstraintMissing => "symbolic-constraint-missing",
            ErrorCode::ArityError => "arity-error",
            ErrorCode::SolverError => "solver-error",
            ErrorCode::Internal => "internal-error",
            ErrorCode::Budget => "budget-exceeded",
        }
    }

    pub fn url(&self) -> String {
        format!("{}#{}", WARNINGS_BASE_URL, self.code())
    }
}

/// Logger state for tracking unique messages, keyed on the fully tagged
/// (path-prefixed) text so the same message on two different paths is not
/// treated as a duplicate of itself.
static UNIQUE_MESSAGES: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

fn is_logged(message: &str) -> bool {
    let messages = UNIQUE_MESSAGES.lock().unwrap();
    messages.contains(message)
}

fn mark_logged(message: &str) {
    let mut messages = UNIQUE_MESSAGES.lock().unwrap();
    messages.insert(message.to_string());
}

fn tag(path_id: Option<u64>, text: &str) -> String {
    match path_id {
        Some(id) => format!("[path {id}] {text}"),
        None => text.to_string(),
    }
}

/// Logs a debug-level message, optionally tagged with a path id.
pub fn debug(path_id: Option<u64>, text: &str, allow_duplicate: bool) {
    let tagged = tag(path_id, text);
    if allow_duplicate || !is_logged(&tagged) {
        tracing::debug!("{}", tagged.dimmed());
        if !allow_duplicate {
            mark_logged(&tagged);
        }
    }
}

/// Logs an info-level message, optionally tagged with a path id.
pub fn info(path_id: Option<u64>, text: &str, allow_duplicate: bool) {
    let tagged = tag(path_id, text);
    if allow_duplicate || !is_logged(&tagged) {
        tracing::info!("{}", tagged);
        if !allow_duplicate {
            mark_logged(&tagged);
        }
    }
}

/// Logs a warning, optionally tagged with a path id.
pub fn warn(path_id: Option<u64>, text: &str, allow_duplicate: bool) {
    let tagged = tag(path_id, text);
    if allow_duplicate || !is_logged(&tagged) {
        tracing::warn!("{}", tagged.yellow());
        if !allow_duplicate {
            mark_logged(&tagged);
        }
    }
}

/// Logs an error, optionally tagged with a path id.
pub fn error(path_id: Option<u64>, text: &str, allow_duplicate: bool) {
    let tagged = tag(path_id, text);
    if allow_duplicate || !is_logged(&tagged) {
        tracing::error!("{}", tagged.red());
        if !allow_duplicate {
            mark_logged(&tagged);
        }
    }
}

/// Logs a debug message exactly once, regardless of path id.
pub fn debug_once(text: &str) {
    debug(None, text, false);
}

/// Logs a warning carrying an `ErrorCode`'s reference link.
pub fn warn_code(path_id: Option<u64>, error_code: ErrorCode, msg: &str, allow_duplicate: bool) {
    let full_msg = format!("{}\n(see {})", msg, error_code.url());
    warn(path_id, &full_msg, allow_duplicate);
}

/// Logs a warning exactly once, regardless of path id.
pub fn warn_unique(text: &str) {
    warn(None, text, false);
}

/// Clears all logged messages. Exposed for test isolation across runs that
/// reuse the same process (the dedup set is otherwise process-global).
pub fn clear_logged_messages() {
    let mut messages = UNIQUE_MESSAGES.lock().unwrap();
    messages.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_url_contains_its_code() {
        let code = ErrorCode::Budget;
        assert_eq!(code.code(), "budget-exceeded");
        assert!(code.url().contains("budget-exceeded"));
        assert!(code.url().starts_with(WARNINGS_BASE_URL));
    }

    #[test]
    fn every_error_code_has_a_non_empty_url() {
        let codes = [
            ErrorCode::UnsupportedAst,
            ErrorCode::TypeClash,
            ErrorCode::SymbolicConstraintMissing,
            ErrorCode::ArityError,
            ErrorCode::SolverError,
            ErrorCode::Internal,
            ErrorCode::Budget,
        ];
        for code in codes {
            assert!(!code.code().is_empty());
            assert!(code.url().contains(code.code()));
        }
    }

    #[test]
    fn same_text_on_different_paths_is_not_deduped_against_itself() {
        clear_logged_messages();
        let msg = "unbound name `x`";
        assert!(!is_logged(&tag(Some(1), msg)));

        debug(Some(1), msg, false);
        assert!(is_logged(&tag(Some(1), msg)));
        assert!(!is_logged(&tag(Some(2), msg)), "path 2's tagged text is a different dedup key");

        debug(Some(2), msg, false);
        assert!(is_logged(&tag(Some(2), msg)));

        clear_logged_messages();
        assert!(!is_logged(&tag(Some(1), msg)));
    }

    #[test]
    fn debug_once_does_not_log_twice() {
        clear_logged_messages();
        let msg = "debug once message";
        debug_once(msg);
        assert!(is_logged(msg));
        debug_once(msg);
    }

    #[test]
    fn allow_duplicate_skips_dedup_tracking() {
        clear_logged_messages();
        let msg = "duplicate message";
        info(None, msg, true);
        assert!(!is_logged(msg), "allow_duplicate=true must not be tracked");
        info(None, msg, false);
        assert!(is_logged(msg));
    }

    #[test]
    fn warn_code_does_not_panic() {
        clear_logged_messages();
        warn_code(Some(3), ErrorCode::Internal, "unwind past an empty call stack", true);
    }
}
