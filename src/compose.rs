//! Compose file discovery inside a stack directory

use glob::{MatchOptions, Pattern};
use std::path::{Path, PathBuf};
use tracing::debug;

/// File names tried in order before falling back to a pattern search
pub const COMPOSE_CANDIDATES: [&str; 4] = [
    "docker-compose.yaml",
    "docker-compose.yml",
    "compose.yaml",
    "compose.yml",
];

/// Fallback pattern for compose file names
pub const COMPOSE_PATTERN: &str = "*compose.y*ml";

/// Shell-glob rules: `*` stays inside the file name and skips dotfiles
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// Find the compose file of a stack directory.
///
/// The fixed candidates win in order. Otherwise any regular file whose
/// name matches `*compose.y*ml` is accepted; matches are sorted by name
/// so the choice does not depend on directory enumeration order.
/// Returns `None` when nothing matches, including when `dir` does not
/// exist.
pub fn locate(dir: &Path) -> Option<PathBuf> {
    debug!(dir = %dir.display(), "Looking for compose file");

    for name in COMPOSE_CANDIDATES {
        let candidate = dir.join(name);
        if candidate.is_file() {
            debug!(file = %candidate.display(), "Found compose file");
            return Some(candidate);
        }
    }

    let pattern = match Pattern::new(COMPOSE_PATTERN) {
        Ok(pattern) => pattern,
        Err(e) => {
            debug!(pattern = COMPOSE_PATTERN, error = %e, "Invalid compose pattern");
            return None;
        }
    };

    // Names are matched per entry so glob metacharacters in `dir` stay literal
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "Cannot read stack directory");
            return None;
        }
    };

    let mut matches: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| pattern.matches_with(name, MATCH_OPTIONS))
                .unwrap_or(false)
        })
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    matches.sort();

    debug!(dir = %dir.display(), count = matches.len(), "Pattern search finished");
    matches.into_iter().next()
}
