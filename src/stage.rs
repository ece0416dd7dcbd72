//! Transform stages and the helpers they share for reading source sets.

use std::collections::HashSet;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};
use serde::Serialize;

use crate::executor::TaskContext;

/// A unit of work over artifact sets.
///
/// A stage declares which paths it reads and which it writes, and turns its
/// inputs into outputs when run. Stages communicate only through the
/// filesystem, so a stage that depends on another one reads what the other
/// wrote.
pub trait TransformStage: Send + Sync {
    /// Files or directories this stage reads.
    fn inputs(&self) -> Vec<Utf8PathBuf>;

    /// Files or directories this stage writes.
    fn outputs(&self) -> Vec<Utf8PathBuf>;

    fn run(&self, ctx: &TaskContext) -> anyhow::Result<StageOutput>;
}

/// What a stage produced.
#[derive(Debug, Default, Clone, Serialize)]
pub struct StageOutput {
    /// Files written, relative to the project root.
    pub written: Vec<Utf8PathBuf>,
    /// Non-fatal per-item problems, the item was passed through or skipped.
    pub warnings: Vec<String>,
}

impl StageOutput {
    pub fn written(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.written.push(path.into());
        self
    }

    pub fn extend(&mut self, other: StageOutput) {
        self.written.extend(other.written);
        self.warnings.extend(other.warnings);
    }
}

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

pub(crate) fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// The leading part of `pattern` free of glob syntax.
pub fn glob_base(pattern: &str) -> Utf8PathBuf {
    pattern
        .split('/')
        .take_while(|part| !is_glob(part))
        .collect()
}

/// Expands `patterns` below `root` into root-relative file paths.
///
/// The order of `patterns` is preserved. A glob pattern expands to its
/// matches in sorted path order, a literal entry must name an existing file.
/// A path matched by several entries appears once, at its first position.
pub fn expand_ordered(root: &Utf8Path, patterns: &[String]) -> anyhow::Result<Vec<Utf8PathBuf>> {
    let mut seen = HashSet::new();
    let mut paths = Vec::new();

    for pattern in patterns {
        let mut matches = if is_glob(pattern) {
            let full = root.join(pattern);
            let mut found = Vec::new();

            for entry in glob::glob_with(full.as_str(), MATCH)? {
                let path = Utf8PathBuf::try_from(entry?)?;
                if path.is_file() {
                    found.push(path.strip_prefix(root)?.to_owned());
                }
            }

            found.sort();
            found
        } else {
            let path = Utf8PathBuf::from(pattern);
            if !root.join(&path).is_file() {
                anyhow::bail!("'{}' does not exist", root.join(&path));
            }
            vec![path]
        };

        matches.retain(|path| seen.insert(path.clone()));
        paths.append(&mut matches);
    }

    Ok(paths)
}

/// Whether `path` (root-relative) is matched by any of `patterns`.
pub fn matches_any(patterns: &[String], path: &Utf8Path) -> bool {
    patterns.iter().any(|pattern| {
        Pattern::new(pattern)
            .map(|p| p.matches_with(path.as_str(), MATCH))
            .unwrap_or(false)
    })
}
