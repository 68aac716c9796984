//! Source-change trigger
//!
//! [`WatchSet`] turns the configured globs into concrete directories to watch
//! plus a matcher for event paths; [`detector::ChangeTrigger`] consumes file
//! system events and turns every content modification into a broadcast update.

pub mod detector;

pub use detector::{ChangeTrigger, TriggerHandle};

use globset::{GlobBuilder, GlobMatcher};
use notify::event::ModifyKind;
use notify::{EventKind, RecursiveMode};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::error::{OtaError, OtaResult};

const GLOB_META: [char; 4] = ['*', '?', '[', '{'];

#[derive(Debug)]
enum Selector {
    Exact(PathBuf),
    Glob { root: PathBuf, matcher: GlobMatcher },
}

/// Resolved watch configuration
#[derive(Debug)]
pub struct WatchSet {
    selectors: Vec<Selector>,
    roots: BTreeMap<PathBuf, RecursiveMode>,
    exclude: Vec<String>,
}

impl WatchSet {
    /// Resolve patterns against the file system. A pattern whose literal
    /// prefix is missing, or that is not a valid glob, is skipped with a
    /// warning; resolution fails only when no pattern is usable.
    pub fn resolve(patterns: &[String], exclude: &[String]) -> OtaResult<Self> {
        let mut set = Self {
            selectors: Vec::with_capacity(patterns.len()),
            roots: BTreeMap::new(),
            exclude: exclude.to_vec(),
        };
        let mut last_err = None;

        for pattern in patterns {
            if let Err(e) = set.add_pattern(pattern) {
                tracing::warn!(%pattern, error = %e, "skipping watch pattern");
                last_err = Some(e);
            }
        }

        if set.selectors.is_empty() {
            return Err(last_err.unwrap_or_else(|| OtaError::WatchSetup {
                path: String::new(),
                reason: "no watch patterns configured".into(),
            }));
        }
        Ok(set)
    }

    fn add_pattern(&mut self, pattern: &str) -> OtaResult<()> {
        let setup_err = |reason: String| OtaError::WatchSetup {
            path: pattern.to_string(),
            reason,
        };
        let (base, rest) = split_glob(pattern);
        let base = base
            .canonicalize()
            .map_err(|e| setup_err(format!("{}: {e}", base.display())))?;

        match rest {
            None => {
                let parent = base
                    .parent()
                    .ok_or_else(|| setup_err("file has no parent directory".into()))?
                    .to_path_buf();
                self.roots.entry(parent).or_insert(RecursiveMode::NonRecursive);
                self.selectors.push(Selector::Exact(base));
            }
            Some(rest) => {
                let matcher = GlobBuilder::new(&rest)
                    .literal_separator(true)
                    .build()
                    .map_err(|e| setup_err(e.to_string()))?
                    .compile_matcher();
                self.roots.insert(base.clone(), RecursiveMode::Recursive);
                self.selectors.push(Selector::Glob { root: base, matcher });
            }
        }
        Ok(())
    }

    /// Directories to register with the file system watcher
    pub fn roots(&self) -> impl Iterator<Item = (&Path, RecursiveMode)> {
        self.roots.iter().map(|(path, mode)| (path.as_path(), *mode))
    }

    pub fn matches(&self, path: &Path) -> bool {
        if !is_trackable(path, &self.exclude) {
            return false;
        }

        self.selectors.iter().any(|selector| match selector {
            Selector::Exact(file) => path == file,
            Selector::Glob { root, matcher } => path
                .strip_prefix(root)
                .map(|relative| matcher.is_match(relative))
                .unwrap_or(false),
        })
    }
}

/// Split a pattern into its literal directory prefix and the glob remainder.
/// A pattern without glob characters yields no remainder.
fn split_glob(pattern: &str) -> (PathBuf, Option<String>) {
    let mut base = PathBuf::new();
    let mut rest: Vec<String> = Vec::new();

    for component in Path::new(pattern).components() {
        let text = component.as_os_str().to_string_lossy();
        if rest.is_empty() && !text.contains(GLOB_META) {
            base.push(component);
        } else {
            rest.push(text.into_owned());
        }
    }

    if base.as_os_str().is_empty() {
        base.push(".");
    }
    if rest.is_empty() {
        (base, None)
    } else {
        (base, Some(rest.join("/")))
    }
}

/// Only content modifications produce updates; creates, deletes, renames and
/// metadata changes are ignored.
pub fn is_content_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any)
    )
}

fn is_trackable(path: &Path, exclude: &[String]) -> bool {
    for component in path.components() {
        if let Component::Normal(seg) = component {
            if let Some(segment) = seg.to_str() {
                if exclude.iter().any(|needle| needle.eq_ignore_ascii_case(segment)) {
                    return false;
                }
            }
        }
    }

    true
}
