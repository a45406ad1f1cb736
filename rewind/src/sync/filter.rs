//! rsync-style exclude patterns for the native backend.
//!
//! A pattern without a leading `/` matches at any depth; a leading `/`
//! anchors it to the transfer root; a trailing `/` restricts it to
//! directories.

use globset::{GlobBuilder, GlobMatcher};
use std::path::Path;

use super::SyncError;

#[derive(Debug, Clone)]
struct ExcludeRule {
    directory_only: bool,
    matchers: Vec<GlobMatcher>,
}

#[derive(Debug, Clone, Default)]
pub struct ExcludeRules {
    rules: Vec<ExcludeRule>,
}

impl ExcludeRules {
    pub fn add(&mut self, pattern: &str) -> Result<(), SyncError> {
        let anchored = pattern.starts_with('/');
        let directory_only = pattern.ends_with('/') && pattern.len() > 1;
        let core = pattern.trim_start_matches('/').trim_end_matches('/');
        if core.is_empty() {
            return Err(invalid(pattern, "empty pattern"));
        }

        let mut globs = vec![core.to_string()];
        if !anchored {
            globs.push(format!("**/{}", core));
        }

        let mut matchers = Vec::with_capacity(globs.len());
        for glob in globs {
            let compiled = GlobBuilder::new(&glob)
                .literal_separator(true)
                .backslash_escape(true)
                .build()
                .map_err(|e| invalid(pattern, &e.to_string()))?;
            matchers.push(compiled.compile_matcher());
        }

        self.rules.push(ExcludeRule {
            directory_only,
            matchers,
        });
        Ok(())
    }

    /// `relative` is relative to the transfer root.
    pub fn is_excluded(&self, relative: &Path, is_dir: bool) -> bool {
        self.rules.iter().any(|rule| {
            (!rule.directory_only || is_dir) && rule.matchers.iter().any(|m| m.is_match(relative))
        })
    }
}

fn invalid(pattern: &str, reason: &str) -> SyncError {
    SyncError::UnsupportedOption {
        backend: "native".to_string(),
        option: format!("--exclude={} ({})", pattern, reason),
    }
}
