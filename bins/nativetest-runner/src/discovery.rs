// Test container discovery: one test case per matching executable
use anyhow::{Context, Result};
use nativetest_common::host::{MessageLevel, MessageLogger};
use nativetest_common::types::TestCase;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Does the file name of `path` match the executable pattern?
pub fn is_test_executable(path: &Path, pattern: &Regex) -> bool {
    let Some(file_name) = path.file_name() else {
        return false;
    };
    let matches = pattern.is_match(&file_name.to_string_lossy());
    debug!(
        path = %path.display(),
        pattern = %pattern,
        matches,
        "Checked test container candidate"
    );
    matches
}

/// Build one TestCase per source that matches `pattern`.
///
/// The test case is named after the file stem of its container.
pub fn discover<L>(sources: &[PathBuf], pattern: &Regex, logger: &L) -> Vec<TestCase>
where
    L: MessageLogger + ?Sized,
{
    let tests: Vec<TestCase> = sources
        .iter()
        .filter(|source| is_test_executable(source, pattern))
        .filter_map(|source| {
            let name = source.file_stem()?.to_string_lossy().into_owned();
            Some(TestCase::new(name, source.clone()))
        })
        .collect();

    logger.send_message(
        MessageLevel::Informational,
        &format!(
            "Discovered {} test container(s) among {} source(s)",
            tests.len(),
            sources.len()
        ),
    );

    tests
}

/// Expand CLI paths: files are kept, directories contribute their direct
/// children (sorted, not recursive).
pub fn expand_sources(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut sources = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries = Vec::new();
            for entry in fs::read_dir(path)
                .with_context(|| format!("Failed to read directory {}", path.display()))?
            {
                let entry = entry
                    .with_context(|| format!("Failed to read entry in {}", path.display()))?;
                let entry_path = entry.path();
                if entry_path.is_file() {
                    entries.push(entry_path);
                }
            }
            entries.sort();
            sources.extend(entries);
        } else {
            sources.push(path.clone());
        }
    }
    Ok(sources)
}
