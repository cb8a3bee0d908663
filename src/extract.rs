use anyhow::{Context, Result};
use ignore::WalkBuilder;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;

const FUNCTION_MACRO: &str =
    r"\b(?:PHP_FUNCTION|ZEND_FUNCTION|PHP_FALIAS|ZEND_FALIAS|PHP_DEP_FALIAS)\(\s*([A-Za-z_][A-Za-z0-9_]*)";

/// Reads a newline-separated identifier list, deduplicated and sorted.
pub fn read_identifier_list(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read identifier list: {}", path.display()))?;
    Ok(normalize(text.lines()))
}

/// Greps C sources under `root` for function definition macros.
pub fn scan_source_tree(root: &Path) -> Result<Vec<String>> {
    if !root.is_dir() {
        anyhow::bail!("Source tree is not a directory: {}", root.display());
    }
    let pattern = Regex::new(FUNCTION_MACRO)?;

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build();

    let mut found = BTreeSet::new();
    let mut files = 0usize;
    for entry in walker {
        let Ok(entry) = entry else {
            continue;
        };
        let path = entry.path();
        if !path.extension().is_some_and(|e| e == "c" || e == "h") {
            continue;
        }
        let Ok(bytes) = std::fs::read(path) else {
            tracing::debug!(path = %path.display(), "skipping unreadable source file");
            continue;
        };
        files += 1;
        let text = String::from_utf8_lossy(&bytes);
        for caps in pattern.captures_iter(&text) {
            found.insert(caps[1].to_string());
        }
    }

    tracing::info!(
        root = %root.display(),
        files,
        identifiers = found.len(),
        "scanned source tree"
    );
    Ok(found.into_iter().collect())
}

fn normalize<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    lines
        .into_iter()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
