use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::cli::Rule;
use crate::pipeline::Classification;
use crate::workdir::CleanupGuard;

pub const ERROR_REPORT_FILE: &str = "frequency-errors.txt";

pub const WORD_LIST_HEADER: &str = "\
##! Please refer to the documentation at
##! https://coreruleset.org/docs/development/regex_assembly/.

##! PHP function names that are also English words.
##! These only match when followed by an opening parenthesis,
##! which keeps false positives on plain prose low.
##! Generated by function-classifier; edit the seed list, not this file.

##!+ i
##!^ \\b
##!$ (?:\\s|/\\*.*\\*/|//.*|#.*|\\\"|')*\\(.*\\)
";

#[derive(Debug, Clone, Serialize)]
pub struct WrittenArtifact {
    pub rule: Option<Rule>,
    pub path: String,
    pub entries: usize,
}

#[derive(Debug)]
pub struct ArtifactWriter {
    output_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    pub fn path_for(&self, rule: Rule) -> PathBuf {
        self.output_dir.join(rule.file_name())
    }

    /// Writes the files for the requested rules and, when frequencies were
    /// resolved, the error report.
    pub fn write_all(
        &self,
        classification: &Classification,
        rules: &BTreeSet<Rule>,
    ) -> Result<Vec<WrittenArtifact>> {
        let mut written = Vec::new();
        for rule in rules {
            let path = self.path_for(*rule);
            let entries = match rule {
                Rule::Words => write_word_list(&path, &classification.words)?,
                Rule::Frequent => write_identifier_list(&path, &classification.frequent)?,
                Rule::Rare => write_identifier_list(&path, &classification.rare)?,
            };
            tracing::info!(rule = rule.id(), path = %path.display(), entries, "wrote rule data");
            written.push(WrittenArtifact {
                rule: Some(*rule),
                path: path.to_string_lossy().to_string(),
                entries,
            });
        }

        if classification.frequencies_resolved {
            let path = self.output_dir.join(ERROR_REPORT_FILE);
            let entries = write_error_report(&path, &classification.failed_identifiers())?;
            written.push(WrittenArtifact {
                rule: None,
                path: path.to_string_lossy().to_string(),
                entries,
            });
        }

        Ok(written)
    }
}

pub fn write_word_list(path: &Path, words: &BTreeSet<String>) -> Result<usize> {
    let mut content = String::from(WORD_LIST_HEADER);
    content.push('\n');
    content.push_str(&join_lines(words.iter().map(String::as_str)));
    replace_file(path, &content)?;
    Ok(words.len())
}

pub fn write_identifier_list(path: &Path, identifiers: &BTreeSet<String>) -> Result<usize> {
    replace_file(path, &join_lines(identifiers.iter().map(String::as_str)))?;
    Ok(identifiers.len())
}

pub fn write_error_report(path: &Path, failed: &BTreeSet<&str>) -> Result<usize> {
    replace_file(path, &join_lines(failed.iter().copied()))?;
    Ok(failed.len())
}

fn join_lines<'a>(lines: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn replace_file(path: &Path, content: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;

    let mut temp = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
    let _guard = CleanupGuard::register(temp.path().to_path_buf());
    temp.write_all(content.as_bytes())?;
    temp.persist(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
