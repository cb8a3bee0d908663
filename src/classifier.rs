//! Natural-language word detection.
//!
//! The pipeline only needs the subset of identifiers that are dictionary words.
//! `SpellCommand` delegates to the system `spell` tool, `DictionaryFile` uses a
//! plain word list.

use anyhow::{Context, Result, bail};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;

pub const SPELL_ENV: &str = "FUNCTION_CLASSIFIER_SPELL";

pub trait WordClassifier {
    /// Returns the identifiers recognised as words. Matching is case-sensitive
    /// on the original token and the result is always a subset of the input.
    fn words(&self, identifiers: &[String]) -> Result<BTreeSet<String>>;
}

#[derive(Debug, Clone)]
pub struct SpellCommand {
    program: PathBuf,
    scratch_dir: PathBuf,
}

impl SpellCommand {
    pub fn new(program: PathBuf, scratch_dir: PathBuf) -> Self {
        Self {
            program,
            scratch_dir,
        }
    }

    /// Resolves the spell program from `FUNCTION_CLASSIFIER_SPELL` or `PATH`.
    pub fn discover(scratch_dir: PathBuf) -> Result<Self> {
        let name = std::env::var(SPELL_ENV).unwrap_or_else(|_| "spell".to_string());
        let program = which::which(&name).with_context(|| {
            format!("Word classifier `{name}` not found (install spell, set {SPELL_ENV}, or pass --dictionary)")
        })?;
        Ok(Self::new(program, scratch_dir))
    }

    fn misspelled(&self, identifiers: &[String]) -> Result<HashSet<String>> {
        let input = self.scratch_dir.join("spell-input.txt");
        let mut text = identifiers.join("\n");
        text.push('\n');
        std::fs::write(&input, text)
            .with_context(|| format!("Failed to write spell input: {}", input.display()))?;

        let output = Command::new(&self.program)
            .arg(&input)
            .output()
            .with_context(|| format!("Failed to execute {}", self.program.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("spell failed: {}", stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

impl WordClassifier for SpellCommand {
    fn words(&self, identifiers: &[String]) -> Result<BTreeSet<String>> {
        if identifiers.is_empty() {
            return Ok(BTreeSet::new());
        }
        let misspelled = self.misspelled(identifiers)?;
        // spell splits on anything that is not a letter, so only purely
        // alphabetic tokens can be judged as a whole.
        Ok(identifiers
            .iter()
            .filter(|id| id.chars().all(|c| c.is_ascii_alphabetic()))
            .filter(|id| !misspelled.contains(id.as_str()))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DictionaryFile {
    words: HashSet<String>,
}

impl DictionaryFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dictionary: {}", path.display()))?;
        Ok(Self::from_words(text.lines()))
    }

    pub fn from_words<'a>(words: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            words: words
                .into_iter()
                .map(str::trim)
                .filter(|w| !w.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

impl WordClassifier for DictionaryFile {
    fn words(&self, identifiers: &[String]) -> Result<BTreeSet<String>> {
        Ok(identifiers
            .iter()
            .filter(|id| self.words.contains(id.as_str()))
            .cloned()
            .collect())
    }
}
