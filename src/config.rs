use anyhow::{Context, Result, bail};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::cli::{Cli, Rule};
use crate::oracle::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifierInput {
    List(PathBuf),
    SourceTree(PathBuf),
}

/// Everything a run needs, resolved and validated once before any work starts.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub age_limit_days: u32,
    pub frequency_threshold: u64,
    pub rules: BTreeSet<Rule>,
    pub store_path: PathBuf,
    pub input: IdentifierInput,
    pub output_dir: PathBuf,
    pub dictionary: Option<PathBuf>,
    pub language: String,
    pub token: Option<String>,
    pub retry: RetryPolicy,
    pub verbose: bool,
}

impl RunConfig {
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let rules: BTreeSet<Rule> = cli.rules.iter().copied().collect();
        if rules.is_empty() {
            bail!("No rules requested");
        }

        let store_path = resolve_store_path(cli)?;
        if cli.store.is_some() && !store_path.is_file() {
            bail!("Frequency store not found: {}", store_path.display());
        }

        let input = match (&cli.identifiers, &cli.source) {
            (Some(list), _) => {
                if !list.is_file() {
                    bail!("Identifier list not found: {}", list.display());
                }
                IdentifierInput::List(list.clone())
            }
            (None, Some(tree)) => {
                if !tree.is_dir() {
                    bail!("Source tree not found: {}", tree.display());
                }
                IdentifierInput::SourceTree(tree.clone())
            }
            (None, None) => bail!(
                "No identifiers given: pass --identifiers FILE or --source DIR (fetching the source tree is not supported)"
            ),
        };

        if let Some(dict) = &cli.dictionary
            && !dict.is_file()
        {
            bail!("Dictionary not found: {}", dict.display());
        }

        let token = cli
            .github_token
            .clone()
            .filter(|t| !t.trim().is_empty());
        let config = Self {
            age_limit_days: cli.age_limit,
            frequency_threshold: cli.threshold,
            rules,
            store_path,
            input,
            output_dir: cli.output_dir.clone(),
            dictionary: cli.dictionary.clone(),
            language: cli.language.clone(),
            token,
            retry: RetryPolicy::default(),
            verbose: cli.verbose,
        };

        if config.needs_frequencies() && config.token.is_none() {
            bail!("GITHUB_TOKEN is required to query code-search frequencies for rules 933150/933151");
        }

        Ok(config)
    }

    pub fn wants(&self, rule: Rule) -> bool {
        self.rules.contains(&rule)
    }

    pub fn needs_frequencies(&self) -> bool {
        self.rules.iter().any(|r| r.needs_frequencies())
    }

    pub fn ensure_output_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.output_dir).with_context(|| {
            format!(
                "Failed to create output directory: {}",
                self.output_dir.display()
            )
        })
    }
}

pub fn resolve_store_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(p) = cli.store.clone() {
        return Ok(p);
    }
    Ok(classifier_home()?.join("frequencies.txt"))
}

pub fn clear_store(store_path: &Path) -> Result<bool> {
    if !store_path.exists() {
        return Ok(false);
    }
    std::fs::remove_file(store_path).with_context(|| {
        format!("Failed to remove frequency store: {}", store_path.display())
    })?;
    Ok(true)
}

fn classifier_home() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::cache_dir)
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow::anyhow!("Failed to resolve data directory"))?;
    Ok(base.join("function-classifier"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["function-classifier", "--github-token", ""];
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    #[test]
    fn missing_token_is_fatal_when_frequencies_are_needed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ids = dir.path().join("ids.txt");
        std::fs::write(&ids, "strlen\n")?;

        let err = RunConfig::resolve(&cli(&["--identifiers", ids.to_str().unwrap()])).unwrap_err();
        assert!(err.to_string().contains("GITHUB_TOKEN"));
        Ok(())
    }

    #[test]
    fn word_rule_alone_needs_no_token() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ids = dir.path().join("ids.txt");
        std::fs::write(&ids, "strlen\n")?;

        let config = RunConfig::resolve(&cli(&[
            "--identifiers",
            ids.to_str().unwrap(),
            "--rules",
            "933161",
        ]))?;
        assert!(!config.needs_frequencies());
        assert!(config.wants(Rule::Words));
        assert_eq!(config.input, IdentifierInput::List(ids));
        Ok(())
    }

    #[test]
    fn explicit_store_must_exist() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ids = dir.path().join("ids.txt");
        std::fs::write(&ids, "strlen\n")?;
        let missing = dir.path().join("nope.txt");

        let err = RunConfig::resolve(&cli(&[
            "--identifiers",
            ids.to_str().unwrap(),
            "--store",
            missing.to_str().unwrap(),
            "--rules",
            "933161",
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("Frequency store not found"));
        Ok(())
    }

    #[test]
    fn identifiers_or_source_is_required() {
        let err = RunConfig::resolve(&cli(&["--rules", "933161"])).unwrap_err();
        assert!(err.to_string().contains("No identifiers given"));
    }
}
