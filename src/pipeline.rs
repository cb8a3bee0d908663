//! Two-stage classification: dictionary words first, then code-search
//! frequency for everything else.
//!
//! Frequencies come from the persistent store when fresh, otherwise from the
//! oracle. Oracle failures never abort the run: the identifier is left out of
//! both frequency buckets and reported. Store I/O failures are fatal.

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::config::RunConfig;
use crate::oracle::FrequencyOracle;
use crate::store::FrequencyStore;

/// Always part of 933150, whatever their measured frequency.
pub const HIGH_RISK_SEEDS: &[&str] = &[
    "__halt_compiler",
    "apache_child_terminate",
    "base64_decode",
    "bzdecompress",
    "call_user_func",
    "call_user_func_array",
    "call_user_method",
    "call_user_method_array",
    "convert_uudecode",
    "create_function",
    "escapeshellarg",
    "escapeshellcmd",
    "eval",
    "exec",
    "file_get_contents",
    "file_put_contents",
    "fsockopen",
    "gzdecode",
    "gzinflate",
    "gzuncompress",
    "passthru",
    "pcntl_exec",
    "phpinfo",
    "popen",
    "proc_open",
    "readfile",
    "shell_exec",
    "str_rot13",
    "unserialize",
];

/// Short non-word names that 933161 matches although the dictionary rejects them.
pub const STRICTER_SIBLING_SEEDS: &[&str] = &[
    "abs", "chdir", "chmod", "chown", "chr", "cos", "exp", "getenv", "ini_get", "md5", "ord",
    "pi", "putenv", "sha1", "sin", "sqrt", "stat", "tan",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No record existed and the oracle gave no answer.
    Lookup,
    /// A stale record could not be refreshed and was dropped.
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionFailure {
    pub identifier: String,
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionStats {
    pub cache_hits: usize,
    pub queried: usize,
    pub refreshed: usize,
    pub dropped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub words: BTreeSet<String>,
    pub frequent: BTreeSet<String>,
    pub rare: BTreeSet<String>,
    pub failures: Vec<ResolutionFailure>,
    pub stats: ResolutionStats,
    pub frequencies_resolved: bool,
}

impl Classification {
    pub fn failed_identifiers(&self) -> BTreeSet<&str> {
        self.failures.iter().map(|f| f.identifier.as_str()).collect()
    }
}

pub struct Pipeline<'a> {
    config: &'a RunConfig,
    store: &'a mut FrequencyStore,
    oracle: &'a mut dyn FrequencyOracle,
    today: NaiveDate,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a RunConfig,
        store: &'a mut FrequencyStore,
        oracle: &'a mut dyn FrequencyOracle,
        today: NaiveDate,
    ) -> Self {
        Self {
            config,
            store,
            oracle,
            today,
        }
    }

    /// `identifiers` is the deduplicated extraction result, `words` the word
    /// classifier's answer for it.
    pub fn run(&mut self, identifiers: &[String], words: &BTreeSet<String>) -> Result<Classification> {
        let mut out = Classification::default();

        out.words = identifiers
            .iter()
            .filter(|id| words.contains(id.as_str()))
            .cloned()
            .collect();
        merge_seeds(&mut out.words, STRICTER_SIBLING_SEEDS, "933161");

        // Everything in the word list, seeds included, skips frequency resolution.
        let non_words: Vec<&String> = identifiers
            .iter()
            .filter(|id| !out.words.contains(id.as_str()))
            .collect();
        tracing::info!(
            identifiers = identifiers.len(),
            words = out.words.len(),
            non_words = non_words.len(),
            "partitioned identifiers"
        );

        if self.config.needs_frequencies() {
            out.frequencies_resolved = true;
            let total = non_words.len();
            for (idx, identifier) in non_words.into_iter().enumerate() {
                tracing::debug!(identifier, progress = idx + 1, total, "resolving frequency");
                let Some(count) = self.resolve(identifier, &mut out)? else {
                    continue;
                };
                if count > self.config.frequency_threshold {
                    out.frequent.insert(identifier.clone());
                } else {
                    out.rare.insert(identifier.clone());
                }
            }
        }

        // High-risk seeds take precedence over both the word list and 933151,
        // so every identifier ends up in exactly one bucket.
        merge_seeds(&mut out.frequent, HIGH_RISK_SEEDS, "933150");
        for seed in HIGH_RISK_SEEDS {
            if out.words.remove(*seed) {
                tracing::debug!(seed, "high-risk seed moved out of 933161");
            }
            out.rare.remove(*seed);
        }

        out.stats.failed = out.failures.len();
        Ok(out)
    }

    fn resolve(&mut self, identifier: &str, out: &mut Classification) -> Result<Option<u64>> {
        let existing = self.store.lookup(identifier).cloned();

        match existing {
            Some(record) if !record.is_stale(self.today, self.config.age_limit_days) => {
                out.stats.cache_hits += 1;
                Ok(Some(record.count))
            }
            Some(record) => {
                tracing::debug!(
                    identifier,
                    age_days = record.age_in_days(self.today),
                    "refreshing stale frequency"
                );
                match self.oracle.query(identifier) {
                    Ok(count) => {
                        self.store.upsert(identifier, count, self.today)?;
                        out.stats.refreshed += 1;
                        Ok(Some(count))
                    }
                    Err(err) => {
                        self.store.remove(identifier)?;
                        out.stats.dropped += 1;
                        tracing::error!(identifier, error = %err, "refresh failed, dropped stale record");
                        out.failures.push(ResolutionFailure {
                            identifier: identifier.to_string(),
                            kind: FailureKind::Refresh,
                            reason: err.to_string(),
                        });
                        Ok(None)
                    }
                }
            }
            None => match self.oracle.query(identifier) {
                Ok(count) => {
                    self.store.upsert(identifier, count, self.today)?;
                    out.stats.queried += 1;
                    Ok(Some(count))
                }
                Err(err) => {
                    tracing::error!(identifier, error = %err, "frequency lookup failed");
                    out.failures.push(ResolutionFailure {
                        identifier: identifier.to_string(),
                        kind: FailureKind::Lookup,
                        reason: err.to_string(),
                    });
                    Ok(None)
                }
            },
        }
    }
}

fn merge_seeds(bucket: &mut BTreeSet<String>, seeds: &[&str], rule: &str) {
    let mut added = 0usize;
    for seed in seeds {
        if bucket.insert((*seed).to_string()) {
            added += 1;
            tracing::debug!(rule, seed, "seed added");
        } else {
            tracing::debug!(rule, seed, "seed already present");
        }
    }
    tracing::info!(rule, added, present = seeds.len() - added, "merged seed list");
}
