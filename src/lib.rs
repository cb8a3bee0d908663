//! # function-classifier
//!
//! Sorts PHP function names into the data files of three WAF rules.
//!
//! ## Architecture
//!
//! - **store**: Persistent, sorted text store of code-search frequencies with age-based staleness
//! - **oracle**: GitHub code-search client and the retry/rate-limit policy around it
//! - **classifier**: Dictionary word detection via `spell` or a word list
//! - **extract**: Identifier list loading and source-tree function macro grep
//! - **pipeline**: Word partition, frequency resolution, threshold bucketing and seed merging
//! - **artifacts**: Sorted, atomically replaced rule data files and the error report
//! - **workdir**: Temporary working storage removed on every exit path
//! - **config**: Resolution of CLI flags into one immutable run configuration

pub mod artifacts;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod extract;
pub mod oracle;
pub mod pipeline;
pub mod store;
pub mod workdir;
