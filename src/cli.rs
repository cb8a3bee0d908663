use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "function-classifier")]
#[command(about = "Classify PHP function names into WAF rule data files")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Frequency store file (`identifier count date` per line)
    #[arg(long, value_name = "FILE")]
    pub store: Option<PathBuf>,

    /// Checked-out PHP source tree to extract function names from
    #[arg(long, value_name = "DIR")]
    pub source: Option<PathBuf>,

    /// Newline-separated identifier list, used instead of scanning --source
    #[arg(long, value_name = "FILE")]
    pub identifiers: Option<PathBuf>,

    #[arg(short = 'o', long, value_name = "DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Days after which a cached frequency is refreshed
    #[arg(long, value_name = "DAYS", default_value_t = 30)]
    pub age_limit: u32,

    /// Counts above this go to 933150, the rest to 933151
    #[arg(long, value_name = "N", default_value_t = 90000)]
    pub threshold: u64,

    #[arg(
        long,
        value_enum,
        value_delimiter = ',',
        default_values_t = [Rule::Frequent, Rule::Rare, Rule::Words]
    )]
    pub rules: Vec<Rule>,

    /// Word list to use instead of the `spell` tool
    #[arg(long, value_name = "FILE")]
    pub dictionary: Option<PathBuf>,

    #[arg(long, value_name = "NAME", default_value = "php")]
    pub language: String,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    #[arg(short = 'v', long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Classify identifiers and write the rule data files (default)
    Run,
    /// Print frequency store statistics
    Stats,
    /// Delete the frequency store
    Clear,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Serialize)]
pub enum Rule {
    /// Common non-word function names
    #[value(name = "933150")]
    #[serde(rename = "933150")]
    Frequent,
    /// Rare non-word function names
    #[value(name = "933151")]
    #[serde(rename = "933151")]
    Rare,
    /// Function names that are also English words
    #[value(name = "933161")]
    #[serde(rename = "933161")]
    Words,
}

impl Rule {
    pub fn id(self) -> &'static str {
        match self {
            Rule::Frequent => "933150",
            Rule::Rare => "933151",
            Rule::Words => "933161",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Rule::Frequent => "933150.data",
            Rule::Rare => "933151.data",
            Rule::Words => "933161.ra",
        }
    }

    pub fn needs_frequencies(self) -> bool {
        matches!(self, Rule::Frequent | Rule::Rare)
    }
}
