//! Command line and config file handling
//!
//! Values come from an optional TOML file; any flag given on the command line
//! replaces the file's value.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use regex::Regex;
use serde::{Deserialize, Serialize};

use kubesnap_discovery::{FilterOptions, RunPlan};

/// Kubesnap - Snapshot every resource a Kubernetes cluster exposes
#[derive(Parser, Debug, Default)]
#[command(name = "kubesnap")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML config file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Kubernetes context name (defaults to the current context)
    #[arg(long)]
    pub context: Option<String>,

    /// Directory the timestamped snapshot is created in
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Regex selecting the namespaces to query
    #[arg(long, value_name = "REGEX")]
    pub namespaces: Option<String>,

    /// Label selector applied to every list call
    #[arg(long)]
    pub label_selector: Option<String>,

    /// Only query these resources (plural names, comma separated)
    #[arg(long, value_delimiter = ',')]
    pub resources: Option<Vec<String>>,

    /// Number of queries run at once within a pass
    #[arg(long)]
    pub parallelism: Option<usize>,

    /// Give up on a single query after this many seconds
    #[arg(long, value_name = "SECS")]
    pub query_timeout_secs: Option<u64>,

    /// Do not gather container logs
    #[arg(long)]
    pub skip_pod_logs: bool,

    /// Do not gather node configz/healthz
    #[arg(long)]
    pub skip_host_data: bool,

    /// Default log filter, overridden by RUST_LOG
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Effective configuration of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub context: Option<String>,
    pub output_dir: PathBuf,
    pub namespaces: String,
    pub filters: FilterOptions,
    pub parallelism: usize,
    pub query_timeout_secs: Option<u64>,
    pub skip_pod_logs: bool,
    pub skip_host_data: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            context: None,
            output_dir: PathBuf::from("."),
            namespaces: ".*".to_string(),
            filters: FilterOptions::default(),
            parallelism: 1,
            query_timeout_secs: None,
            skip_pod_logs: false,
            skip_host_data: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Read a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// File values (or defaults) with the command line applied on top
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply(args);
        Ok(config)
    }

    fn apply(&mut self, args: &Args) {
        if let Some(context) = &args.context {
            self.context = Some(context.clone());
        }
        if let Some(dir) = &args.output_dir {
            self.output_dir = dir.clone();
        }
        if let Some(namespaces) = &args.namespaces {
            self.namespaces = namespaces.clone();
        }
        if let Some(selector) = &args.label_selector {
            self.filters.label_selector = selector.clone();
        }
        if let Some(resources) = &args.resources {
            self.filters.resources = resources.clone();
        }
        if let Some(parallelism) = args.parallelism {
            self.parallelism = parallelism;
        }
        if let Some(secs) = args.query_timeout_secs {
            self.query_timeout_secs = Some(secs);
        }
        self.skip_pod_logs |= args.skip_pod_logs;
        self.skip_host_data |= args.skip_host_data;
        if let Some(level) = &args.log_level {
            self.log_level = level.clone();
        }
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_secs.map(Duration::from_secs)
    }

    pub fn run_plan(&self) -> Result<RunPlan> {
        let pattern = Regex::new(&self.namespaces)
            .with_context(|| format!("Invalid namespace pattern: {}", self.namespaces))?;
        let mut plan = RunPlan::new(self.filters.clone(), pattern);
        plan.pod_logs = !self.skip_pod_logs;
        plan.host_data = !self.skip_host_data;
        Ok(plan)
    }
}
