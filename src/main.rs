//! `emgr`: inspect execution manager configurations.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::warn;

use emgr_config::{CollectorSpec, EmOptions, Properties};
use emgr_jit::DynamicJitLoader;
use emgr_runtime::{EngineLayout, ExecutionManager};

#[derive(Parser)]
#[command(name = "emgr", version, about = "Adaptive execution manager tooling")]
struct Args {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load every JIT of a configuration and print the resulting chains
    Check {
        config: PathBuf,

        /// Print the layout as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print effective options and collector parameters without loading JITs
    Options { config: PathBuf },
}

/// Configuration as the manager would read it, before any JIT is loaded.
#[derive(Serialize)]
struct OptionsReport {
    options: EmOptions,
    collectors: Vec<CollectorSpec>,
    rejected: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.verbose {
        emgr_utils::init_logging_with("emgr=debug");
    } else {
        emgr_utils::init_logging();
    }

    match args.command {
        Command::Check { config, json } => {
            let layout = check(&config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&layout)?);
            } else {
                let mut text = String::new();
                render(&layout, &mut text)?;
                print!("{text}");
            }
        }
        Command::Options { config } => {
            let props = load(&config)?;
            let report = options_report(&props)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn load(path: &Path) -> Result<Properties> {
    Properties::from_file(path)
        .with_context(|| format!("cannot read configuration {}", path.display()))
}

fn check(path: &Path) -> Result<EngineLayout> {
    let props = load(path)?;
    let manager = ExecutionManager::new(EmOptions::from_env());
    manager
        .init(&props, &DynamicJitLoader::new())
        .context("execution manager failed to initialize")?;
    let layout = manager.layout()?;
    manager.destroy();
    Ok(layout)
}

fn options_report(props: &Properties) -> Result<OptionsReport> {
    let options = EmOptions::from_env().merge_with_properties(props)?;

    let names: BTreeSet<&str> = props
        .iter()
        .filter(|(key, _)| key.ends_with(".genProfile"))
        .flat_map(|(_, value)| value.split(','))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect();

    let mut collectors = Vec::new();
    let mut rejected = Vec::new();
    for name in names {
        match CollectorSpec::from_properties(name, props) {
            Ok(spec) => collectors.push(spec),
            Err(err) => {
                warn!(collector = name, %err, "collector would be skipped");
                rejected.push(format!("{name}: {err}"));
            }
        }
    }

    Ok(OptionsReport {
        options,
        collectors,
        rejected,
    })
}

fn render(layout: &EngineLayout, out: &mut impl fmt::Write) -> fmt::Result {
    for chain in &layout.chains {
        writeln!(out, "chain {}", chain.name)?;
        for filter in &chain.filters {
            writeln!(out, "  filter {filter}")?;
        }
        for step in &chain.steps {
            let executor = if layout.executor == Some(step.handle) {
                " (executor)"
            } else {
                ""
            };
            writeln!(
                out,
                "  [{}] {} {}{executor}",
                step.handle,
                step.name,
                step.library.display()
            )?;
        }
    }
    for collector in &layout.collectors {
        writeln!(
            out,
            "collector {} ({}) by {} used by {:?}{}",
            collector.name,
            collector.kind.name(),
            collector.generator,
            collector.consumers,
            if collector.periodic { ", periodic" } else { "" }
        )?;
    }
    for dropped in &layout.dropped_chains {
        writeln!(out, "dropped: {dropped}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_options_report_lists_collectors() {
        let props = Properties::parse(
            "chains=c\nc.jits=A,B\nem.tbsTickMs=20\nA.genProfile=EB,BAD\nB.genProfile=VP\n\
             EB.profilerType=EB_PROFILER\nVP.profilerType=VALUE_PROFILER\n\
             BAD.profilerType=EDGE_PROFILER\nBAD.mode=SYNC\n",
        )
        .unwrap();
        let report = options_report(&props).unwrap();

        assert_eq!(report.options.tick_period_ms, 20);
        let names: Vec<&str> = report.collectors.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["EB", "VP"]);
        assert_eq!(report.rejected.len(), 1);
        assert!(report.rejected[0].starts_with("BAD:"));
    }

    #[test]
    fn test_check_reports_unloadable_jits() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "chains=c\nc.jits=A\nA.file=/nonexistent/libjit.so").unwrap();

        let err = check(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("libjit.so"));
    }

    #[test]
    fn test_missing_config_file() {
        let err = load(Path::new("/nonexistent/emgr.properties")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/emgr.properties"));
    }
}
