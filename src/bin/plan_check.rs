//! plan-check
//!
//! Validates a deployment plan file, prints its fingerprint, and shows how
//! routing keys resolve under it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use serde::Serialize;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spacehost::Plan;

/// Command line options.
struct Config {
    /// Plan file to check.
    plan: PathBuf,
    /// Keys to resolve.
    keys: Vec<String>,
    /// Number of synthetic keys to route for the distribution report.
    sample: usize,
    /// Emit a JSON report instead of text.
    json: bool,
}

fn usage() {
    println!("plan-check - validate a space deployment plan");
    println!();
    println!("USAGE:");
    println!("    plan-check [OPTIONS] <PLAN_FILE>");
    println!();
    println!("OPTIONS:");
    println!("    -k, --key <KEY>         Resolve KEY to a version (repeatable)");
    println!("    -s, --sample <N>        Route N synthetic keys and report the split");
    println!("        --json              Print the report as JSON");
    println!("    -h, --help              Print help information");
}

fn parse_args() -> Result<Config, String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut plan = None;
    let mut keys = Vec::new();
    let mut sample = 0usize;
    let mut json = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--key" | "-k" => {
                let value = args.get(i + 1).ok_or("--key requires a value")?;
                keys.push(value.clone());
                i += 2;
            }
            "--sample" | "-s" => {
                let value = args.get(i + 1).ok_or("--sample requires a value")?;
                sample = value
                    .parse()
                    .map_err(|_| format!("invalid sample size: {value}"))?;
                i += 2;
            }
            "--json" => {
                json = true;
                i += 1;
            }
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            arg if arg.starts_with('-') => return Err(format!("unknown argument: {arg}")),
            arg => {
                if plan.replace(PathBuf::from(arg)).is_some() {
                    return Err("only one plan file may be given".to_string());
                }
                i += 1;
            }
        }
    }

    Ok(Config {
        plan: plan.ok_or("missing <PLAN_FILE>")?,
        keys,
        sample,
        json,
    })
}

#[derive(Serialize)]
struct Report<'a> {
    fingerprint: &'a str,
    default: &'a str,
    instrument: bool,
    versions: Vec<&'a str>,
    stages: usize,
    resolved: BTreeMap<&'a str, &'a str>,
    sample: BTreeMap<&'a str, usize>,
}

fn build_report<'a>(plan: &'a Plan, config: &'a Config) -> Report<'a> {
    let resolved = config
        .keys
        .iter()
        .map(|key| (key.as_str(), plan.pick_version(key)))
        .collect();

    let mut sample: BTreeMap<&str, usize> = BTreeMap::new();
    for n in 0..config.sample {
        *sample.entry(plan.pick_version(&format!("doc-{n}"))).or_default() += 1;
    }

    Report {
        fingerprint: plan.content_hash(),
        default: plan.default_version(),
        instrument: plan.instrument(),
        versions: plan.versions().keys().map(String::as_str).collect(),
        stages: plan.stages().len(),
        resolved,
        sample,
    }
}

fn print_text(report: &Report<'_>, total: usize) {
    println!("fingerprint: {}", report.fingerprint);
    println!("default:     {}", report.default);
    println!("instrument:  {}", report.instrument);
    println!("versions:    {}", report.versions.join(", "));
    println!("stages:      {}", report.stages);
    for (key, version) in &report.resolved {
        println!("  {key} -> {version}");
    }
    if total > 0 {
        println!("sample of {total} keys:");
        for (version, count) in &report.sample {
            #[allow(clippy::cast_precision_loss)]
            let share = *count as f64 * 100.0 / total as f64;
            println!("  {version:<16} {count:>8} ({share:.2}%)");
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let config = match parse_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            usage();
            return ExitCode::from(2);
        }
    };

    let text = match std::fs::read_to_string(&config.plan) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("error: cannot read {}: {err}", config.plan.display());
            return ExitCode::from(2);
        }
    };
    debug!(path = %config.plan.display(), bytes = text.len(), "read plan");

    let plan = match Plan::parse(&text) {
        Ok(plan) => plan,
        Err(err) => {
            eprintln!("invalid plan: {err}");
            return ExitCode::FAILURE;
        }
    };

    let report = build_report(&plan, &config);
    if config.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("error: cannot encode report: {err}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_text(&report, config.sample);
    }
    ExitCode::SUCCESS
}
