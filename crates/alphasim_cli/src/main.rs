//! alphasim - drive the run controller from the command line
//!
//! Builds a toy network engine and one of the bundled environments, then
//! trains or tests it. Epoch and run records go to the terminal through
//! `tracing` and to a JSON-lines file.
//!
//! Default file locations:
//! - Linux: ~/.local/share/alphasim/
//! - Windows: %APPDATA%\alphasim\
//! - MacOS: ~/Library/Application Support/alphasim/

use std::path::PathBuf;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod error;
mod paths;
mod runner;
mod scenario;
mod toy;

use alphasim::controller::StopHandle;
use error::CliError;
use paths::AppPaths;
use runner::Command;
use scenario::{EnvKind, Scenario};

#[derive(Debug, Default)]
struct Options {
    config: Option<PathBuf>,
    env: Option<EnvKind>,
    data: Option<PathBuf>,
    jsonl: Option<PathBuf>,
}

impl Options {
    fn parse(args: &[String]) -> Result<Self, CliError> {
        let mut opts = Options::default();
        let mut it = args.iter();
        while let Some(flag) = it.next() {
            let mut value = || {
                it.next()
                    .cloned()
                    .ok_or_else(|| CliError::Usage(format!("{flag} needs a value")))
            };
            match flag.as_str() {
                "--config" => opts.config = Some(PathBuf::from(value()?)),
                "--env" => opts.env = Some(value()?.parse()?),
                "--data" => opts.data = Some(PathBuf::from(value()?)),
                "--jsonl" => opts.jsonl = Some(PathBuf::from(value()?)),
                other => return Err(CliError::Usage(format!("unknown option: {other}"))),
            }
        }
        Ok(opts)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG overrides the default level.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(cmd) = args.get(1) else {
        print_help();
        return Ok(());
    };

    let command = match cmd.as_str() {
        "--help" | "-h" | "help" => {
            print_help();
            return Ok(());
        }
        "print-config" => {
            println!("{}", serde_json::to_string_pretty(&Scenario::default())?);
            return Ok(());
        }
        "train" => Command::Train,
        "test" => Command::Test,
        other => {
            eprintln!("Unknown command: {other}");
            print_help();
            std::process::exit(2);
        }
    };

    let opts = match Options::parse(&args[2..]) {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("{e}");
            print_help();
            std::process::exit(2);
        }
    };

    run(command, opts).await?;
    Ok(())
}

async fn run(command: Command, opts: Options) -> Result<(), CliError> {
    let paths = AppPaths::new()?;

    let config_path = opts
        .config
        .or_else(|| Some(paths.config_file()).filter(|p| p.is_file()));
    let mut scenario = match &config_path {
        Some(p) => {
            info!("loading config from {}", p.display());
            Scenario::load(p)?
        }
        None => Scenario::default(),
    };
    if let Some(env) = opts.env {
        scenario.env = env;
    }
    if let Some(data) = opts.data {
        scenario.data = Some(data);
    }
    let jsonl = opts
        .jsonl
        .unwrap_or_else(|| paths.log_file(command.label()));

    let stop = StopHandle::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C: stopping after the current trial");
                stop.request();
            }
        });
    }

    // The controller is not Send; build and drive it on the blocking thread.
    let log_path = jsonl.clone();
    let report =
        tokio::task::spawn_blocking(move || runner::run(command, &scenario, &log_path, stop))
            .await??;

    println!("{report}");
    println!("records written to {}", jsonl.display());
    Ok(())
}

fn print_help() {
    println!("alphasim (alpha-cycle simulation run controller)");
    println!("usage:");
    println!("  alphasim train [--config PATH] [--env table|sentence|bandit] [--data PATH] [--jsonl PATH]");
    println!("  alphasim test  [--config PATH] [--env table|sentence|bandit] [--data PATH] [--jsonl PATH]");
    println!("  alphasim print-config");
    println!("  alphasim help");
    println!();
    println!("RUST_LOG=debug shows per-trial events.");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_all_options() {
        let opts = Options::parse(&args(&[
            "--env", "bandit", "--config", "c.json", "--jsonl", "out.jsonl",
        ]))
        .unwrap();
        assert_eq!(opts.env, Some(EnvKind::Bandit));
        assert_eq!(opts.config, Some(PathBuf::from("c.json")));
        assert_eq!(opts.jsonl, Some(PathBuf::from("out.jsonl")));
        assert_eq!(opts.data, None);
    }

    #[test]
    fn rejects_unknown_and_incomplete_options() {
        assert!(matches!(
            Options::parse(&args(&["--fast"])),
            Err(CliError::Usage(_))
        ));
        assert!(matches!(
            Options::parse(&args(&["--data"])),
            Err(CliError::Usage(_))
        ));
        assert!(matches!(
            Options::parse(&args(&["--env", "maze"])),
            Err(CliError::Usage(_))
        ));
    }
}
