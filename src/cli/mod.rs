mod serve;

use std::path::PathBuf;

use anyhow::Result;
use console::style;

use crate::core::terminal::{self, GuideSection};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Core")
        .command("serve", "Run the orchestrator daemon and HTTP API")
        .print();

    GuideSection::new("Info")
        .command("version", "Print the installed version")
        .command("help", "Show this guide")
        .print();

    println!(
        "\n {} {} <command> [flags]\n",
        style("Usage:").bold(),
        style("aviary").green()
    );
}

/// Resolved `serve` settings after merging defaults, the optional
/// daemon.toml, and command-line flags (flags win).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServeSettings {
    pub api_host: String,
    pub api_port: u16,
    pub api_token: Option<String>,
    pub data_dir: Option<PathBuf>,
}

impl Default for ServeSettings {
    fn default() -> Self {
        Self {
            api_host: "127.0.0.1".to_string(),
            api_port: 17891,
            api_token: None,
            data_dir: None,
        }
    }
}

pub(crate) fn parse_serve_flags(args: &[String], start: usize, mut settings: ServeSettings) -> ServeSettings {
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--api-host" => {
                if i + 1 < args.len() {
                    settings.api_host = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-port" => {
                if i + 1 < args.len() {
                    settings.api_port = args[i + 1].parse().unwrap_or(settings.api_port);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--api-token" => {
                if i + 1 < args.len() {
                    settings.api_token = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--data-dir" => {
                if i + 1 < args.len() {
                    settings.data_dir = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    settings
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "serve" => {
            let settings = parse_serve_flags(&args, 2, ServeSettings::default());
            serve::run_serve(settings).await
        }
        "version" | "--version" | "-V" => {
            println!("aviary {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            terminal::print_error(&format!("Unknown command: {}", other));
            print_help();
            Ok(())
        }
    }
}
