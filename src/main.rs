//! respack-cli entry point.
//!
//! ## CLI Subcommands
//!
//! - `respack-cli check [GROUP]` - Version check against the remote manifest
//! - `respack-cli update GROUP` - Download outdated packs of a group
//! - `respack-cli manifest validate|hash FILE` - Manifest tooling
//! - `respack-cli config show|defaults|validate` - Configuration

use std::path::Path;
use std::process::ExitCode;

use respack_core::cli::{self, config_cmd, manifest_cmd};
use respack_core::telemetry::{init_logging, LogConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    if matches!(command, "check" | "update") {
        if let Err(e) = init_logging(&LogConfig::from_env()) {
            eprintln!("Logging disabled: {e}");
        }
    }

    match command {
        "check" => {
            let group = args.get(2).map(|s| s.as_str());
            exit(cli::run_check(group).await)
        }
        "update" => match args.get(2) {
            Some(group) => exit(cli::run_update(group).await),
            None => {
                eprintln!("update requires a group name");
                print_command_help("update");
                ExitCode::FAILURE
            }
        },
        "manifest" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("");
            let Some(file) = args.get(3) else {
                print_command_help("manifest");
                return ExitCode::FAILURE;
            };
            match subcommand {
                "validate" => exit(manifest_cmd::run_validate(Path::new(file))),
                "hash" => exit(manifest_cmd::run_hash(Path::new(file))),
                _ => {
                    eprintln!("Unknown manifest subcommand: {}", subcommand);
                    print_command_help("manifest");
                    ExitCode::FAILURE
                }
            }
        }
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => {
                    let json = args.get(3).map(|s| s.as_str()) == Some("--json");
                    config_cmd::run_show(json);
                    ExitCode::SUCCESS
                }
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => exit(config_cmd::run_validate()),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = args.get(2) {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("respack-cli {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn exit(code: i32) -> ExitCode {
    ExitCode::from(code.clamp(0, 255) as u8)
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "respack-cli - resource pack engine tools v{}

USAGE:
    respack-cli [COMMAND] [OPTIONS]

COMMANDS:
    check        Compare local packs with the remote manifest
    update       Download every outdated pack of a group
    manifest     Validate or hash manifest content
    config       Manage configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

EXAMPLES:
    respack-cli check                    # All groups
    respack-cli check base               # One group
    respack-cli update base              # Fetch outdated packs of 'base'
    respack-cli manifest validate packs/manifest.json
    respack-cli manifest hash packs/ui.pack
    respack-cli config show --json

ENVIRONMENT:
    RESPACK_CONFIG          TOML config file
    RESPACK_READ_ONLY_DIR   Shipped packs root
    RESPACK_READ_WRITE_DIR  Download cache root
    RESPACK_URL_PREFIX      Remote content root
    RESPACK_LOG             Log filter (e.g. info, respack_core=debug)
    RESPACK_LOG_FORMAT      pretty | json

EXIT CODES:
    0  Success
    1  Failure
    2  Configuration error
    3  Connection error",
        version
    );
}

fn print_command_help(command: &str) {
    match command {
        "check" => eprintln!(
            "respack-cli check [GROUP]

Fetch the read-only, read-write and remote manifests, reconcile them and
print how many packs (and bytes) need downloading, per group."
        ),
        "update" => eprintln!(
            "respack-cli update GROUP

Run a version check, then download every outdated pack of GROUP with
resume, verification and retries. Progress is printed once per second."
        ),
        "manifest" => eprintln!(
            "respack-cli manifest validate FILE
respack-cli manifest hash FILE

validate  Parse FILE and check ordering, raw packs and dependency cycles
hash      Print the SHA-256 and length of a pack file"
        ),
        "config" => eprintln!(
            "respack-cli config show [--json]
respack-cli config defaults
respack-cli config validate

show      Effective configuration after file and environment layers
defaults  Built-in defaults
validate  Exit 0 if usable, 1 on warnings, 2 if the config file is broken"
        ),
        _ => print_usage(),
    }
}
