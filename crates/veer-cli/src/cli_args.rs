use std::path::PathBuf;

use clap::{Parser, Subcommand};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "veer",
    about = "Resolves proxy profiles and follows the attached wireless network",
    version
)]
pub struct Cli {
    #[arg(
        long = "state-dir",
        env = "VEER_STATE_DIR",
        default_value = ".veer",
        global = true,
        help = "Directory holding profile.yaml, profiles/, override/, operator.yaml and app.yaml"
    )]
    pub state_dir: PathBuf,

    #[arg(
        long = "work-dir",
        env = "VEER_WORK_DIR",
        global = true,
        help = "Root of per-profile engine working directories (default: <state-dir>/work)"
    )]
    pub work_dir: Option<PathBuf>,

    #[arg(
        long = "resources-dir",
        env = "VEER_RESOURCES_DIR",
        global = true,
        help = "Directory with country.mmdb, geoip.dat, geosite.dat and ASN.mmdb (default: <state-dir>/resources)"
    )]
    pub resources_dir: Option<PathBuf>,

    #[arg(
        long = "script-fuel-limit",
        env = "VEER_SCRIPT_FUEL_LIMIT",
        default_value_t = veer_profile::SCRIPT_SANDBOX_FUEL_LIMIT_DEFAULT,
        value_parser = parse_positive_u64,
        global = true,
        help = "Fuel budget for one override script run"
    )]
    pub script_fuel_limit: u64,

    #[arg(
        long = "script-memory-limit-bytes",
        env = "VEER_SCRIPT_MEMORY_LIMIT_BYTES",
        default_value_t = veer_profile::SCRIPT_SANDBOX_MEMORY_LIMIT_BYTES_DEFAULT,
        value_parser = parse_positive_u64,
        global = true,
        help = "Linear memory ceiling for one override script run"
    )]
    pub script_memory_limit_bytes: u64,

    #[arg(
        long = "script-timeout-ms",
        env = "VEER_SCRIPT_TIMEOUT_MS",
        default_value_t = veer_profile::SCRIPT_SANDBOX_TIMEOUT_MS_DEFAULT,
        value_parser = parse_positive_u64,
        global = true,
        help = "Wall-clock timeout for one override script run"
    )]
    pub script_timeout_ms: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve the current profile, write its working directory and print the config path.
    Resolve,
    /// Print the resolved YAML of a profile without writing anything.
    Show {
        #[arg(help = "Profile selector (default: the current profile)")]
        profile: Option<String>,
    },
    /// Run the reconciliation loop until interrupted.
    Watch(NetworkArgs),
    /// Run a single reconciliation pass.
    CheckSsid(NetworkArgs),
}

#[derive(Debug, Clone, clap::Args)]
pub struct NetworkArgs {
    #[arg(
        long = "poll-interval-seconds",
        env = "VEER_POLL_INTERVAL_SECONDS",
        default_value_t = 30,
        value_parser = parse_positive_u64,
        help = "Seconds between reconciliation passes"
    )]
    pub poll_interval_seconds: u64,

    #[arg(
        long = "ssid-command",
        env = "VEER_SSID_COMMAND",
        help = "Command printing the current SSID on its first non-empty line"
    )]
    pub ssid_command: String,

    #[arg(
        long = "engine-start-command",
        env = "VEER_ENGINE_START_COMMAND",
        help = "Engine launch command; `-d <work dir> -f <config>` is appended"
    )]
    pub engine_start_command: String,

    #[arg(
        long = "controller-url",
        env = "VEER_CONTROLLER_URL",
        help = "Engine external controller base URL, e.g. http://127.0.0.1:9090"
    )]
    pub controller_url: Option<String>,

    #[arg(
        long = "controller-secret",
        env = "VEER_CONTROLLER_SECRET",
        hide_env_values = true,
        help = "Bearer secret for the engine external controller"
    )]
    pub controller_secret: Option<String>,

    #[arg(
        long = "system-proxy-enable-command",
        env = "VEER_SYSTEM_PROXY_ENABLE_COMMAND",
        requires = "system_proxy_disable_command",
        help = "Command that turns the OS system proxy on"
    )]
    pub system_proxy_enable_command: Option<String>,

    #[arg(
        long = "system-proxy-disable-command",
        env = "VEER_SYSTEM_PROXY_DISABLE_COMMAND",
        requires = "system_proxy_enable_command",
        help = "Command that turns the OS system proxy off"
    )]
    pub system_proxy_disable_command: Option<String>,

    #[arg(
        long = "restore-dns-command",
        env = "VEER_RESTORE_DNS_COMMAND",
        help = "Command that restores the OS DNS settings"
    )]
    pub restore_dns_command: Option<String>,

    #[arg(
        long = "command-timeout-ms",
        env = "VEER_COMMAND_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "Timeout for each hook command"
    )]
    pub command_timeout_ms: u64,
}
