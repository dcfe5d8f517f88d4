//! Clap derive structures for the `hwenergy` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use hwenergy_core::BatteryMode;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// hwenergy -- pair, watch and control local energy devices
#[derive(Debug, Parser)]
#[command(
    name = "hwenergy",
    version,
    about = "Pair, watch and control local energy meters and home batteries",
    long_about = "Talks to P1 grid meters, kWh meters and plug-in batteries over their\n\
        local API. Pairing needs a physical button press on each device; the\n\
        resulting tokens are printed as a ready-to-paste meter configuration.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "HWENERGY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "HWENERGY_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Request and handshake timeout in seconds (overrides config)
    #[arg(long, env = "HWENERGY_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Discover devices, then pair all of them at once
    Pair(PairArgs),

    /// Pair a single device by host
    PairOne(PairOneArgs),

    /// Probe hosts and list the devices that answer
    #[command(alias = "scan")]
    Discover(DiscoverArgs),

    /// Stream live readings of a configured device
    Watch(WatchArgs),

    /// Set the battery mode through a configured grid meter
    #[command(alias = "bat")]
    Battery(BatteryArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Pairing ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct PairArgs {
    /// Client name registered on each device (stored as local/<name>)
    #[arg(long, short = 'n')]
    pub name: String,

    #[command(flatten)]
    pub scan: ScanArgs,

    /// Append the paired devices to the config file
    #[arg(long)]
    pub save: bool,
}

#[derive(Debug, Args)]
pub struct PairOneArgs {
    /// Device host name or IP address
    pub host: String,

    /// Client name registered on the device
    #[arg(long, short = 'n')]
    pub name: String,
}

// ── Discovery ────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Host to probe (repeatable)
    #[arg(long = "host", short = 'H', required = true)]
    pub hosts: Vec<String>,

    /// Maximum scan duration in seconds
    #[arg(long, default_value = "10")]
    pub scan_secs: u64,
}

#[derive(Debug, Args)]
pub struct DiscoverArgs {
    #[command(flatten)]
    pub scan: ScanArgs,
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Name of a configured device
    pub device: String,

    /// Stop after this many readings
    #[arg(long, short = 'c')]
    pub count: Option<u64>,

    /// Report power with the opposite sign
    #[arg(long)]
    pub invert: bool,
}

#[derive(Debug, Args)]
pub struct BatteryArgs {
    /// Name of a configured grid meter
    pub device: String,

    /// Target mode
    pub mode: ModeArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    /// Hold the grid connection at zero
    Zero,
    /// Charge to full
    #[value(name = "to_full", alias = "to-full")]
    ToFull,
    /// Neither charge nor discharge
    Standby,
}

impl From<ModeArg> for BatteryMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Zero => Self::Zero,
            ModeArg::ToFull => Self::ToFull,
            ModeArg::Standby => Self::Standby,
        }
    }
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
