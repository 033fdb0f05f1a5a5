use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "autocache")]
#[command(about = "AutoCache CLI - clear app cache through the Settings screens")]
#[command(
    long_about = "Replays scripted Settings screens through the AutoCache engine and coordinator, checks whether a dialog would be confirmed, and prints the effective configuration."
)]
pub struct Cli {
    /// Configuration file (.yaml, .yml or .json)
    #[clap(long, short = 'c', env = "AUTOCACHE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Override the armed window in milliseconds
    #[clap(long, global = true)]
    pub window_ms: Option<u64>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[clap(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[clap(rename_all = "lower")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug)]
pub struct SimulateArgs {
    /// Scenario file describing the simulated Settings screens
    #[clap(long, short = 's')]
    pub scenario: PathBuf,

    /// Package names to clear, in order. Defaults to every app in the scenario.
    pub targets: Vec<String>,

    /// How batch events are printed
    #[clap(long, short = 'o', value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct CheckDialogArgs {
    /// Tree file (.yaml, .yml or .json) holding the dialog's node hierarchy
    #[clap(long, short = 't')]
    pub tree: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a batch against a simulated device
    Simulate(SimulateArgs),
    /// Report whether a confirmation dialog would be accepted
    CheckDialog(CheckDialogArgs),
    /// Print the effective configuration as YAML
    ShowConfig,
}
