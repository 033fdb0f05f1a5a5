//! AutoCache CLI
//!
//! Usage from workspace root:
//!   cargo run --bin autocache -- simulate --scenario demos/settings.yaml
//!   cargo run --bin autocache -- simulate -s demos/settings.yaml com.example.camera
//!   cargo run --bin autocache -- check-dialog --tree dialog.yaml
//!   cargo run --bin autocache -- show-config --config autocache.yaml

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::command::{handle_check_dialog, handle_show_config, handle_simulate};
use crate::utils::{init_logging, load_config};

mod cli;
mod command;
mod utils;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref(), cli.window_ms)?;

    match cli.command {
        Commands::Simulate(args) => handle_simulate(config, args).await,
        Commands::CheckDialog(args) => handle_check_dialog(&config, args),
        Commands::ShowConfig => handle_show_config(&config),
    }
}
