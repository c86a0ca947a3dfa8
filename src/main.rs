use std::panic;

use anyhow::Result;
use clap::Parser;

use crm_autosave::{
    cli::{self, RootCommand},
    logging::{init_logging, print_log_location},
    settings::Settings,
};

#[derive(Parser, Debug)]
#[command(
    name = "crm-autosave",
    about = "Debounced auto-save sessions against a CRM task backend",
    version = env!("CRM_AUTOSAVE_BUILD_VERSION"),
    author
)]
struct Cli {
    /// Print the log file location on exit.
    #[arg(long, global = true)]
    show_log: bool,

    #[command(subcommand)]
    command: RootCommand,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_path = match init_logging() {
        Ok(path) => Some(path),
        Err(err) => {
            eprintln!("warning: failed to initialize logging: {err}");
            None
        }
    };
    if let Some(path) = log_path.as_ref() {
        install_panic_hook_with_log(path.clone());
    }

    let settings = Settings::load();
    let code = cli::run(cli.command, settings).await;

    if cli.show_log
        && let Some(path) = log_path.as_ref()
    {
        print_log_location(path);
    }
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn install_panic_hook_with_log(log_path: std::path::PathBuf) {
    let previous_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        eprintln!();
        print_log_location(&log_path);
        previous_hook(panic_info);
    }));
}
