use std::{fs::OpenOptions, path::PathBuf, process::ExitCode};

use anyhow::Result;
use clap::{error::ErrorKind, CommandFactory, Parser};
use env_logger::{Builder, Env, Target};
use remove_zero_velocity_bcs::{
    batch::{self, RunOptions},
    selector::InputSelector,
};

const ABOUT: &str = "Remove zero-valued momentum and velocity boundary conditions \
(x-mom, y-mom, z-mom, u, v, w) from Velocity faces in Uintah .ups files, in place.";

#[derive(Debug, Parser)]
#[command(name = "remove-zero-velocity-bcs", version, about = ABOUT)]
struct Cli {
    #[command(flatten)]
    selector: InputSelector,

    /// Show what would change without writing any file
    #[arg(long)]
    dry_run: bool,

    /// Stop at the first file that cannot be processed
    #[arg(long)]
    fail_fast: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => return usage(error),
    };

    let selection = match cli.selector.selection() {
        Ok(selection) => selection,
        Err(message) => return usage(Cli::command().error(ErrorKind::ArgumentConflict, message)),
    };

    if let Err(error) = init_logging() {
        eprintln!("unable to set up logging: {error:#}");
        return ExitCode::FAILURE;
    }

    let options = RunOptions {
        dry_run: cli.dry_run,
        fail_fast: cli.fail_fast,
    };

    match batch::run(&selection, &options, &mut std::io::stdout().lock()) {
        Ok(summary) if summary.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(error) => {
            log::error!("{error:#}");
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

/// Usage problems go to stdout along with the help banner; help and version exit cleanly.
fn usage(error: clap::Error) -> ExitCode {
    println!("{}", error.render());
    ExitCode::from(u8::try_from(error.exit_code()).unwrap_or(2))
}

fn init_logging() -> Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("warn"));

    if let Ok(log_location) = std::env::var("LOG_LOCATION") {
        let path = PathBuf::from(&*shellexpand::tilde(&log_location));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        builder.target(Target::Pipe(Box::new(
            OpenOptions::new().create(true).append(true).open(path)?,
        )));
    }

    builder.init();
    Ok(())
}
