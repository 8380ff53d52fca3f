mod config;
mod invoke_cmd;
mod providers_cmd;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use relay_core::{ErrorKind, ProviderError};

use invoke_cmd::{InvokeArgs, UnsuccessfulResult};

#[derive(Parser)]
#[command(name = "relay", about = "Run agent CLIs (claude, codex, gemini) under supervision")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one prompt through an agent CLI and print its answer
    Invoke(InvokeArgs),
    /// Show which agent CLIs are installed
    Providers,
    /// Write a relay config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

/// Process exit code for a failed run.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<ProviderError>() {
        return match e.kind {
            ErrorKind::Timeout => 124,
            ErrorKind::Stall => 125,
            ErrorKind::NonZeroExit => 1,
            ErrorKind::ParseFailure => 65,
            ErrorKind::BinaryNotFound => 127,
            ErrorKind::Killed => 130,
            ErrorKind::Spawn => 126,
        };
    }
    if err.downcast_ref::<UnsuccessfulResult>().is_some() {
        return 1;
    }
    2
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Invoke(args) => {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupted, stopping the agent");
                    on_interrupt.cancel();
                }
            });
            invoke_cmd::run_invoke(args, cancel).await
        }
        Commands::Providers => providers_cmd::run_providers(),
        Commands::Init { force } => cmd_init(force),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(exit_code(&e));
    }
}

/// Execute the `relay init` command: write the default config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let path = config::save_config(config::DEFAULT_CONFIG)?;

    println!("Config written to {}", path.display());
    println!();
    println!("Next: run `relay providers` to see which agent CLIs were found.");

    Ok(())
}

#[cfg(test)]
mod test_util {
    use std::sync::{Mutex, MutexGuard};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Serialize tests that mutate process environment variables.
    pub fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }
}
