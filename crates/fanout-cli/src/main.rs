mod config;
mod hosts_cmd;
mod run_cmd;
#[cfg(test)]
mod test_util;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config::Overrides;

#[derive(Parser)]
#[command(name = "fanout", about = "Run one command script on every host in a fleet over SSH")]
struct Cli {
    /// Config file (overrides FANOUT_CONFIG and config file discovery)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Hosts file, one user@host[:port] per line (overrides the config file)
    #[arg(long, global = true)]
    hosts: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute the script on every host and write the combined log
    Run {
        /// Script to execute, used as-is (overrides config `script`)
        #[arg(long)]
        script: Option<PathBuf>,
        /// Log file to create or truncate (overrides config `log_file`)
        #[arg(long)]
        log: Option<PathBuf>,
        /// Maximum number of hosts to run at once (default: all of them)
        #[arg(long)]
        max_concurrency: Option<usize>,
        /// Connect timeout per host in seconds (default: 10)
        #[arg(long)]
        connect_timeout: Option<u64>,
    },
    /// Parse the hosts file and list the targets without connecting
    Hosts,
    /// Write a starter config file
    Init {
        /// Where to write the config (defaults to ~/.config/fanout/config.toml)
        #[arg(long)]
        path: Option<PathBuf>,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

/// Execute the `fanout init` command: write a starter config file.
fn cmd_init(path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = path.unwrap_or_else(config::config_path);

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    config::save_config(&path, &config::starter_config())?;

    println!("Config written to {}", path.display());
    println!();
    println!("Next: edit the password, list your hosts in hosts.txt, put the");
    println!("script under templates/, then run `fanout run`.");

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            script,
            log,
            max_concurrency,
            connect_timeout,
        } => {
            let overrides = Overrides {
                config: cli.config,
                hosts: cli.hosts,
                script,
                log,
                max_concurrency,
                connect_timeout_secs: connect_timeout,
            };
            run_cmd::run_fleet(&overrides).await?;
        }
        Commands::Hosts => {
            let overrides = Overrides {
                config: cli.config,
                hosts: cli.hosts,
                ..Overrides::default()
            };
            hosts_cmd::run_hosts(&overrides)?;
        }
        Commands::Init { path, force } => {
            cmd_init(path, force)?;
        }
    }

    Ok(())
}
