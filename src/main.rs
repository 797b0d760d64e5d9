use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use engine_debugger::config::AdapterConfig;
use engine_debugger::executor::{run_program, run_with_agent, ScriptEngine};
use engine_debugger::{bootstrap, dap, logging};

#[derive(Parser)]
#[command(name = "engine-debug", version, about = "Debugger for .mod programs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the Debug Adapter Protocol on stdin/stdout
    Adapter {
        /// Adapter configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port for the rendezvous server; overrides the config file
        #[arg(long)]
        rendezvous_port: Option<u16>,

        #[arg(short, long)]
        verbose: bool,
    },
    /// Run a program, attaching to a debug session when one is offered
    Run {
        /// Program path relative to the current directory
        program: String,

        /// Rendezvous port of a waiting debugger
        #[arg(long, env = "DEBUGGER_PORT")]
        debugger_port: Option<u16>,

        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Adapter {
            config,
            rendezvous_port,
            verbose,
        } => {
            let mut config = AdapterConfig::load_or_default(config.as_deref())?;
            logging::init(verbose, config.log_filter.as_deref());
            if let Some(port) = rendezvous_port {
                config.rendezvous_port = port;
            }
            dap::run_dap_mode(config).context("DAP server failed")?;
        }
        Commands::Run {
            program,
            debugger_port,
            verbose,
        } => {
            logging::init(verbose, None);
            let root = std::env::current_dir().context("no current directory")?;
            let mut engine = ScriptEngine::open(root, &program)
                .with_context(|| format!("failed to load {}", program))?
                .with_echo(true);

            match debugger_port.and_then(bootstrap::attach) {
                Some(connection) => {
                    info!(program = %program, "Running under debugger");
                    run_with_agent(engine, connection);
                }
                None => run_program(&mut engine),
            }
        }
    }

    Ok(())
}
