use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use color_print::cformat;
use shell_harness::config::HarnessConfig;
use shell_harness::overlay::HostEnvironment;
use shell_harness::shell::Registry;
use shell_harness::{InteractiveShell, ShellOptions};

#[derive(Parser)]
#[command(name = "shell-harness")]
#[command(about = "Drive interactive shells and inspect their environment", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List known dialects and how they are resolved
    List,

    /// Open a session and print environment variables from inside it
    Query {
        /// Dialect to open (bash, zsh, cmd.exe, powershell, ...)
        dialect: String,

        /// Variables to print
        #[arg(required = true)]
        vars: Vec<String>,

        /// Shell executable to use instead of searching PATH
        #[arg(long)]
        shell_path: Option<PathBuf>,

        /// Harness configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::List => handle_list(),
        Commands::Query {
            dialect,
            vars,
            shell_path,
            config,
        } => handle_query(&dialect, &vars, shell_path, config),
    };

    if let Err(e) = result {
        anstream::eprintln!("{}", cformat!("<red,bold>Error:</> {:#}", e));
        process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn handle_list() -> anyhow::Result<()> {
    let registry = Registry::builtin();
    for dialect in registry.dialects() {
        let profile = registry.resolve_dialect(dialect)?;
        let base = profile
            .base_dialect
            .map(|base| base.to_string())
            .unwrap_or_else(|| "-".to_string());
        let name = format!("{:<13}", profile.dialect_name());
        let columns = format!("base={base:<11} activator={:<11}", profile.activator.to_string());
        anstream::println!(
            "{}",
            cformat!(
                "<bold>{}</> {} print=<dim>{}</>",
                name,
                columns,
                profile.env_print_template
            )
        );
    }
    Ok(())
}

fn handle_query(
    dialect: &str,
    vars: &[String],
    shell_path: Option<PathBuf>,
    config: Option<PathBuf>,
) -> anyhow::Result<()> {
    let host = HostEnvironment::capture()?;
    let config = match config {
        Some(path) => HarnessConfig::load(&path)?,
        None => HarnessConfig::from_host(&host)?,
    };
    let mut options = ShellOptions::default().host(host).config(config);
    if let Some(path) = shell_path {
        options = options.shell_path(path);
    }

    let mut shell = InteractiveShell::open(dialect, options)
        .with_context(|| format!("Failed to open {dialect} session"))?;
    for name in vars {
        match shell.get_env_var(name, None)? {
            Some(value) => println!("{name}={value}"),
            None => println!("{name} unset"),
        }
    }
    shell.close()?;
    Ok(())
}
