use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use kairos::config::CompilerConfig;
use kairos::diagnostics;

#[derive(Parser)]
#[command(name = "kairosc", version, about = "The Kairos timing compiler front end")]
struct Cli {
    /// Log pass progress to stderr (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Type-check, schedule and lower a module AST
    Check {
        /// Module AST as JSON
        file: PathBuf,
        /// Config file (defaults to the nearest kairos.toml)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Source text the AST spans refer to, for annotated diagnostics
        #[arg(long)]
        source: Option<PathBuf>,
        /// What to print to stdout as JSON
        #[arg(long, value_enum)]
        emit: Option<Emit>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Emit {
    Types,
    Delays,
    Schedules,
    Cfg,
    Frames,
    All,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_max_level(level)
        .init();

    match cli.command {
        Commands::Check { file, config, source, emit } => {
            let config_path = config.or_else(|| {
                let dir = file.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
                CompilerConfig::discover(&dir)
            });
            let config = match config_path {
                Some(path) => match CompilerConfig::load(&path) {
                    Ok(c) => c,
                    Err(err) => {
                        eprintln!("error: {err}");
                        std::process::exit(1);
                    }
                },
                None => CompilerConfig::default(),
            };
            let module = match kairos::load_module(&file) {
                Ok(m) => m,
                Err(err) => {
                    eprintln!("error: {err}");
                    std::process::exit(1);
                }
            };
            let source_text = match source {
                Some(path) => match std::fs::read_to_string(&path) {
                    Ok(text) => Some(text),
                    Err(err) => {
                        eprintln!("error: {}: could not read file: {err}", path.display());
                        std::process::exit(1);
                    }
                },
                None => None,
            };

            let compilation = kairos::compile_module(&module, &config);

            if let Some(emit) = emit {
                let json = match emit {
                    Emit::Types => serde_json::to_string_pretty(&compilation.types),
                    Emit::Delays => serde_json::to_string_pretty(&compilation.delays),
                    Emit::Schedules => serde_json::to_string_pretty(&compilation.schedules),
                    Emit::Cfg => serde_json::to_string_pretty(&compilation.graphs),
                    Emit::Frames => serde_json::to_string_pretty(&compilation.frames),
                    Emit::All => serde_json::to_string_pretty(&compilation),
                };
                match json {
                    Ok(json) => println!("{json}"),
                    Err(err) => {
                        eprintln!("error: could not encode output: {err}");
                        std::process::exit(1);
                    }
                }
            }

            let records = compilation.diagnostics.records();
            if !records.is_empty() {
                let rendered = match &source_text {
                    Some(text) => diagnostics::render(text, records),
                    None => diagnostics::render_plain(records),
                };
                eprint!("{rendered}");
            }
            if compilation.has_errors() {
                eprintln!(
                    "{}: {} error(s)",
                    file.display(),
                    compilation.diagnostics.error_count()
                );
                std::process::exit(1);
            }
        }
    }
}
