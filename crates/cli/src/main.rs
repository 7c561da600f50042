use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use datachat_rag::{is_error_message, BackendDescriptor, EngineConfig, Language, Session};
use tracing_subscriber::EnvFilter;

mod repl;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const VERSION_LONG: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (features: ",
    env!("DATACHAT_FEATURES"),
    ")"
);

const DEFAULT_CONFIG: &str = "datachat.toml";

#[derive(Parser, Debug)]
#[command(
    name = "datachat",
    version = VERSION,
    long_version = VERSION_LONG,
    about = "Ask questions about tabular business data"
)]
struct Cli {
    /// Engine config (TOML). Defaults to ./datachat.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, short, global = true, action = ArgAction::SetTrue)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the first rows of a table
    Preview {
        input: PathBuf,
        #[arg(long)]
        rows: Option<usize>,
    },
    /// List configured generation backends
    Backends {
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Answer one question about a table
    Ask {
        input: PathBuf,
        question: String,
        #[command(flatten)]
        select: SelectArgs,
    },
    /// Interactive question loop over a table
    Chat {
        input: PathBuf,
        #[command(flatten)]
        select: SelectArgs,
        #[arg(long)]
        transcript: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
struct SelectArgs {
    #[arg(long)]
    backend: Option<String>,
    #[arg(long)]
    language: Option<String>,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let mut config = load_config(cli.config.as_deref())?;
    config.apply_env();

    match cli.command {
        Commands::Preview { input, rows } => {
            if let Some(rows) = rows {
                config.retrieval.preview_rows = rows;
            }
            let session = build_session(config)?;
            load(&session, &input)?;
            print!("{}", session.get_preview());
        }
        Commands::Backends { json } => {
            let session = build_session(config)?;
            let backends = session.list_backends();
            if json {
                println!("{}", serde_json::to_string_pretty(&backends)?);
            } else {
                print_backends(&mut std::io::stdout().lock(), &backends)?;
            }
        }
        Commands::Ask {
            input,
            question,
            select,
        } => {
            let session = build_session(config)?;
            apply_selection(&session, &select)?;
            load(&session, &input)?;
            let answer = session.query(&question);
            println!("{answer}");
            if is_error_message(&answer) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Chat {
            input,
            select,
            transcript,
        } => {
            let session = build_session(config)?;
            apply_selection(&session, &select)?;
            println!("{}", load(&session, &input)?);
            let transcript = transcript
                .as_deref()
                .map(repl::Transcript::open)
                .transpose()?;
            repl::run_stdio(&session, transcript)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            if !default.exists() {
                return Ok(EngineConfig::default());
            }
            default
        }
    };
    EngineConfig::load(&path).with_context(|| format!("failed to load {}", path.display()))
}

fn build_session(config: EngineConfig) -> Result<Session> {
    Session::new(config).map_err(|err| anyhow!("{err}"))
}

fn apply_selection(session: &Session, select: &SelectArgs) -> Result<()> {
    if let Some(backend) = &select.backend {
        session.select_backend(backend)?;
    }
    if let Some(code) = &select.language {
        let language: Language = code.parse().map_err(|err: String| anyhow!(err))?;
        session.set_language(language);
    }
    Ok(())
}

fn load(session: &Session, input: &Path) -> Result<String> {
    let status = session.load_file(input);
    if is_error_message(&status) {
        bail!("{status}");
    }
    tracing::info!(input = %input.display(), "{status}");
    Ok(status)
}

pub(crate) fn print_backends<W: Write>(out: &mut W, backends: &[BackendDescriptor]) -> std::io::Result<()> {
    writeln!(out, "{:<16} {:<16} {:<28} {:<10} STATUS", "ID", "KIND", "MODEL", "ATTEMPTS")?;
    for backend in backends {
        writeln!(
            out,
            "{:<16} {:<16} {:<28} {:<10} {}",
            backend.id.as_str(),
            backend.kind.as_str(),
            backend.model,
            backend.init_attempts,
            backend.status
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_ask_with_selection() {
        let cli = Cli::try_parse_from([
            "datachat", "--verbose", "ask", "sales.csv", "total revenue?", "--backend", "openai", "--language", "hi",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Ask { question, select, .. } => {
                assert_eq!(question, "total revenue?");
                assert_eq!(select.backend.as_deref(), Some("openai"));
                assert_eq!(select.language.as_deref(), Some("hi"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn backend_table_lists_every_backend() {
        let session = Session::new(EngineConfig::default()).unwrap();
        let mut out = Vec::new();
        print_backends(&mut out, &session.list_backends()).unwrap();
        let printed = String::from_utf8(out).unwrap();
        assert_eq!(printed.lines().count(), 4);
        assert!(printed.contains("remote_api"));
        assert!(printed.contains("uninitialized"));
    }
}
