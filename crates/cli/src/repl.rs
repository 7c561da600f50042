use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};
use datachat_rag::{Language, Session};

use crate::print_backends;

const HELP: &str = "Commands: :backend <id>, :lang <code>, :backends, :preview, :reset, :help, :quit";

#[derive(Debug, PartialEq, Eq)]
pub enum ReplCommand {
    Ask(String),
    Backend(Option<String>),
    Language(Option<String>),
    Backends,
    Preview,
    Reset,
    Help,
    Quit,
    Unknown(String),
    Empty,
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return ReplCommand::Empty;
        }
        let Some(command) = line.strip_prefix(':') else {
            return ReplCommand::Ask(line.to_string());
        };
        let mut parts = command.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default();
        let arg = parts
            .next()
            .map(str::trim)
            .filter(|arg| !arg.is_empty())
            .map(str::to_string);
        match name {
            "backend" => ReplCommand::Backend(arg),
            "lang" | "language" => ReplCommand::Language(arg),
            "backends" => ReplCommand::Backends,
            "preview" => ReplCommand::Preview,
            "reset" => ReplCommand::Reset,
            "help" | "h" => ReplCommand::Help,
            "quit" | "q" | "exit" => ReplCommand::Quit,
            other => ReplCommand::Unknown(other.to_string()),
        }
    }
}

/// Appends each exchange to a plain-text transcript.
pub struct Transcript {
    file: std::fs::File,
}

impl Transcript {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open transcript {}", path.display()))?;
        Ok(Self { file })
    }

    pub fn record(&mut self, question: &str, answer: &str) -> Result<()> {
        writeln!(self.file, "User: {question}")?;
        writeln!(self.file, "Assistant: {answer}")?;
        writeln!(self.file)?;
        Ok(())
    }
}

pub fn run<R: BufRead, W: Write>(
    session: &Session,
    input: R,
    out: &mut W,
    mut transcript: Option<Transcript>,
) -> Result<()> {
    writeln!(
        out,
        "Backend: {} | language: {} | {HELP}",
        session.current_backend(),
        session.language()
    )?;
    let mut lines = input.lines();
    loop {
        write!(out, "> ")?;
        out.flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        match ReplCommand::parse(&line?) {
            ReplCommand::Empty => {}
            ReplCommand::Quit => break,
            ReplCommand::Help => writeln!(out, "{HELP}")?,
            ReplCommand::Ask(question) => {
                let answer = session.query(&question);
                writeln!(out, "{answer}")?;
                if let Some(transcript) = transcript.as_mut() {
                    transcript.record(&question, &answer)?;
                }
            }
            ReplCommand::Backend(None) => writeln!(out, "Current backend: {}", session.current_backend())?,
            ReplCommand::Backend(Some(id)) => match session.select_backend(&id) {
                Ok(()) => writeln!(out, "Switched to {id}; history cleared.")?,
                Err(err) => writeln!(out, "{err}")?,
            },
            ReplCommand::Language(None) => writeln!(out, "Current language: {}", session.language())?,
            ReplCommand::Language(Some(code)) => match code.parse::<Language>() {
                Ok(language) => {
                    session.set_language(language);
                    writeln!(out, "Responding in {}.", language.name())?;
                }
                Err(err) => writeln!(out, "{err}")?,
            },
            ReplCommand::Backends => print_backends(out, &session.list_backends())?,
            ReplCommand::Preview => writeln!(out, "{}", session.get_preview())?,
            ReplCommand::Reset => {
                session.clear_history();
                writeln!(out, "History cleared.")?;
            }
            ReplCommand::Unknown(name) => writeln!(out, "Unknown command :{name}. {HELP}")?,
        }
    }
    Ok(())
}

/// Reads from stdin and writes to stdout.
pub fn run_stdio(session: &Session, transcript: Option<Transcript>) -> Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    run(session, stdin.lock(), &mut out, transcript)
}

#[cfg(test)]
mod tests {
    use super::*;
    use datachat_rag::{EngineConfig, Table};
    use std::io::Cursor;

    #[test]
    fn parses_commands() {
        assert_eq!(ReplCommand::parse("  "), ReplCommand::Empty);
        assert_eq!(ReplCommand::parse("total sales?"), ReplCommand::Ask("total sales?".into()));
        assert_eq!(ReplCommand::parse(":backend openai"), ReplCommand::Backend(Some("openai".into())));
        assert_eq!(ReplCommand::parse(":backend"), ReplCommand::Backend(None));
        assert_eq!(ReplCommand::parse(":lang  hi "), ReplCommand::Language(Some("hi".into())));
        assert_eq!(ReplCommand::parse(":q"), ReplCommand::Quit);
        assert_eq!(ReplCommand::parse(":dance"), ReplCommand::Unknown("dance".into()));
    }

    #[test]
    fn session_transcript_records_exchanges() {
        let mut config = EngineConfig::default();
        config.generation.default_backend = "extractive".into();
        let session = Session::new(config).unwrap();
        session.load(Table::from_csv_reader("city,units\nPune,12\n".as_bytes(), b',').unwrap());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.txt");
        let transcript = Transcript::open(&path).unwrap();
        let input = Cursor::new(":lang xx\nunits in Pune?\n:quit\nignored\n");
        let mut out = Vec::new();
        run(&session, input, &mut out, Some(transcript)).unwrap();

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("unsupported language 'xx'"));
        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.starts_with("User: units in Pune?\nAssistant: "));
        assert_eq!(session.history().len(), 2);
    }
}
