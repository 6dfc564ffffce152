use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use suzume::Suzume;

#[derive(Debug, Parser)]
#[clap(name = "suzume", version)]
struct App {
  #[clap(subcommand)]
  command: Option<Command>,

  /// Script to run when no subcommand is given.
  script: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
  /// Execute a Suzume file [default]
  Run { script: PathBuf },
  /// Disassemble a Suzume file.
  #[clap(visible_alias = "dis")]
  Disassemble { script: PathBuf },
  Repl,
}

fn main() -> ExitCode {
  let app = App::parse();

  let command = match (app.command, app.script) {
    (Some(command), _) => command,
    (None, Some(script)) => Command::Run { script },
    (None, None) => Command::Repl,
  };

  let result = match command {
    Command::Run { script } => handle_run(&script),
    Command::Disassemble { script } => handle_disassemble(&script),
    Command::Repl => handle_repl(),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(error) => {
      eprintln!("{error}");
      ExitCode::FAILURE
    }
  }
}

fn load(script: &Path) -> anyhow::Result<(Suzume, String, String)> {
  let source = std::fs::read_to_string(script)
    .map_err(|_| anyhow::anyhow!("could not open file \"{}\"", script.display()))?;

  let mut suzume = Suzume::new();
  // imports resolve next to the entry script
  suzume.set_root(script.parent().map(Path::to_path_buf));

  let name = script
    .file_stem()
    .map(|stem| stem.to_string_lossy().into_owned())
    .unwrap_or_else(|| "main".to_string());

  Ok((suzume, name, source))
}

fn handle_run(script: &Path) -> anyhow::Result<()> {
  let (mut suzume, name, source) = load(script)?;
  suzume
    .eval(&name, &source)
    .map_err(|report| anyhow::anyhow!(report.to_string()))
}

fn handle_disassemble(script: &Path) -> anyhow::Result<()> {
  let (mut suzume, name, source) = load(script)?;
  let listing = suzume
    .disassemble(&name, &source)
    .map_err(|report| anyhow::anyhow!(report.to_string()))?;
  println!("{listing}");
  Ok(())
}

fn handle_repl() -> anyhow::Result<()> {
  let mut editor = rustyline::Editor::<()>::new()?;
  let mut suzume = Suzume::new();

  loop {
    match editor.readline("> ") {
      Ok(line) => {
        if line.trim().is_empty() {
          continue;
        }
        editor.add_history_entry(&line);
        // every line extends the same module, so definitions persist
        if let Err(report) = suzume.eval("repl", &line) {
          eprintln!("{report}");
        }
      }
      Err(rustyline::error::ReadlineError::Interrupted)
      | Err(rustyline::error::ReadlineError::Eof) => return Ok(()),
      Err(error) => return Err(error.into()),
    }
  }
}
