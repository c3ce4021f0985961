use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::{ArgGroup, Parser};
use thiserror::Error;

use rlvm::bytecode::{AssemblyError, BytecodeError, DisassemblyError};
use rlvm::{assemble, disassemble, Bytecode, Status, Vm};

/// Assembles, disassembles and runs bytecode for the rlvm register machine.
#[derive(Parser, Debug)]
#[command(name = "rlvm", version, about)]
#[command(group(ArgGroup::new("mode").required(true).args(["compile", "disassemble", "run"])))]
struct Cli {
  /// Assemble the files into a single container
  #[arg(short, long)]
  compile: bool,

  /// Print a listing of each container
  #[arg(short, long)]
  disassemble: bool,

  /// Execute a container and exit with its status
  #[arg(short, long)]
  run: bool,

  /// Output file. Compiling defaults to `a.out`, the other modes to standard output
  #[arg(short, long, value_name = "OUT")]
  output: Option<PathBuf>,

  #[arg(required = true, value_name = "FILES")]
  files: Vec<PathBuf>,
}

#[derive(Debug, Error)]
enum CliError {
  #[error("{}: {source}", path.display())]
  Io { path: PathBuf, source: std::io::Error },
  #[error("{}: {source}", path.display())]
  Bytecode { path: PathBuf, source: BytecodeError },
  #[error(transparent)]
  Assembly(#[from] AssemblyError),
  #[error(transparent)]
  Disassembly(#[from] DisassemblyError),
  #[error("{0}")]
  Usage(String),
}

fn main() {
  let cli = Cli::parse();

  let code =
    match run(&cli) {
      Ok(code) => code,
      Err(error) => {
        eprintln!("rlvm: {}", error);
        1
      }
    };

  // `putc` output that has not met a newline is still buffered.
  let _ = std::io::stdout().flush();
  std::process::exit(code);
}

fn run(cli: &Cli) -> Result<i32, CliError> {
  if cli.compile {
    compile(&cli.files, cli.output.as_deref().unwrap_or_else(|| Path::new("a.out")))?;
    Ok(0)
  } else if cli.disassemble {
    let containers =
      cli.files
         .iter()
         .map(|path| read_bytecode(path))
         .collect::<Result<Vec<Bytecode>, CliError>>()?;
    let mut out = open_output(cli.output.as_deref())?;
    disassemble(&containers, &mut out)?;
    out.flush().map_err(|source| io_error(cli.output.as_deref(), source))?;
    Ok(0)
  } else {
    match cli.files.as_slice() {
      [path] => execute(path, cli.output.as_deref()),
      _ => Err(CliError::Usage("--run takes exactly one container".to_string()))
    }
  }
}

fn compile(files: &[PathBuf], output: &Path) -> Result<(), CliError> {
  let sources =
    files.iter()
         .map(|path| {
           std::fs::read_to_string(path).map_err(|source| CliError::Io { path: path.clone(), source })
         })
         .collect::<Result<Vec<String>, CliError>>()?;
  let units: Vec<&str> = sources.iter().map(String::as_str).collect();

  let bytecode = assemble(&units)?;

  let file = File::create(output).map_err(|source| io_error(Some(output), source))?;
  let mut writer = BufWriter::new(file);
  bytecode.write(&mut writer)
          .map_err(|source| CliError::Bytecode { path: output.to_path_buf(), source })?;
  writer.flush().map_err(|source| io_error(Some(output), source))
}

/// Runs the container and turns its final status into an exit code: the halt value for a clean
/// run, the fault's kind code otherwise.
fn execute(path: &Path, output: Option<&Path>) -> Result<i32, CliError> {
  let bytecode = read_bytecode(path)?;

  let mut vm = Vm::new(0, 0);
  if let Some(output) = output {
    let file = File::create(output).map_err(|source| io_error(Some(output), source))?;
    vm = vm.with_streams(Box::new(std::io::stdin()), Box::new(BufWriter::new(file)));
  }

  let status = bytecode.execute(&mut vm);
  match status {
    Status::Clean(value) => Ok(value as i32),
    fault => {
      eprintln!("rlvm: unhandled fault {} at {:#x}", fault, vm.ip());
      Ok(Into::<u8>::into(fault.kind()) as i32)
    }
  }
}

fn read_bytecode(path: &Path) -> Result<Bytecode, CliError> {
  let file = File::open(path).map_err(|source| io_error(Some(path), source))?;
  Bytecode::read(&mut BufReader::new(file))
    .map_err(|source| CliError::Bytecode { path: path.to_path_buf(), source })
}

fn open_output(output: Option<&Path>) -> Result<Box<dyn Write>, CliError> {
  match output {
    Some(path) => {
      let file = File::create(path).map_err(|source| io_error(Some(path), source))?;
      Ok(Box::new(BufWriter::new(file)))
    }
    None => Ok(Box::new(std::io::stdout()))
  }
}

fn io_error(path: Option<&Path>, source: std::io::Error) -> CliError {
  CliError::Io { path: path.unwrap_or_else(|| Path::new("<stdout>")).to_path_buf(), source }
}
