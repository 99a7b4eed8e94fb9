use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use opal_core::CompilationArtifact;
use wasmi::{Engine, Linker, Module, Store};

#[derive(Parser, Debug)]
#[command(name = "opal", version, about = "Compiler for the Opal language", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse and type-check a source file without emitting code
    Check { source: PathBuf },
    /// Compile a source file to a wasm module
    Build {
        source: PathBuf,
        /// Output path (defaults to out/<stem>.wasm)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compile and execute, forwarding the program's exit code
    Run {
        source: PathBuf,
        /// Also write the compiled module to this path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Check { source } => check(&source),
        Command::Build { source, output } => build(&source, output),
        Command::Run { source, output } => run(&source, output),
    }
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read input file {}", path.display()))
}

fn check(source: &Path) -> Result<()> {
    let text = read_source(source)?;
    let semantics = opal_core::analyze(&text)?;
    if semantics.has_errors() {
        for diagnostic in &semantics.diagnostics {
            eprintln!("{diagnostic}");
        }
        process::exit(1);
    }
    println!("ok: {}", source.display());
    Ok(())
}

fn build(source: &Path, output: Option<PathBuf>) -> Result<()> {
    let text = read_source(source)?;
    let artifact = opal_core::compile(&text)?;
    let output = output.unwrap_or_else(|| default_output(source));
    write_output(&output, &artifact.wasm)?;
    Ok(())
}

fn run(source: &Path, output: Option<PathBuf>) -> Result<()> {
    let text = read_source(source)?;
    let artifact = opal_core::compile(&text)?;
    if let Some(output) = output {
        write_output(&output, &artifact.wasm)?;
    }
    let code = execute(&artifact)?;
    println!("program exited with {code}");
    process::exit(code);
}

fn default_output(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "out".into());
    let mut path = PathBuf::from("out");
    path.push(stem);
    path.set_extension("wasm");
    path
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }
    fs::write(path, bytes)
        .with_context(|| format!("failed to write output file {}", path.display()))?;
    Ok(())
}

fn execute(artifact: &CompilationArtifact) -> Result<i32> {
    let engine = Engine::default();
    let module = Module::new(&engine, &artifact.wasm).context("failed to load wasm artifact")?;
    let mut linker: Linker<()> = Linker::new(&engine);

    // Host print functions; one line per printed value. A module that
    // never calls println simply leaves these definitions unused.
    let strings = artifact.strings.clone();
    linker
        .func_wrap("opal", "print_str", move |handle: i32| {
            match usize::try_from(handle).ok().and_then(|i| strings.get(i)) {
                Some(text) => println!("{text}"),
                // Null handle.
                None => println!(),
            }
        })
        .context("failed to define print_str")?;
    linker
        .func_wrap("opal", "print_i32", |value: i32| println!("{value}"))
        .context("failed to define print_i32")?;

    let mut store = Store::new(&engine, ());
    let instance = linker
        .instantiate(&mut store, &module)
        .context("failed to instantiate module")?
        .start(&mut store)
        .context("failed to start module")?;

    match instance.get_typed_func::<(), i32>(&store, "main") {
        Ok(main) => main.call(&mut store, ()).context("failed to execute main"),
        Err(_) => {
            let main = instance
                .get_typed_func::<(), ()>(&store, "main")
                .context("exported main function missing or has wrong type")?;
            main.call(&mut store, ()).context("failed to execute main")?;
            Ok(0)
        }
    }
}
