use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chtl_codegen::{CompilerOutput, PassthroughCompiler};
use chtl_parser::{CompileError, CompileOptions};

#[derive(Parser)]
#[command(name = "chtl")]
#[command(about = "CHTL compiler: hypertext templates to HTML + CSS + JS")]
#[command(version)]
struct Cli {
    /// More logging (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a .chtl file to HTML + CSS + JS
    Build {
        /// Input .chtl file
        path: PathBuf,

        /// Output directory (defaults to the input's directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the output as JSON instead of writing files
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        modules: ModuleArgs,
    },

    /// Check a .chtl file for errors without generating output
    Check {
        /// Input .chtl file
        path: PathBuf,

        #[command(flatten)]
        modules: ModuleArgs,
    },

    /// Show how the scanner splits a .chtl file into markup and fragments
    Scan {
        /// Input .chtl file
        path: PathBuf,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct ModuleArgs {
    /// Extra directory to search for imports (repeatable)
    #[arg(short = 'I', long = "module-dir")]
    module_dirs: Vec<PathBuf>,
}

impl ModuleArgs {
    fn options(self) -> CompileOptions {
        CompileOptions {
            module_dirs: self.module_dirs,
            ..CompileOptions::default()
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Build {
            path,
            output,
            json,
            modules,
        } => cmd_build(&path, output.as_deref(), json, modules.options()),
        Command::Check { path, modules } => cmd_check(&path, modules.options()),
        Command::Scan { path, json } => cmd_scan(&path, json),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Print a compile error and exit.
fn fail(path: &Path, e: &CompileError) -> ! {
    eprintln!("error[{}]: {e}", e.kind());
    match e.position() {
        Some((line, column)) => eprintln!("  --> {}:{line}:{column}", path.display()),
        None => eprintln!("  --> {}", path.display()),
    }
    std::process::exit(1);
}

fn compile(path: &Path, options: &CompileOptions) -> CompilerOutput {
    let doc = match chtl_parser::compile_file(path, options) {
        Ok(doc) => doc,
        Err(e) => fail(path, &e),
    };

    match chtl_codegen::compile(&doc, &PassthroughCompiler) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("error[Codegen]: {}", e.message);
            std::process::exit(1);
        }
    }
}

fn cmd_build(path: &Path, output_dir: Option<&Path>, json: bool, options: CompileOptions) {
    let output = compile(path, &options);

    if json {
        match serde_json::to_string_pretty(&output) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Error encoding output: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("index");
    let dir = output_dir
        .or_else(|| path.parent())
        .unwrap_or(Path::new("."));
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("Error creating {}: {e}", dir.display());
        std::process::exit(1);
    }

    let html_path = dir.join(format!("{stem}.html"));
    write_file(&html_path, &page(&output));
    info!(path = %html_path.display(), "wrote page");

    eprintln!("Built: {}", html_path.display());
}

/// The HTML output with the stylesheet and script inlined at the end.
fn page(output: &CompilerOutput) -> String {
    let mut html = output.html.clone();
    if !output.css.is_empty() {
        html.push_str(&format!("<style>\n{}</style>\n", output.css));
    }
    if !output.js.is_empty() {
        html.push_str(&format!("<script>\n{}</script>\n", output.js));
    }
    html
}

fn write_file(path: &Path, content: &str) {
    if let Err(e) = std::fs::write(path, content) {
        eprintln!("Error writing {}: {e}", path.display());
        std::process::exit(1);
    }
}

fn cmd_check(path: &Path, options: CompileOptions) {
    compile(path, &options);
    eprintln!("OK: {}", path.display());
}

fn cmd_scan(path: &Path, json: bool) {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading {}: {e}", path.display());
            std::process::exit(1);
        }
    };

    let scanned = match chtl_scanner::scan(&source) {
        Ok(scanned) => scanned,
        Err(e) => fail(path, &CompileError::from(e)),
    };

    if json {
        match serde_json::to_string_pretty(&scanned) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Error encoding scan result: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    println!("{}", scanned.markup);
    for fragment in scanned.fragments.iter() {
        println!();
        println!(
            "{} ({:?}, line {}, column {}):",
            fragment.placeholder, fragment.kind, fragment.line, fragment.column
        );
        println!("{}", fragment.content);
    }
}
