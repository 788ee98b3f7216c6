#![forbid(unsafe_code)]

use std::{
    fs,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    process::Command,
    time::Duration,
};

use clap::{Parser, Subcommand};
use covenant_core::{compile, Compilation, Dialect, ModuleSystem, Options, VerifyLevel};
use miette::IntoDiagnostic;
use notify::{RecursiveMode, Watcher};

mod report;

#[derive(Parser, Debug)]
#[command(name = "covenant", version, about = "Covenant contract-language compiler")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
enum TargetArg {
    #[default]
    Javascript,
    Typescript,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
enum ModuleArg {
    #[default]
    Esm,
    Commonjs,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
enum VerifyArg {
    Full,
    #[default]
    Runtime,
    Trusted,
}

#[derive(clap::Args, Clone, Debug)]
struct CompileFlags {
    /// Target dialect
    #[arg(long, value_enum, default_value_t = TargetArg::Javascript)]
    target: TargetArg,

    /// Emitted module system
    #[arg(long, value_enum, default_value_t = ModuleArg::Esm)]
    module: ModuleArg,

    /// Disable runtime contract instrumentation
    #[arg(long, default_value_t = false)]
    no_contracts: bool,

    /// Verification level; `trusted` suppresses guard emission
    #[arg(long, value_enum, default_value_t = VerifyArg::Runtime)]
    verify_level: VerifyArg,

    /// Reserved: source map emission
    #[arg(long, default_value_t = false)]
    source_map: bool,

    /// Reserved: minified output
    #[arg(long, default_value_t = false)]
    minify: bool,

    /// Exit after the first pass that reports errors
    #[arg(long, default_value_t = false)]
    stop_on_first_error: bool,

    /// Write a machine-readable diagnostics report (JSON)
    #[arg(long)]
    emit_diagnostics_json: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Compile a source file to target text
    Compile {
        /// Input .cov file
        path: PathBuf,

        /// Output path (default: input with the target suffix)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        flags: CompileFlags,

        /// Recompile whenever the input changes
        #[arg(long, default_value_t = false)]
        watch: bool,
    },

    /// Parse and check a source file without emitting target text
    Check {
        /// Input .cov file
        path: PathBuf,

        #[command(flatten)]
        flags: CompileFlags,
    },

    /// Compile and execute via the host interpreter
    Run {
        /// Input .cov file
        path: PathBuf,

        #[command(flatten)]
        flags: CompileFlags,
    },

    /// Interactive session; chunks are compiled when brackets balance
    Repl {
        #[command(flatten)]
        flags: CompileFlags,
    },
}

fn build_options(flags: &CompileFlags, file_name: &str) -> Options {
    Options {
        dialect: match flags.target {
            TargetArg::Javascript => Dialect::JavaScript,
            TargetArg::Typescript => Dialect::TypeScript,
        },
        module_system: match flags.module {
            ModuleArg::Esm => ModuleSystem::Esm,
            ModuleArg::Commonjs => ModuleSystem::CommonJs,
        },
        runtime_contracts: !flags.no_contracts,
        verify_level: match flags.verify_level {
            VerifyArg::Full => VerifyLevel::Full,
            VerifyArg::Runtime => VerifyLevel::Runtime,
            VerifyArg::Trusted => VerifyLevel::Trusted,
        },
        source_map: flags.source_map,
        minify: flags.minify,
        stop_on_first_error: flags.stop_on_first_error,
        file_name: file_name.to_string(),
    }
}

fn print_diagnostics(compilation: &Compilation, source: &str, file: &str) {
    for line in compilation.render_diagnostics(source, file) {
        eprintln!("{line}");
    }
}

fn default_output(input: &Path, target: TargetArg) -> PathBuf {
    let ext = match target {
        TargetArg::Javascript => "js",
        TargetArg::Typescript => "ts",
    };
    input.with_extension(ext)
}

fn compile_file(path: &Path, flags: &CompileFlags) -> miette::Result<(String, Compilation)> {
    let source = fs::read_to_string(path).into_diagnostic()?;
    let file_name = path.display().to_string();
    let options = build_options(flags, &file_name);
    let compilation = compile(&source, &options);
    Ok((source, compilation))
}

fn emit_json_if_requested(
    flags: &CompileFlags,
    path: &Path,
    source: &str,
    compilation: &Compilation,
) -> miette::Result<()> {
    if let Some(json_path) = &flags.emit_diagnostics_json {
        let rep = report::build_report(&path.display().to_string(), source, compilation);
        report::write_report(json_path, &rep)?;
    }
    Ok(())
}

fn cmd_compile(
    path: &Path,
    output: Option<&Path>,
    flags: &CompileFlags,
) -> miette::Result<i32> {
    let (source, compilation) = compile_file(path, flags)?;
    print_diagnostics(&compilation, &source, &path.display().to_string());
    emit_json_if_requested(flags, path, &source, &compilation)?;

    if !compilation.success() {
        return Ok(1);
    }

    let out_path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_output(path, flags.target));
    let text = compilation.output.as_deref().unwrap_or_default();
    fs::write(&out_path, text).into_diagnostic()?;
    println!("wrote {}", out_path.display());
    Ok(0)
}

fn cmd_watch(path: &Path, output: Option<&Path>, flags: &CompileFlags) -> miette::Result<i32> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx).into_diagnostic()?;
    watcher
        .watch(path, RecursiveMode::NonRecursive)
        .into_diagnostic()?;

    let _ = cmd_compile(path, output, flags);
    println!("watching {} for changes...", path.display());

    loop {
        match rx.recv() {
            Ok(_event) => {
                // Editors fire bursts of events per save; coalesce them.
                while rx.recv_timeout(Duration::from_millis(50)).is_ok() {}
                let _ = cmd_compile(path, output, flags);
            }
            Err(_) => return Ok(0),
        }
    }
}

fn cmd_check(path: &Path, flags: &CompileFlags) -> miette::Result<i32> {
    let source = fs::read_to_string(path).into_diagnostic()?;
    let file_name = path.display().to_string();
    let options = build_options(flags, &file_name);
    let compilation = covenant_core::check(&source, &options);
    print_diagnostics(&compilation, &source, &file_name);
    emit_json_if_requested(flags, path, &source, &compilation)?;

    if compilation.success() {
        println!("ok");
        Ok(0)
    } else {
        Ok(1)
    }
}

/// Extension node accepts for the chosen module system regardless of any
/// surrounding package.json.
fn runnable_extension(module: ModuleArg) -> &'static str {
    match module {
        ModuleArg::Esm => "mjs",
        ModuleArg::Commonjs => "cjs",
    }
}

fn cmd_run(path: &Path, flags: &CompileFlags) -> miette::Result<i32> {
    let (source, compilation) = compile_file(path, flags)?;
    print_diagnostics(&compilation, &source, &path.display().to_string());
    if !compilation.success() {
        return Ok(1);
    }

    let out_path = path.with_extension(runnable_extension(flags.module));
    fs::write(&out_path, compilation.output.as_deref().unwrap_or_default())
        .into_diagnostic()?;

    let status = Command::new("node")
        .arg(&out_path)
        .status()
        .into_diagnostic()?;
    Ok(status.code().unwrap_or(1))
}

/// Net bracket depth of a chunk; the REPL submits once it returns to zero.
fn bracket_balance(text: &str) -> i64 {
    let mut depth = 0i64;
    let mut in_string = false;
    let mut escaped = false;
    for ch in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '(' | '[' => depth += 1,
            '}' | ')' | ']' => depth -= 1,
            _ => {}
        }
    }
    depth
}

fn starts_declaration(chunk: &str) -> bool {
    let trimmed = chunk.trim_start();
    [
        "fn ", "pure ", "extern ", "let ", "type ", "struct ", "enum ", "trait ", "impl ",
        "contract ", "intent ", "effect ", "capability ", "import ", "export ",
    ]
    .iter()
    .any(|kw| trimmed.starts_with(kw))
}

fn cmd_repl(flags: &CompileFlags) -> miette::Result<i32> {
    let options = build_options(flags, "<repl>");
    let mut session = String::new();
    let mut chunk = String::new();
    let mut eval_counter = 0u32;

    println!("covenant repl; end a chunk by balancing brackets, ctrl-d to exit");
    print!("> ");
    io::stdout().flush().into_diagnostic()?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.into_diagnostic()?;
        chunk.push_str(&line);
        chunk.push('\n');

        if bracket_balance(&chunk) > 0 {
            print!(". ");
            io::stdout().flush().into_diagnostic()?;
            continue;
        }

        let trimmed = chunk.trim();
        if trimmed.is_empty() {
            chunk.clear();
            print!("> ");
            io::stdout().flush().into_diagnostic()?;
            continue;
        }

        // Bare expressions are not part of the grammar; wrap them in a
        // throwaway function so the core never has to special-case them.
        let (candidate, entry) = if starts_declaration(trimmed) {
            (format!("{session}{chunk}"), None)
        } else {
            eval_counter += 1;
            let name = format!("__repl_eval_{eval_counter}");
            let body = if trimmed.ends_with(';') || trimmed.ends_with('}') {
                trimmed.to_string()
            } else {
                format!("let __it = {trimmed};")
            };
            (
                format!("{session}fn {name}() -> Void @effect[IO] {{ {body} }}\n"),
                Some(name),
            )
        };

        let compilation = compile(&candidate, &options);
        if !compilation.success() {
            print_diagnostics(&compilation, &candidate, "<repl>");
        } else {
            if let Some(mut text) = compilation.output {
                if let Some(entry) = &entry {
                    text.push_str(&format!("\n{entry}();\n"));
                }
                let tmp = std::env::temp_dir()
                    .join(format!("covenant-repl.{}", runnable_extension(flags.module)));
                fs::write(&tmp, text).into_diagnostic()?;
                let _ = Command::new("node").arg(&tmp).status();
            }
            if entry.is_none() {
                // Declarations become part of the session.
                session.push_str(&chunk);
            }
        }

        chunk.clear();
        print!("> ");
        io::stdout().flush().into_diagnostic()?;
    }

    Ok(0)
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    let code = match &cli.cmd {
        Cmd::Compile {
            path,
            output,
            flags,
            watch,
        } => {
            if *watch {
                cmd_watch(path, output.as_deref(), flags)?
            } else {
                cmd_compile(path, output.as_deref(), flags)?
            }
        }
        Cmd::Check { path, flags } => cmd_check(path, flags)?,
        Cmd::Run { path, flags } => cmd_run(path, flags)?,
        Cmd::Repl { flags } => cmd_repl(flags)?,
    };
    std::process::exit(code);
}
