use clap::{Parser, Subcommand};
use log::{Level, LevelFilter, Log, Metadata, Record};
use puremix_interp::driver::{spans, SpanRef};
use puremix_interp::{Context, Interpreter, Options};
use puremix_lexer::{classify, Scanner, SpanKind};
use puremix_parser::{analyze, ScriptParser};
use std::path::Path;

#[derive(Parser)]
#[command(name = "puremix")]
#[command(about = "PureMix template interpreter")]
#[command(version)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Silence all log output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a template against a JSON context
    Render {
        /// Input template file
        path: String,

        /// JSON file holding the context object
        #[arg(short, long)]
        context: Option<String>,

        /// Value of `environment` when the context does not set one
        #[arg(long)]
        env: Option<String>,

        /// Maximum template nesting depth
        #[arg(long)]
        max_depth: Option<usize>,

        /// Send every expression through the full pipeline
        #[arg(long)]
        no_fast_paths: bool,

        /// Write the rendered HTML here instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Print the tokens of every span in a template
    Tokens {
        /// Input template file
        path: String,
    },

    /// Print the analyzed AST of every expression span in a template
    Ast {
        /// Input template file
        path: String,
    },

    /// Check every span of a template for lex and parse errors
    Check {
        /// Input template file
        path: String,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose, cli.quiet);

    match cli.command {
        Command::Render {
            path,
            context,
            env,
            max_depth,
            no_fast_paths,
            output,
        } => {
            let mut options = Options::default().fast_paths(!no_fast_paths);
            if let Some(depth) = max_depth {
                options = options.max_depth(depth);
            }
            cmd_render(&path, context.as_deref(), env, options, output.as_deref());
        }
        Command::Tokens { path } => cmd_tokens(&path),
        Command::Ast { path } => cmd_ast(&path),
        Command::Check { path } => cmd_check(&path),
    }
}

// =============================================================================
// Logging
// =============================================================================

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = match record.level() {
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Info => "info",
            Level::Debug => "debug",
            Level::Trace => "trace",
        };
        eprintln!("[{level} {}] {}", record.target(), record.args());
    }

    fn flush(&self) {}
}

fn init_logger(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => LevelFilter::Off,
        (false, 0) => LevelFilter::Warn,
        (false, 1) => LevelFilter::Info,
        (false, 2) => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

// =============================================================================
// Commands
// =============================================================================

fn read_source(path: &str) -> String {
    let p = Path::new(path);
    if !p.exists() {
        eprintln!("Error: file not found: {path}");
        std::process::exit(1);
    }
    match std::fs::read_to_string(p) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading {path}: {e}");
            std::process::exit(1);
        }
    }
}

fn load_context(path: Option<&str>) -> Context {
    let Some(path) = path else {
        return Context::new();
    };
    let json: serde_json::Value = match serde_json::from_str(&read_source(path)) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error parsing {path}: {e}");
            std::process::exit(1);
        }
    };
    match Context::from_json(json) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error in {path}: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_render(
    path: &str,
    context: Option<&str>,
    env: Option<String>,
    options: Options,
    output: Option<&str>,
) {
    let source = read_source(path);
    let mut ctx = load_context(context);
    if let Some(env) = env {
        ctx = ctx.with_env(env);
    }

    let html = Interpreter::new(options).render(&source, &mut ctx);

    match output {
        Some(out) => {
            if let Err(e) = std::fs::write(out, &html) {
                eprintln!("Error writing {out}: {e}");
                std::process::exit(1);
            }
            log::info!("rendered {path} to {out}");
        }
        None => print!("{html}"),
    }
}

fn cmd_tokens(path: &str) {
    let source = read_source(path);
    let options = Options::default();

    for span in spans(&source, &options) {
        let (line, column) = line_column(&source, span.offset);
        println!("span {line}:{column} {}", span.raw);
        match Scanner::tokenize(span.raw) {
            Ok(tokens) => {
                for token in tokens {
                    println!("  {:?} {:?}", token.kind, token.text);
                }
            }
            Err(e) => println!("  {e}"),
        }
    }
}

fn cmd_ast(path: &str) {
    let source = read_source(path);
    let options = Options::default();

    for span in spans(&source, &options) {
        let (line, column) = line_column(&source, span.offset);
        println!("span {line}:{column} {}", span.raw);
        match puremix_parser::Parser::parse(span.raw) {
            Ok(tree) => println!("{:#?}", analyze(tree)),
            Err(e) => println!("  {e}"),
        }
    }
}

fn cmd_check(path: &str) {
    let source = read_source(path);
    let options = Options::default();

    let mut failures = 0usize;
    let mut count = 0usize;
    for span in spans(&source, &options) {
        count += 1;
        if let Err(message) = check_span(&span) {
            let (line, column) = line_column(&source, span.offset);
            eprintln!("{path}:{line}:{column}: {message}");
            failures += 1;
        }
    }

    if failures > 0 {
        eprintln!("{failures} of {count} spans failed");
        std::process::exit(1);
    }
    eprintln!("OK: {path} ({count} spans)");
}

/// Lex and parse one span the way the interpreter would.
fn check_span(span: &SpanRef<'_>) -> Result<(), String> {
    match classify(span.inner) {
        SpanKind::CodeBlock => ScriptParser::parse(span.inner)
            .map(drop)
            .map_err(|e| e.to_string()),
        SpanKind::Expression => match puremix_parser::Parser::parse(span.raw) {
            Ok(_) => Ok(()),
            Err(e) => ScriptParser::parse_expression(span.inner)
                .map(drop)
                .map_err(|_| e.to_string()),
        },
    }
}

/// 1-based line and column of a byte offset.
fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let column = before
        .rfind('\n')
        .map_or(before.chars().count(), |nl| before[nl + 1..].chars().count())
        + 1;
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_span(source: &str) -> Result<(), String> {
        let options = Options::default();
        let span = spans(source, &options).next().unwrap();
        check_span(&span)
    }

    #[test]
    fn test_line_column() {
        assert_eq!(line_column("ab\ncd{x}", 5), (2, 3));
        assert_eq!(line_column("{x}", 0), (1, 1));
    }

    #[test]
    fn test_check_accepts_script_only_expressions() {
        assert_eq!(first_span("<p>{count > 1 ? 'a' : 'b'}</p>"), Ok(()));
        assert_eq!(first_span("{ const a = 1; __export = { a }; }"), Ok(()));
    }

    #[test]
    fn test_check_reports_broken_code_block() {
        assert!(first_span("{ const a = ; }").is_err());
    }
}
