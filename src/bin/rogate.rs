use rogate::config::{DEFAULT_MODULE_NAME, PRELOAD_OPTION};
use rogate::host::{Cluster, Settings};
use std::fs;
use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() {
    init_logging();
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .try_init();
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Err("missing command".into());
    }
    match args[1].as_str() {
        "run" => cmd_run(&args[2..]),
        "status" => cmd_status(&args[2..]),
        other => {
            print_usage();
            Err(format!("unknown command: {other}"))
        }
    }
}

fn cmd_run(args: &[String]) -> Result<(), String> {
    let script = parse_flag_value(args, "--script").ok_or("--script is required")?;
    let cluster = boot(args)?;
    let text = fs::read_to_string(&script).map_err(|e| format!("read {script}: {e}"))?;

    let mut backend = cluster.connect("postgres");
    let mut failures = 0usize;
    for sql in split_statements(&text) {
        match backend.execute(&sql) {
            Ok(outcome) => match outcome.value {
                Some(value) => println!("{}\t{}", outcome.tag, value),
                None => println!("{}", outcome.tag),
            },
            Err(err) => {
                failures += 1;
                println!("ERROR [{}]: {}", err.code().as_str(), err);
            }
        }
    }
    drop(backend);
    cluster.shutdown();
    if failures > 0 {
        return Err(format!("{failures} statement(s) failed"));
    }
    Ok(())
}

fn cmd_status(args: &[String]) -> Result<(), String> {
    let cluster = boot(args)?;
    let status = cluster.module().control().status();
    let json = serde_json::to_string_pretty(&status).map_err(|e| format!("encode status: {e}"))?;
    println!("{json}");
    Ok(())
}

/// Starts a cluster from `--settings`, or with the module preloaded when no
/// file is given.
fn boot(args: &[String]) -> Result<Cluster, String> {
    let settings = match parse_flag_value(args, "--settings") {
        Some(path) => Settings::load(Path::new(&path)).map_err(|e| format!("{path}: {e}"))?,
        None => Settings::new().with(PRELOAD_OPTION, DEFAULT_MODULE_NAME),
    };
    Cluster::builder(settings)
        .start()
        .map_err(|e| format!("start cluster: {e}"))
}

/// Splits a script on `;` and drops `--` line comments. Both are taken
/// literally inside single-quoted strings.
fn split_statements(text: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\'' => {
                in_quote = !in_quote;
                current.push(ch);
            }
            '-' if !in_quote && chars.peek() == Some(&'-') => {
                while let Some(&next) = chars.peek() {
                    if next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            ';' if !in_quote => push_statement(&mut statements, &mut current),
            _ => current.push(ch),
        }
    }
    push_statement(&mut statements, &mut current);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let sql = current.trim();
    if !sql.is_empty() {
        statements.push(sql.to_string());
    }
    current.clear();
}

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
    for idx in 0..args.len() {
        if args[idx] == flag {
            return args.get(idx + 1).cloned();
        }
    }
    None
}

fn print_usage() {
    eprintln!("usage:");
    eprintln!("  rogate run --script <statements.sql> [--settings <server.conf>]");
    eprintln!("  rogate status [--settings <server.conf>]");
}
