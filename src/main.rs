mod annotations;
mod backup;
mod config;
mod db;
mod gpa;
mod image_pdf;
mod ipc;
mod learning_path;
mod mindmap;
mod quiz;
mod rag;
mod recurrence;

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Student library sidecar: newline-delimited JSON requests on stdin,
/// one response line per request on stdout.
#[derive(Parser, Debug)]
#[command(name = "studyd", version)]
struct Cli {
    /// Library directory to open at startup.
    #[arg(long, env = "STUDYD_LIBRARY")]
    library: Option<PathBuf>,

    /// Tracing filter for the stderr log.
    #[arg(long, env = "STUDYD_LOG", default_value = "studyd=info")]
    log: String,
}

fn main() {
    let cli = Cli::parse();

    // stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("studyd=info")))
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let mut state = ipc::AppState::default();
    if let Some(library) = cli.library.as_deref() {
        if let Err(e) = ipc::open_library(&mut state, library) {
            tracing::error!(library = %library.display(), code = e.code, "{}", e.message);
        }
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "studyd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable request line");
                // Can't reply without id.
                let reply = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() },
                });
                let _ = writeln!(stdout, "{}", reply);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::info!("stdin closed, exiting");
}
