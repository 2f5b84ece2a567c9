use std::fs::File;
use std::process::ExitCode;
use std::sync::Mutex;

use clap::Parser;
use flowshark::config::{Cli, Command};
use flowshark::ui::{self, escape_bytes, hex_dump};
use flowshark::{flows_from_file, verify_file, Error, FlowQuery, Result};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(&cli) {
        eprintln!("flowshark: {e}");
        return ExitCode::FAILURE;
    }
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("flowshark: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .map_err(|e| Error::Config(format!("--log-level: {e}")))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match (&cli.log_file, &cli.command) {
        (Some(path), _) => {
            let file = File::create(path).map_err(|e| {
                Error::Config(format!("cannot open log file {}: {e}", path.display()))
            })?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        // the browser owns the terminal
        (None, Command::Browse { .. }) => builder.with_writer(std::io::sink).init(),
        (None, _) => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = cli.settings()?;

    match cli.command {
        Command::List { capture } => {
            let flows = flows_from_file(&capture, &settings)?;
            print!("{}", flows.describe());
            if !flows.issues().is_empty() {
                eprintln!(
                    "{} issues, see `flowshark issues {}`",
                    flows.issues().len(),
                    capture.display()
                );
            }
        }
        Command::Show {
            capture,
            key,
            fwd,
            rev,
            hex,
        } => {
            let flows = flows_from_file(&capture, &settings)?;
            let query = FlowQuery {
                key,
                forward_prefix: fwd.map(String::into_bytes),
                reverse_prefix: rev.map(String::into_bytes),
            };
            let Some(flow) = flows.find(&query) else {
                eprintln!("no matching flow");
                return Ok(ExitCode::from(1));
            };
            let render = |data: &[u8]| if hex { hex_dump(data) } else { escape_bytes(data) };
            println!("{} -> {} ({} packets)", flow.initiator, flow.responder, flow.packets.len());
            println!("== forward ({} bytes) ==", flow.forward.len());
            println!("{}", render(&flow.forward));
            println!("== reverse ({} bytes) ==", flow.reverse.len());
            println!("{}", render(&flow.reverse));
        }
        Command::Issues { capture } => {
            let flows = flows_from_file(&capture, &settings)?;
            for issue in flows.issues() {
                println!("{issue}");
            }
        }
        Command::Verify { capture } => {
            let report = verify_file(&capture, &settings)?;
            println!("{} frames, {} failed to decode", report.frames, report.failures);
            if let Some((index, reason)) = &report.first_failure {
                println!("first failure: frame #{index}: {reason}");
            }
            if report.premature_end {
                println!("capture ends in the middle of a frame");
            }
            if !report.is_clean() {
                return Ok(ExitCode::from(1));
            }
        }
        Command::Browse { capture } => ui::browse(capture, settings).await?,
    }
    Ok(ExitCode::SUCCESS)
}
