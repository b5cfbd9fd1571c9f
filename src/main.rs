// src/main.rs
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use log::{error, info};

use flowcal::calibration::{handle_json, CalibrationPipeline, ExperimentResponse};

/// Runs one orifice/Pitot calibration request and prints the JSON response.
#[derive(Parser, Debug)]
#[command(name = "flowcal", version, about)]
struct Args {
    /// Request JSON file; stdin when omitted.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Pretty-print the response.
    #[arg(long)]
    pretty: bool,

    /// Also write the decoded chart and report into this directory.
    #[arg(long)]
    out_dir: Option<PathBuf>,
}

fn read_request(input: Option<&Path>) -> Result<Vec<u8>> {
    match input {
        Some(path) => fs::read(path).with_context(|| format!("reading {}", path.display())),
        None => {
            let mut body = Vec::new();
            io::stdin()
                .read_to_end(&mut body)
                .context("reading request from stdin")?;
            Ok(body)
        }
    }
}

fn write_artifacts(
    dir: &Path,
    response: &ExperimentResponse,
    generated_at: DateTime<Utc>,
) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let stamp = generated_at.format("%d%m%Y_%H%M%S");
    let graph_path = dir.join(format!("pitot_tube_graph_{stamp}.png"));
    let pdf_path = dir.join(format!("pitot_tube_report_{stamp}.pdf"));
    fs::write(&graph_path, response.decode_graph().context("decoding graph_base64")?)
        .with_context(|| format!("writing {}", graph_path.display()))?;
    fs::write(&pdf_path, response.decode_pdf().context("decoding pdf_base64")?)
        .with_context(|| format!("writing {}", pdf_path.display()))?;
    info!("wrote {} and {}", graph_path.display(), pdf_path.display());
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{text}").context("writing response")?;
    Ok(())
}

fn run(args: &Args) -> Result<bool> {
    let body = read_request(args.input.as_deref())?;
    let generated_at = Utc::now();
    let pipeline = CalibrationPipeline::default();
    match handle_json(&pipeline, &body, generated_at) {
        Ok(response) => {
            if let Some(dir) = &args.out_dir {
                write_artifacts(dir, &response, generated_at)?;
            }
            print_json(&response, args.pretty)?;
            Ok(true)
        }
        Err(failure) => {
            error!("{}: {}", failure.kind, failure.error);
            print_json(&failure, args.pretty)?;
            Ok(false)
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err:#}");
            eprintln!("flowcal: {err:#}");
            ExitCode::FAILURE
        }
    }
}
