// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod config;
mod input;

use std::{fs::OpenOptions, io, process};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use blocklog::{json, line, ConfigError, Logger, PipelineConfig, PipelineError, StreamWriter};
use config::{Output, OutputFormat, PipeConfig};

const EXIT_FAILURE: i32 = 1;
const EXIT_CONFIG: i32 = 2;

#[derive(Debug, thiserror::Error)]
enum PipeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to open output {path}: {source}")]
    Output {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read stdin: {0}")]
    Input(#[source] io::Error),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl PipeError {
    fn exit_code(&self) -> i32 {
        match self {
            PipeError::Config(_) => EXIT_CONFIG,
            _ => EXIT_FAILURE,
        }
    }
}

#[tokio::main]
pub async fn main() {
    let (config, pipeline_config) = match load_config() {
        Ok(configs) => configs,
        Err(e) => {
            eprintln!("blocklog-pipe: {e}");
            process::exit(e.exit_code());
        }
    };

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level)
                .expect("could not parse log level in configuration"),
        )
        .with_writer(io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let result = match start_logger(&config, &pipeline_config) {
        Ok(logger) => {
            info!(
                "Forwarding stdin as {:?} records to {:?}",
                config.format, config.output
            );
            run(BufReader::new(tokio::io::stdin()), logger).await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        error!("{e}");
        process::exit(e.exit_code());
    }
}

fn load_config() -> Result<(PipeConfig, PipelineConfig), PipeError> {
    Ok((PipeConfig::from_env()?, PipelineConfig::from_env()?))
}

/// Logs every line of `input` until EOF, then shuts `logger` down.
async fn run<R>(input: R, logger: Logger) -> Result<(), PipeError>
where
    R: AsyncBufRead + Unpin,
{
    let read_result = forward_lines(input, &logger).await;

    // flush what was read even when the input failed
    let shutdown_result = logger.shutdown().await;

    let forwarded = read_result?;
    debug!("Forwarded {forwarded} records");
    shutdown_result?;
    Ok(())
}

async fn forward_lines<R>(mut input: R, logger: &Logger) -> Result<u64, PipeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut forwarded: u64 = 0;

    loop {
        buf.clear();
        let n = input
            .read_until(b'\n', &mut buf)
            .await
            .map_err(PipeError::Input)?;
        if n == 0 {
            return Ok(forwarded);
        }

        // invalid UTF-8 is replaced, never fatal
        let line = String::from_utf8_lossy(&buf);
        let Some(submission) = input::parse_line(&line) else {
            continue;
        };
        if let Err(e) = logger.submit(submission) {
            warn!("Log pipeline stopped accepting records: {e}");
            return Ok(forwarded);
        }
        forwarded += 1;
    }
}

fn start_logger(config: &PipeConfig, pipeline_config: &PipelineConfig) -> Result<Logger, PipeError> {
    match &config.output {
        // stdout stays open for the rest of the process
        Output::Stdout => {
            let writer = StreamWriter::with_on_close(io::stdout(), |_stdout| Ok(()));
            Ok(spawn_format(config.format, writer, pipeline_config))
        }
        Output::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| PipeError::Output {
                    path: path.display().to_string(),
                    source,
                })?;
            let writer = StreamWriter::new(io::BufWriter::new(file));
            Ok(spawn_format(config.format, writer, pipeline_config))
        }
    }
}

fn spawn_format<W>(
    format: OutputFormat,
    writer: StreamWriter<W>,
    pipeline_config: &PipelineConfig,
) -> Logger
where
    W: io::Write + Send + 'static,
{
    match format {
        OutputFormat::Text => line::spawn(writer, pipeline_config),
        OutputFormat::Json => json::spawn(writer, pipeline_config),
    }
}
