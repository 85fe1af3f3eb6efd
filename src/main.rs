//! mqtt-sink - command-line host for the MQTT event sink
//!
//! Reads a sink definition from TOML, then either validates it (`check`) or
//! publishes newline-delimited JSON events from stdin (`run`).

use clap::{Parser, Subcommand};
use mqtt_event_sink::observability::{init_logging, raise_level, LogSettings};
use mqtt_event_sink::{
    AttributeValue, DynamicContext, Event, MqttSink, PublishOutcome, SinkContext, SinkDefinition,
    SinkError, StreamDefinition, SINK_TYPE,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, error, info, warn};

/// Publish JSON events to an MQTT broker
#[derive(Parser)]
#[command(name = "mqtt-sink")]
#[command(about = "Publish newline-delimited JSON events to an MQTT broker")]
#[command(version)]
struct Cli {
    /// Sink definition file path
    #[arg(short, long, value_name = "FILE", env = "MQTT_SINK_CONFIG")]
    config: PathBuf,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the definition and print the resolved configuration
    Check,
    /// Connect and publish one event per stdin line until EOF or Ctrl-C
    Run,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = LogSettings::from_env();
    init_logging(
        raise_level(settings.level, cli.verbose),
        settings.format,
        settings.include_spans,
    );

    let definition = match load_definition(&cli.config) {
        Ok(definition) => definition,
        Err(e) => {
            error!("Failed to load sink definition: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Check => check(&definition),
        Commands::Run => run(&definition).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_definition(path: &Path) -> Result<SinkDefinition, Box<dyn std::error::Error>> {
    info!("Loading sink definition from: {}", path.display());
    Ok(SinkDefinition::load_from_file(path)?)
}

fn init_sink(definition: &SinkDefinition) -> Result<MqttSink, SinkError> {
    let context = SinkContext {
        app_name: definition.stream.app.clone(),
    };
    MqttSink::init(
        &StreamDefinition::new(definition.stream.id.clone()),
        &definition.option_holder(),
        &context,
    )
}

#[derive(Serialize)]
struct CheckReport<'a> {
    sink_type: &'static str,
    stream: &'a str,
    config: &'a mqtt_event_sink::SinkConfig,
    password: &'static str,
    dynamic_options: &'static [&'static str],
}

fn check(definition: &SinkDefinition) -> Result<(), Box<dyn std::error::Error>> {
    let sink = init_sink(definition)?;
    let config = sink.config();

    let report = CheckReport {
        sink_type: SINK_TYPE,
        stream: sink.stream_id(),
        config,
        password: if config.password.is_empty() { "" } else { "***" },
        dynamic_options: MqttSink::<mqtt_event_sink::MqttClient>::supported_dynamic_options(),
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run(definition: &SinkDefinition) -> Result<(), Box<dyn std::error::Error>> {
    let sink = init_sink(definition)?;
    sink.connect().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_number = 0usize;

    let result = loop {
        let line = tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break Ok(());
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e.into()),
        };
        line_number += 1;

        if line.trim().is_empty() {
            continue;
        }

        let payload = match serde_json::from_str::<serde_json::Value>(&line) {
            Ok(value) => AttributeValue::from(value),
            Err(e) => {
                warn!(line = line_number, error = %e, "Skipping malformed JSON line");
                continue;
            }
        };

        if let Err(e) = publish_line(&sink, &payload, line_number).await {
            break Err(e);
        }
    };

    sink.disconnect().await;
    info!(
        metrics = %serde_json::to_string(&sink.metrics()).unwrap_or_default(),
        "Sink stopped"
    );
    sink.destroy().await;

    result
}

/// Publish one parsed line, reconnecting once if the link is gone
async fn publish_line(
    sink: &MqttSink,
    payload: &AttributeValue,
    line_number: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let empty = Event::new();
    let context = DynamicContext::new(payload.as_map().unwrap_or(&empty));

    match sink.publish(payload, &context).await {
        Ok(outcome) => {
            log_outcome(&outcome, line_number);
            Ok(())
        }
        Err(e) if e.is_connection_unavailable() => {
            warn!(line = line_number, error = %e, "Connection lost, reconnecting");
            sink.connect().await?;
            let outcome = sink.publish(payload, &context).await?;
            log_outcome(&outcome, line_number);
            Ok(())
        }
        Err(e) => {
            warn!(line = line_number, error = %e, "Event skipped");
            Ok(())
        }
    }
}

fn log_outcome(outcome: &PublishOutcome, line_number: usize) {
    match outcome {
        PublishOutcome::Published(message) => {
            debug!(line = line_number, topic = %message.topic, "Published");
        }
        PublishOutcome::Dropped(reason) => {
            warn!(line = line_number, reason = ?reason, "Event dropped");
        }
    }
}
