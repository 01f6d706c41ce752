//! redpipe-demo: two chained pipelines exercising fan-out, async stages,
//! stage errors, and topic subscriptions.
//!
//! The first pipeline adds 5 to the submitted payload, fans out one message
//! per value below it, delays each through an async stage, then forwards odd
//! values to a second pipeline and fails on even values above 10. The second
//! pipeline randomly re-topics what it receives.
//!
//! # Usage
//!
//! ```bash
//! redpipe-demo --payload 10
//! redpipe-demo --insertion random --delay-ms 5
//! RUST_LOG=redpipe=debug redpipe-demo --config redpipe.toml
//! ```

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rand::Rng;
use redpipe::{Event, InsertionPolicy, Message, Pipeline, PipelineConfig, Stats};
use tokio::sync::mpsc;
use tracing::{error, info};

const TOPIC_AWESOME: &str = "Awesome";

/// Run the two-pipeline demonstration.
#[derive(Parser, Debug)]
#[command(name = "redpipe-demo", version, about)]
struct Cli {
    /// Optional TOML config applied to the first pipeline.
    #[arg(long, env = "REDPIPE_CONFIG")]
    config: Option<String>,

    /// Payload submitted to the first pipeline.
    #[arg(long, default_value_t = 10)]
    payload: i64,

    /// Queue placement for forwarded messages ("fifo" or "random").
    #[arg(long)]
    insertion: Option<InsertionPolicy>,

    /// Delay applied by the async stage, in milliseconds.
    #[arg(long, default_value_t = 10)]
    delay_ms: u64,

    /// Give up waiting for completion after this many seconds.
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

fn finished_channel(pipeline: &Pipeline) -> mpsc::UnboundedReceiver<Stats> {
    let (tx, rx) = mpsc::unbounded_channel();
    let name = pipeline.name().to_string();
    pipeline.on(Event::Finished, move |msg| {
        let Ok(stats) = msg.decode::<Stats>() else {
            return;
        };
        info!(pipeline = %name, inputs = stats.inputs, outputs = stats.outputs, "FINISHED");
        if stats.errors > 0 {
            info!(pipeline = %name, errors = stats.errors, "batch had errors");
        }
        let _ = tx.send(stats);
    });
    rx
}

fn build_second() -> Pipeline {
    let second = Pipeline::with_config(PipelineConfig::named("second"));
    second.pipe(|mut msg, _| {
        if rand::thread_rng().gen_bool(0.5) {
            msg.topic = TOPIC_AWESOME.to_string();
        }
        Ok(Some(msg))
    });
    second.on(Event::Data, |msg| info!(payload = %msg.payload, "[OUT]"));
    second.subscribe(TOPIC_AWESOME, |msg| {
        info!(topic = %msg.topic, payload = %msg.payload, "awesome subscriber")
    });
    second
}

fn build_first(config: PipelineConfig, second: Pipeline, delay: Duration) -> Pipeline {
    let first = Pipeline::with_config(config);
    first
        .pipe(|mut msg, _| {
            let base = msg.payload.as_i64().unwrap_or(0);
            msg.payload = (base + 5).into();
            Ok(Some(msg))
        })
        .pipe(|msg, node| {
            let count = msg.payload.as_i64().unwrap_or(0);
            for i in 0..count {
                node.send(msg.with_payload(i));
            }
            Ok(None)
        })
        .pipe(move |msg, node| {
            node.lock();
            let node = node.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                node.send(msg);
                node.unlock();
            });
            Ok(None)
        })
        .pipe(move |msg, _| {
            let value = msg.payload.as_i64().unwrap_or(0);
            if value & 1 == 1 {
                second.send(msg.clone());
                return Ok(Some(msg));
            }
            if value > 10 {
                anyhow::bail!("10 items or greater are not supported");
            }
            Ok(None)
        });
    first.on(Event::Error, |msg| error!(error = %msg.payload, "[ERR]"));
    first
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load config from {path}"))?,
        None => PipelineConfig::named("first"),
    };
    if let Some(insertion) = cli.insertion {
        config.insertion = insertion;
    }

    let second = build_second();
    let mut second_done = finished_channel(&second);
    let first = build_first(config, second.clone(), Duration::from_millis(cli.delay_ms));
    let mut first_done = finished_channel(&first);

    info!(payload = cli.payload, insertion = %first.config().insertion, "submitting");
    first.send(Message::new("test", cli.payload));

    let wait = async {
        first_done.recv().await;
        while second.is_running() {
            if second_done.recv().await.is_none() {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(cli.timeout_secs), wait)
        .await
        .context("pipelines did not finish in time")?;

    info!("demo complete");
    Ok(())
}
