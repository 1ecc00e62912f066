use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use relay_core::app::Dispatcher;
use relay_core::impls::{InMemoryBroker, InMemoryTaskStore};
use relay_core::{DispatcherBuilder, MessageId, RelayConfig};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Send messages through the relay dispatcher.
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(version)]
struct Cli {
    /// TOML config file; defaults plus RELAY_BROKER_* env vars if omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish one message to this instance's queue
    Send {
        /// Message type, e.g. welcome_email
        #[arg(long = "type")]
        message_type: String,

        /// Message body as JSON
        #[arg(long, default_value = "{}")]
        body: String,

        /// Ask the consumer for an application-level ack
        #[arg(long, default_value_t = false)]
        ack: bool,
    },

    /// Run send + ack against an in-process broker and store
    Demo,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RelayConfig::load(path)?,
        None => {
            let mut config = RelayConfig::default();
            config.apply_env_overrides()?;
            config.validate()?;
            config
        }
    };

    match cli.command {
        Command::Send {
            message_type,
            body,
            ack,
        } => {
            let body: serde_json::Value = serde_json::from_str(&body)?;
            let dispatcher = DispatcherBuilder::new(config)
                .task_store(Arc::new(InMemoryTaskStore::new()))
                .build()
                .await?;

            let sent = dispatcher.send_message(&message_type, &body, ack).await;
            let outcome = match sent {
                Ok(id) => print_task(&dispatcher, &id).await,
                Err(e) => Err(e.into()),
            };
            dispatcher.close().await?;
            outcome
        }
        Command::Demo => demo(config).await,
    }
}

async fn demo(config: RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let broker = InMemoryBroker::new();
    let dispatcher = DispatcherBuilder::new(config)
        .task_store(Arc::new(InMemoryTaskStore::new()))
        .connector(Arc::new(broker.clone()))
        .build()
        .await?;
    info!(queue = %dispatcher.queue_name(), "demo dispatcher ready");

    let id = dispatcher
        .send_message("welcome_email", &serde_json::json!({ "user_id": 42 }), true)
        .await?;
    print_task(&dispatcher, &id).await?;
    println!(
        "broker holds {} message(s) on {}",
        broker.messages_in(dispatcher.queue_name()).len(),
        dispatcher.queue_name()
    );

    dispatcher
        .ack_message(&id, Some(&serde_json::json!({ "email_sent": true })))
        .await?;
    print_task(&dispatcher, &id).await?;

    // A send during an outage leaves a Failed task behind.
    broker.set_reachable(false);
    broker.drop_connections();
    if let Err(e) = dispatcher
        .send_message("welcome_email", &serde_json::json!({ "user_id": 43 }), true)
        .await
    {
        println!("send during outage failed: {e}");
    }

    let status = dispatcher.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    dispatcher.close().await?;
    Ok(())
}

async fn print_task(dispatcher: &Dispatcher, id: &MessageId) -> Result<(), Box<dyn std::error::Error>> {
    let task = dispatcher.task(id).await?;
    println!("{}", serde_json::to_string_pretty(&task)?);
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
