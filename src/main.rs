//! OpenSASE Storefront - field schema, carts and sales over HTTP

use anyhow::Result;
use opensase_storefront::{http, Config, DomainEvent, EventSink, Storefront};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();

    let config = Config::from_env()?;
    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!("NATS unavailable at {}, events will be dropped: {}", url, e);
                None
            }
        },
        None => {
            tracing::debug!("NATS_URL not set, events will be dropped");
            None
        }
    };
    let storefront = Storefront::open(&config, event_sink(nats)).await?;

    let app = http::router(Arc::new(storefront)).layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive());

    tracing::info!("🚀 OpenSASE Storefront listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?, app).await?;
    Ok(())
}

/// Only a connected NATS client gets a channel; otherwise events are never queued.
fn event_sink(nats: Option<async_nats::Client>) -> EventSink {
    match nats {
        Some(client) => {
            let (events, rx) = EventSink::channel();
            tokio::spawn(forward_events(client, rx));
            events
        }
        None => EventSink::default(),
    }
}

async fn forward_events(client: async_nats::Client, mut rx: UnboundedReceiver<DomainEvent>) {
    while let Some(event) = rx.recv().await {
        let subject = format!("storefront.{}", event.subject());
        match serde_json::to_vec(&event) {
            Ok(payload) => {
                if let Err(e) = client.publish(subject, payload.into()).await {
                    tracing::warn!("failed to publish event: {}", e);
                }
            }
            Err(e) => tracing::warn!("failed to encode event: {}", e),
        }
    }
}
