#![allow(dead_code)]
mod app_config;
mod classification;
mod email;
mod error;
mod pipeline;
mod prompt;
mod rate_limiters;
#[cfg(test)]
mod testing;

use std::{env, sync::Arc, time::Duration};

use anyhow::Context;
use mimalloc::MiMalloc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use app_config::AppConfig;
use classification::Classifier;
use email::client::EmailClient;
use pipeline::LabelingPipeline;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub type HttpClient = reqwest::Client;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries the run summary
    if env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::Layer::default()
                    .with_ansi(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::load()?;
    tracing::info!("{config}");

    let access_token = config
        .gmail
        .access_token
        .clone()
        .context("GMAIL_ACCESS_TOKEN is not set")?;

    let http_client = reqwest::ClientBuilder::new()
        .use_rustls_tls()
        .timeout(Duration::from_secs(config.gmail.request_timeout_secs))
        .build()?;

    let classifier =
        Classifier::from_config(config.pipeline.ai_model, &config.models, &http_client)?;
    let email_client = EmailClient::from_access_token(http_client, access_token);
    let pipeline = LabelingPipeline::new(Arc::new(email_client), classifier, config);

    let summary = pipeline.run().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
