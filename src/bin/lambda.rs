//! AWS Lambda entry point for the cartelera crawler
//!
//! Deploy with `cargo lambda build --release --features lambda`.
//! The step served is chosen by `CARTELERA_HANDLER`.

use cartelera::lambda::{self, HandlerKind};
use lambda_runtime::{Error as LambdaError, LambdaEvent, service_fn};

use serde_json::Value;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the AWS Lambda function.
#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let kind = HandlerKind::from_env()?;
    info!(handler = %kind, "cartelera lambda starting");

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        lambda::handler(kind, event)
    }))
    .await
}
