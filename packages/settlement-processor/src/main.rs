//! Settles finished matches from the store table's change stream.
//!
//! Participants settle their own matches; this Lambda is the fallback observer that
//! catches sessions whose clients went away before settling.

use lambda_runtime::{run, service_fn, Error};
use std::sync::Arc;
use tracing_subscriber;

mod processor;
use processor::SettlementProcessor;
use shared::{
    config::EngineConfig, repositories::dynamo_store::DynamoDbStore,
    services::settlement_service::SettlementService,
};

/// Wires a DynamoDB-backed settlement service into the Lambda runtime.
#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    // Load engine settings and AWS configuration
    let engine_config = EngineConfig::from_env()?;
    let config = aws_config::load_from_env().await;
    let client = aws_sdk_dynamodb::Client::new(&config);

    // Create services
    let store = Arc::new(DynamoDbStore::new(
        client,
        engine_config.store_table.clone(),
        engine_config.subscription_poll,
    ));
    let settlement_service = SettlementService::new(
        store,
        Arc::new(engine_config.ladder.clone()),
        engine_config.retry.clone(),
        engine_config.history_retention,
    );

    let processor = SettlementProcessor::new(settlement_service);

    // Run the Lambda function
    run(service_fn(
        move |event: lambda_runtime::LambdaEvent<aws_lambda_events::event::dynamodb::Event>| {
            let processor = processor.clone();
            async move { processor.process_event(event.payload).await }
        },
    ))
    .await
}
