use facecheck_service::{handle, Config, ModelProvider, S3ObjectStore, Verifier};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::Value;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .without_time()
        .init();

    let config = Config::from_env();
    tracing::info!(
        model_root = %config.model_root.display(),
        threads = config.intra_threads,
        "facecheck-lambda starting"
    );

    // Models load on the first invocation, not here.
    let store = Arc::new(S3ObjectStore::from_env().await);
    let models = Arc::new(ModelProvider::insight(config.pack_config()));
    let verifier = Arc::new(Verifier::new(store, models));

    run(service_fn(move |event: LambdaEvent<Value>| {
        let verifier = verifier.clone();
        async move { Ok::<_, Error>(handle(verifier, event.payload).await) }
    }))
    .await
}
