use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use annolet::annotator::{Annotator, EchoAnnotator, HttpAnnotator};
use annolet::pipeline::{Pipeline, PipelineConfig};
use annolet::store::MemoryStore;
use annolet::transport::{ServerConfig, serve};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let annotator: Arc<dyn Annotator> = match std::env::var("ANNOLET_INFERENCE_URL") {
        Ok(url) => {
            tracing::info!(url = %url, "using HTTP inference endpoint");
            Arc::new(HttpAnnotator::new(url)?)
        }
        Err(_) => {
            tracing::warn!("ANNOLET_INFERENCE_URL not set, using echo annotator");
            Arc::new(EchoAnnotator)
        }
    };

    let store = Arc::new(MemoryStore::new());
    let pipeline = Arc::new(Pipeline::start(
        store,
        annotator,
        PipelineConfig::default(),
    ));

    let config = ServerConfig {
        host: std::env::var("ANNOLET_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
        port: std::env::var("ANNOLET_PORT")
            .ok()
            .and_then(|port| port.parse().ok())
            .unwrap_or(8080),
    };

    serve(config, pipeline).await
}
