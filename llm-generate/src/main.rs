use dotenvy::dotenv;
use llm_generate::config::ProxyConfig;
use llm_generate::startup::Application;
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let otlp_endpoint = std::env::var("OTLP_ENDPOINT").ok();
    init_tracing("llm-generate", "info", otlp_endpoint.as_deref());

    let config = ProxyConfig::load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    let app = Application::build(config).await?;
    tracing::info!("Starting llm-generate on port {}", app.port());

    app.run_until_stopped().await.map_err(|e| {
        tracing::error!("Server error: {}", e);
        anyhow::anyhow!("Server error: {}", e)
    })?;

    Ok(())
}
