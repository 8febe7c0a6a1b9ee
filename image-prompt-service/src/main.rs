use anyhow::Context;
use coze_flow::CozeConfig;
use image_prompt_service::create_app;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured JSON tracing based on environment variables
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "image_prompt_service=debug,coze_flow=debug,tower_http=debug".into()
    });

    match log_format.as_str() {
        "pretty" => {
            // Human-readable logging for development
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = match CozeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Coze configuration missing: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        base_url = %config.base_url,
        workflow_id = %config.workflow_id,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        max_attempts = config.max_attempts,
        "Coze API token configured"
    );

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse::<u16>()
        .unwrap_or(3000);

    let app = create_app(config);
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    let addr = listener.local_addr()?;

    info!("Image to Prompt Service starting on {}", addr);
    info!("Health check endpoint: http://{}/health", addr);
    info!("Generate endpoint: POST http://{}/image-to-prompt/sessions/{{id}}/generate", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
