use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use weighted_dispatch::{AppState, Config, serve, shutdown_signal};

const CONFIG_FILE_PATH: &str = "./Config.yml";

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| CONFIG_FILE_PATH.to_owned());

    let config = Config::load_from_file(&config_path)
        .and_then(|c| c.into_runtime())
        .unwrap_or_else(|e| {
            error!(%e, path = %config_path, "fatal");
            std::process::exit(1);
        });

    let state = AppState::from_runtime(&config).unwrap_or_else(|e| {
        error!(%e, "fatal");
        std::process::exit(1);
    });

    let listener = TcpListener::bind(config.listen).await.unwrap_or_else(|e| {
        error!(%e, addr = %config.listen, "failed to bind");
        std::process::exit(1);
    });

    let backends = config
        .backends
        .iter()
        .map(|b| format!("{}={}", b.id(), b.weight()))
        .collect::<Vec<_>>();
    info!(addr = %config.listen, ?backends, "listening on http://{}", config.listen);

    serve(listener, state, shutdown_signal()).await;
}
