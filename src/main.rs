use ntorrent::{app, config};

#[tokio::main]
async fn main() {
    let config = config::Config::from_env();
    config::init_tracing(&config);
    tracing::info!("ntorrent booted");

    if let Err(error) = app::run(config).await {
        tracing::error!(error = %error, "fatal");
        std::process::exit(1);
    }
}
