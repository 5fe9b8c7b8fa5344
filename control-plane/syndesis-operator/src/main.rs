use envconfig::Envconfig;
use kube::Client;
use syndesis_operator::{
    config::OperatorConfig, controller::run_controller, init_tracing,
};
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    if let Err(e) = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::aws_lc_rs::default_provider(),
    ) {
        tracing::debug!(?e, "CryptoProvider already installed; proceeding");
    }

    let cfg = OperatorConfig::init_from_env()?.validated();
    info!(?cfg, "starting syndesis operator");

    let client = Client::try_default().await?;
    run_controller(client, cfg).await
}
