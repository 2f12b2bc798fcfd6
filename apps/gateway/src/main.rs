use fabric_gateway::kernel::Kernel;
use fabric_shared_config::Settings;
use fabric_shared_telemetry::init_tracing;
use tracing::error;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("fabric_gateway");

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;

    runtime.block_on(async {
        let settings = Settings::from_env().unwrap_or_else(|err| {
            error!(%err, "configuration error");
            std::process::exit(1);
        });

        let kernel = Kernel::ignite(settings).await?;
        kernel.launch().await
    })
}
