use std::sync::Arc;

use color_eyre::{eyre::WrapErr, Result};
use defense_core::{
    load_configuration_from_env, load_encyclopedia_from_env, shutdown_channel, DescriptorCache,
    Service,
};
use defense_rpc::GrpcEntitySource;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (config, metadata) =
        load_configuration_from_env().wrap_err("failed to load configuration")?;
    let encyclopedia = load_encyclopedia_from_env().wrap_err("failed to load encyclopedia")?;
    let descriptors = DescriptorCache::open(&config.descriptor_cache_dir)
        .wrap_err("failed to open descriptor cache")?
        .with_fetch_timeout(config.defender.rpc_timeout());

    let mut service = Service::new(encyclopedia, descriptors, config.defender.clone());
    for server in &config.game_servers {
        let source = GrpcEntitySource::new(
            &server.rpc.host,
            server.rpc.port,
            config.defender.rpc_timeout(),
        )
            .wrap_err_with(|| format!("invalid endpoint for server '{}'", server.short_name))?;
        service.add_server(server.clone(), Arc::new(source));
    }

    info!(
        target: "air_defense::server",
        config = %metadata
            .path()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "builtin".to_string()),
        servers = service.len(),
        "Air defense controller ready"
    );

    let (trigger, shutdown) = shutdown_channel();
    let running = tokio::spawn(service.run(shutdown));

    tokio::signal::ctrl_c()
        .await
        .wrap_err("failed to listen for ctrl-c")?;
    info!(target: "air_defense::server", "shutdown.requested");
    trigger.trigger();

    running.await.wrap_err("service task failed")?;
    info!(target: "air_defense::server", "shutdown.complete");
    Ok(())
}
