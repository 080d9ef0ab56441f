use std::sync::Arc;

use defense_rpc::EntitySource;
use tokio::task::JoinSet;

use crate::{
    config::{DefenderConfig, GameServer},
    defender::Defender,
    descriptors::DescriptorCache,
    encyclopedia::Encyclopedia,
    shutdown::Shutdown,
};

/// One Defender per game server, all sharing the encyclopedia and the
/// descriptor cache.
pub struct Service {
    encyclopedia: Arc<Encyclopedia>,
    descriptors: DescriptorCache,
    config: DefenderConfig,
    defenders: Vec<Defender>,
}

impl Service {
    pub fn new(
        encyclopedia: Arc<Encyclopedia>,
        descriptors: DescriptorCache,
        config: DefenderConfig,
    ) -> Self {
        Self {
            encyclopedia,
            descriptors,
            config,
            defenders: Vec::new(),
        }
    }

    pub fn add_server(&mut self, server: GameServer, source: Arc<dyn EntitySource>) {
        self.defenders.push(Defender::new(
            server,
            source,
            Arc::clone(&self.encyclopedia),
            self.descriptors.clone(),
            self.config.clone(),
        ));
    }

    pub fn len(&self) -> usize {
        self.defenders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defenders.is_empty()
    }

    /// Run every Defender until `shutdown` fires and all have stopped.
    pub async fn run(self, shutdown: Shutdown) {
        if self.defenders.is_empty() {
            tracing::warn!(target: "air_defense::defender", "service.no_servers");
            return;
        }

        let mut defenders = JoinSet::new();
        for defender in self.defenders {
            let name = defender.server().short_name.clone();
            tracing::info!(
                target: "air_defense::defender",
                server = %name,
                host = %defender.server().rpc.host,
                port = defender.server().rpc.port,
                "service.defender_started"
            );
            let shutdown = shutdown.clone();
            defenders.spawn(async move { (name, defender.run(shutdown).await) });
        }

        while let Some(joined) = defenders.join_next().await {
            match joined {
                Ok((server, generations)) => {
                    tracing::info!(
                        target: "air_defense::defender",
                        server = %server,
                        generations,
                        "service.defender_stopped"
                    );
                }
                Err(err) => {
                    tracing::error!(
                        target: "air_defense::defender",
                        error = %err,
                        "service.defender_panicked"
                    );
                }
            }
        }
    }
}
