//! Per-server supervisor.
//!
//! A Defender runs stream ingest, the queue applier and the airspace monitor
//! as one task group against a fresh unit table. When any of the three
//! finishes the other two are cancelled and awaited, and after a cooldown a
//! new group is started from scratch. Only the outer shutdown ends the loop.

use std::{fmt, sync::Arc};

use defense_rpc::EntitySource;
use tokio::task::JoinSet;

use crate::{
    config::{DefenderConfig, GameServer},
    descriptors::DescriptorCache,
    encyclopedia::Encyclopedia,
    ingest::{IngestError, IngestExit, StreamIngest},
    monitor::AirspaceMonitor,
    shutdown::{shutdown_channel, Shutdown},
    store::{self, unit_queue, UnitStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefenderPhase {
    Running,
    Draining,
    CoolingDown,
}

impl fmt::Display for DefenderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DefenderPhase::Running => "running",
            DefenderPhase::Draining => "draining",
            DefenderPhase::CoolingDown => "cooling_down",
        };
        f.write_str(label)
    }
}

enum GroupTask {
    Ingest(Result<IngestExit, IngestError>),
    Applier(usize),
    Monitor,
}

impl GroupTask {
    fn name(&self) -> &'static str {
        match self {
            GroupTask::Ingest(_) => "ingest",
            GroupTask::Applier(_) => "applier",
            GroupTask::Monitor => "monitor",
        }
    }
}

pub struct Defender {
    server: GameServer,
    source: Arc<dyn EntitySource>,
    encyclopedia: Arc<Encyclopedia>,
    descriptors: DescriptorCache,
    config: DefenderConfig,
}

impl Defender {
    pub fn new(
        server: GameServer,
        source: Arc<dyn EntitySource>,
        encyclopedia: Arc<Encyclopedia>,
        descriptors: DescriptorCache,
        config: DefenderConfig,
    ) -> Self {
        Self {
            server,
            source,
            encyclopedia,
            descriptors,
            config,
        }
    }

    pub fn server(&self) -> &GameServer {
        &self.server
    }

    /// Supervise task groups until `shutdown` fires. Returns how many groups
    /// were started.
    pub async fn run(self, mut shutdown: Shutdown) -> u64 {
        let server = self.server.short_name.as_str();
        let mut generation = 0u64;

        while !shutdown.is_cancelled() {
            generation += 1;
            self.log_phase(DefenderPhase::Running, generation);

            let (group_trigger, group_shutdown) = shutdown_channel();
            let mut tasks = self.spawn_group(group_shutdown);

            let first = tokio::select! {
                _ = shutdown.cancelled() => None,
                joined = tasks.join_next() => joined,
            };
            match first {
                Some(Ok(task)) => log_task_exit(server, &task),
                Some(Err(err)) => {
                    tracing::error!(
                        target: "air_defense::defender",
                        server,
                        error = %err,
                        "defender.task_panicked"
                    );
                }
                None => {}
            }

            self.log_phase(DefenderPhase::Draining, generation);
            group_trigger.trigger();
            while let Some(joined) = tasks.join_next().await {
                if let Err(err) = joined {
                    tracing::error!(
                        target: "air_defense::defender",
                        server,
                        error = %err,
                        "defender.task_panicked"
                    );
                }
            }

            if shutdown.is_cancelled() {
                break;
            }

            self.log_phase(DefenderPhase::CoolingDown, generation);
            tracing::info!(
                target: "air_defense::defender",
                server,
                cooldown_ms = self.config.restart_cooldown_ms,
                "defender.restarting"
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.restart_cooldown()) => {}
            }
        }

        tracing::info!(
            target: "air_defense::defender",
            server,
            generations = generation,
            "defender.stopped"
        );
        generation
    }

    fn spawn_group(&self, group_shutdown: Shutdown) -> JoinSet<GroupTask> {
        let store = UnitStore::new();
        let (sender, receiver) = unit_queue();
        let mut tasks = JoinSet::new();

        let ingest = StreamIngest::new(
            Arc::clone(&self.source),
            Arc::clone(&self.encyclopedia),
            self.config.stream_options(),
            sender,
        );
        let ingest_shutdown = group_shutdown.clone();
        tasks.spawn(async move { GroupTask::Ingest(ingest.run(ingest_shutdown).await) });

        let applier_store = store.clone();
        let poll = self.config.queue_poll();
        let applier_shutdown = group_shutdown.clone();
        tasks.spawn(async move {
            GroupTask::Applier(store::drain(receiver, applier_store, poll, applier_shutdown).await)
        });

        let monitor = AirspaceMonitor::new(
            Arc::clone(&self.source),
            self.descriptors.clone(),
            self.config.monitor_interval(),
            self.config.rpc_timeout(),
        );
        tasks.spawn(async move {
            monitor.run(store, group_shutdown).await;
            GroupTask::Monitor
        });

        tasks
    }

    fn log_phase(&self, phase: DefenderPhase, generation: u64) {
        tracing::debug!(
            target: "air_defense::defender",
            server = %self.server.short_name,
            generation,
            %phase,
            "defender.phase"
        );
    }
}

fn log_task_exit(server: &str, task: &GroupTask) {
    match task {
        GroupTask::Ingest(Err(err)) => {
            tracing::warn!(
                target: "air_defense::defender",
                server,
                task = task.name(),
                error = %err,
                "defender.group_ended"
            );
        }
        GroupTask::Ingest(Ok(exit)) => {
            tracing::info!(
                target: "air_defense::defender",
                server,
                task = task.name(),
                exit = ?exit,
                "defender.group_ended"
            );
        }
        GroupTask::Applier(applied) => {
            tracing::info!(
                target: "air_defense::defender",
                server,
                task = task.name(),
                applied,
                "defender.group_ended"
            );
        }
        GroupTask::Monitor => {
            tracing::info!(
                target: "air_defense::defender",
                server,
                task = task.name(),
                "defender.group_ended"
            );
        }
    }
}
