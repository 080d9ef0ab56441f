#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    fs,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use defense_core::{DefenderConfig, GameServer, RpcEndpoint};
use defense_rpc::{
    AlarmState, AlarmTarget, Coalition, EntitySource, RpcError, SourceUpdate, StreamUnitsOptions,
    UnitRecord, UnitUpdateStream,
};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::time::Instant;

/// One scripted element of a unit stream session.
#[derive(Debug, Clone)]
pub enum Step {
    Update(SourceUpdate),
    Wait(Duration),
    Fail(RpcError),
    /// Stay open and silent until the stream is dropped.
    Hold,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub elapsed: Duration,
    pub target: AlarmTarget,
    pub state: AlarmState,
}

/// Scripted stand-in for the mission server.
///
/// Each `stream_units` call consumes the next scripted session; once they run
/// out, streams stay open and idle. Descriptor lookups are answered from a
/// table keyed by unit name.
pub struct FakeSource {
    started: Instant,
    sessions: Mutex<VecDeque<Vec<Step>>>,
    attributes: HashMap<String, Vec<String>>,
    stream_opens: AtomicUsize,
    descriptor_fetches: AtomicUsize,
    commands: Mutex<Vec<RecordedCommand>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            sessions: Mutex::new(VecDeque::new()),
            attributes: HashMap::new(),
            stream_opens: AtomicUsize::new(0),
            descriptor_fetches: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn with_session(self, steps: Vec<Step>) -> Self {
        self.sessions.lock().push_back(steps);
        self
    }

    pub fn with_attributes(mut self, unit_name: &str, attributes: &[&str]) -> Self {
        self.attributes.insert(
            unit_name.to_string(),
            attributes.iter().map(|a| a.to_string()).collect(),
        );
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn stream_opens(&self) -> usize {
        self.stream_opens.load(Ordering::SeqCst)
    }

    pub fn descriptor_fetches(&self) -> usize {
        self.descriptor_fetches.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.commands.lock().clone()
    }

    pub fn command_pairs(&self) -> Vec<(AlarmTarget, AlarmState)> {
        self.commands
            .lock()
            .iter()
            .map(|command| (command.target.clone(), command.state))
            .collect()
    }
}

#[async_trait]
impl EntitySource for FakeSource {
    async fn stream_units(&self, _options: StreamUnitsOptions) -> Result<UnitUpdateStream, RpcError> {
        self.stream_opens.fetch_add(1, Ordering::SeqCst);
        let steps = self
            .sessions
            .lock()
            .pop_front()
            .unwrap_or_else(|| vec![Step::Hold]);

        let stream = futures::stream::unfold(steps.into_iter(), |mut steps| async move {
            loop {
                match steps.next()? {
                    Step::Update(update) => return Some((Ok(update), steps)),
                    Step::Fail(err) => return Some((Err(err), steps)),
                    Step::Wait(duration) => tokio::time::sleep(duration).await,
                    Step::Hold => futures::future::pending::<()>().await,
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn unit_descriptor(&self, unit_name: &str) -> Result<Vec<String>, RpcError> {
        self.descriptor_fetches.fetch_add(1, Ordering::SeqCst);
        self.attributes
            .get(unit_name)
            .cloned()
            .ok_or_else(|| RpcError::Unavailable(format!("unknown unit {unit_name}")))
    }

    async fn set_alarm_state(&self, target: &AlarmTarget, state: AlarmState) -> Result<(), RpcError> {
        self.commands.lock().push(RecordedCommand {
            elapsed: self.started.elapsed(),
            target: target.clone(),
            state,
        });
        Ok(())
    }
}

pub fn unit(
    id: u32,
    name: &str,
    type_name: &str,
    group: &str,
    coalition: Coalition,
    latitude: f64,
    longitude: f64,
) -> Step {
    Step::Update(SourceUpdate::Unit(UnitRecord {
        id,
        name: name.to_string(),
        callsign: String::new(),
        coalition,
        type_name: type_name.to_string(),
        latitude,
        longitude,
        altitude: 0.0,
        heading: 0.0,
        speed: 0.0,
        group_name: group.to_string(),
        player_name: None,
    }))
}

pub fn gone(id: u32, name: &str) -> Step {
    Step::Update(SourceUpdate::Gone {
        id,
        name: name.to_string(),
    })
}

pub fn group(name: &str) -> AlarmTarget {
    AlarmTarget::Group(name.to_string())
}

/// Degrees of latitude spanning `metres` along a meridian.
pub fn metres_north(metres: f64) -> f64 {
    (metres / defense_core::geo::EARTH_RADIUS_M).to_degrees()
}

pub fn game_server() -> GameServer {
    GameServer {
        name: "Integration".to_string(),
        short_name: "it".to_string(),
        rpc: RpcEndpoint {
            host: "127.0.0.1".to_string(),
            port: 50051,
        },
    }
}

/// Intervals short enough for wall-clock tests.
pub fn fast_config() -> DefenderConfig {
    DefenderConfig {
        monitor_interval_ms: 50,
        restart_cooldown_ms: 50,
        queue_poll_ms: 1,
        ..DefenderConfig::default()
    }
}

/// Write a descriptor record as if a previous run had fetched it.
pub fn seed_descriptor(dir: &Path, type_name: &str, attributes: &[&str]) {
    let mut record = format!("type: {type_name}\nattributes:\n");
    for attribute in attributes {
        record.push_str(&format!("  - {attribute}\n"));
    }
    fs::write(dir.join(format!("{type_name}.yaml")), record).expect("seed descriptor record");
}

/// Poll `condition` every few milliseconds until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
