//! Periodic alarm-state decisions for every air-defense site in the mission.
//!
//! Each tick inspects a snapshot of the unit store. While the mission has no
//! early-warning radar every tracking radar is kept active. Once an EWR is
//! present, a site is only activated while a hostile unit is inside the
//! engagement envelope of one of its tracking radars and otherwise sits in
//! standby.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use defense_rpc::{AlarmState, AlarmTarget, EntitySource, RpcError};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinSet;

use crate::{
    descriptors::{DescriptorCache, UnitDescriptor, EWR_ATTRIBUTE, SAM_TR_ATTRIBUTE},
    geo::great_circle_distance,
    shutdown::Shutdown,
    store::UnitStore,
    unit::Unit,
};

/// Maximum engagement range, in metres, per tracking-radar type.
pub const SAM_ENGAGEMENT_RANGES: &[(&str, f64)] = &[
    ("Kub 1S91 str", 52_000.0),
    ("S-300PS 40B6M tr", 100_000.0),
    ("Osa 9A33 ln", 25_000.0),
    ("snr s-125 tr", 60_000.0),
    ("SNR_75V", 65_000.0),
    ("Dog Ear radar", 26_000.0),
    ("SA-11 Buk LN 9A310M1", 43_000.0),
    ("Hawk tr", 60_000.0),
    ("Tor 9A331", 50_000.0),
    ("rapier_fsa_blindfire_radar", 6_000.0),
    ("Patriot STR", 100_000.0),
    ("Roland ADS", 10_000.0),
    ("HQ-7_STR_SP", 12_500.0),
    ("ZSU-23-4 Shilka", 1_000.0),
];

pub fn engagement_range(type_name: &str) -> Option<f64> {
    SAM_ENGAGEMENT_RANGES
        .iter()
        .find(|(name, _)| *name == type_name)
        .map(|(_, range)| *range)
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// The store was empty and nothing was evaluated.
    pub skipped: bool,
    /// Commands dispatched this tick, in issue order.
    pub commands: Vec<(AlarmTarget, AlarmState)>,
    /// Commands that failed or timed out since the previous tick.
    pub command_failures: usize,
    pub unresolved_units: usize,
}

/// Send one alarm-state command, logging the outcome.
pub async fn issue_alarm_state(
    source: &dyn EntitySource,
    target: &AlarmTarget,
    state: AlarmState,
) -> Result<(), RpcError> {
    match source.set_alarm_state(target, state).await {
        Ok(()) => {
            tracing::info!(
                target: "air_defense::monitor",
                alarm_target = %target,
                alarm_state = %state,
                "monitor.alarm_state_set"
            );
            Ok(())
        }
        Err(err) => {
            tracing::warn!(
                target: "air_defense::monitor",
                alarm_target = %target,
                alarm_state = %state,
                error = %err,
                "monitor.alarm_state_failed"
            );
            Err(err)
        }
    }
}

/// Commands run detached from the tick that issued them. Dropping the
/// monitor aborts whatever is still in flight.
pub struct AirspaceMonitor {
    source: Arc<dyn EntitySource>,
    descriptors: DescriptorCache,
    interval: Duration,
    command_timeout: Duration,
    in_flight: Mutex<JoinSet<bool>>,
}

impl AirspaceMonitor {
    pub fn new(
        source: Arc<dyn EntitySource>,
        descriptors: DescriptorCache,
        interval: Duration,
        command_timeout: Duration,
    ) -> Self {
        Self {
            source,
            descriptors,
            interval,
            command_timeout,
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    /// Tick every interval, first one interval after start, until cancelled.
    pub async fn run(self, store: UnitStore, mut shutdown: Shutdown) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.interval) => {}
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                report = self.tick(&store) => {
                    if !report.skipped {
                        tracing::debug!(
                            target: "air_defense::monitor",
                            commands = report.commands.len(),
                            failures = report.command_failures,
                            unresolved = report.unresolved_units,
                            "monitor.tick_complete"
                        );
                    }
                }
            }
        }
    }

    /// Evaluate the current store once and dispatch the resulting commands
    /// without waiting for them.
    pub async fn tick(&self, store: &UnitStore) -> TickReport {
        let mut report = TickReport {
            command_failures: self.reap_finished(),
            ..TickReport::default()
        };
        let units = store.snapshot();
        if units.is_empty() {
            tracing::debug!(target: "air_defense::monitor", "monitor.tick_skipped=no_units");
            report.skipped = true;
            return report;
        }

        let descriptors = self.resolve_all(&units, &mut report).await;
        let ewr_present = units
            .iter()
            .any(|unit| has_attribute(&descriptors, unit, EWR_ATTRIBUTE));
        let tracking_radars: Vec<&Arc<Unit>> = units
            .iter()
            .filter(|unit| has_attribute(&descriptors, unit, SAM_TR_ATTRIBUTE))
            .collect();

        let commands: Vec<(AlarmTarget, AlarmState)> = if ewr_present {
            decide_groups(&tracking_radars, &units)
                .into_iter()
                .map(|(group, state)| (AlarmTarget::Group(group), state))
                .collect()
        } else {
            tracking_radars
                .iter()
                .map(|radar| (AlarmTarget::Group(radar.group_name.clone()), AlarmState::Active))
                .collect()
        };

        {
            let mut in_flight = self.in_flight.lock();
            for (target, state) in &commands {
                in_flight.spawn(dispatch(
                    Arc::clone(&self.source),
                    target.clone(),
                    *state,
                    self.command_timeout,
                ));
            }
        }
        report.commands = commands;
        report
    }

    /// Collect commands that finished since the last call, returning how many
    /// of them failed.
    fn reap_finished(&self) -> usize {
        let mut in_flight = self.in_flight.lock();
        let mut failures = 0;
        while let Some(Some(joined)) = in_flight.join_next().now_or_never() {
            if !matches!(joined, Ok(true)) {
                failures += 1;
            }
        }
        failures
    }

    /// Wait for every in-flight command, returning how many failed.
    #[cfg(test)]
    async fn settle(&self) -> usize {
        let mut in_flight = std::mem::take(&mut *self.in_flight.lock());
        let mut failures = 0;
        while let Some(joined) = in_flight.join_next().await {
            if !matches!(joined, Ok(true)) {
                failures += 1;
            }
        }
        failures
    }

    async fn resolve_all(
        &self,
        units: &[Arc<Unit>],
        report: &mut TickReport,
    ) -> HashMap<u32, Arc<UnitDescriptor>> {
        let mut resolved = HashMap::with_capacity(units.len());
        for unit in units {
            match self
                .descriptors
                .resolve(self.source.as_ref(), &unit.type_name, &unit.name)
                .await
            {
                Ok(descriptor) => {
                    resolved.insert(unit.id(), descriptor);
                }
                Err(err) => {
                    report.unresolved_units += 1;
                    tracing::warn!(
                        target: "air_defense::monitor",
                        unit = %unit.name,
                        type_name = %unit.type_name,
                        error = %err,
                        "monitor.attributes_unresolved"
                    );
                }
            }
        }
        resolved
    }
}

async fn dispatch(
    source: Arc<dyn EntitySource>,
    target: AlarmTarget,
    state: AlarmState,
    limit: Duration,
) -> bool {
    match tokio::time::timeout(limit, issue_alarm_state(source.as_ref(), &target, state)).await {
        Ok(result) => result.is_ok(),
        Err(_) => {
            tracing::warn!(
                target: "air_defense::monitor",
                alarm_target = %target,
                alarm_state = %state,
                timeout_ms = limit.as_millis() as u64,
                "monitor.alarm_state_timed_out"
            );
            false
        }
    }
}

fn has_attribute(
    descriptors: &HashMap<u32, Arc<UnitDescriptor>>,
    unit: &Unit,
    attribute: &str,
) -> bool {
    descriptors
        .get(&unit.id())
        .map_or(false, |descriptor| descriptor.has_attribute(attribute))
}

/// Final state per group. A group is active if any of its radars has a
/// hostile strictly inside range; the higher state always wins.
fn decide_groups(radars: &[&Arc<Unit>], units: &[Arc<Unit>]) -> BTreeMap<String, AlarmState> {
    let mut decisions: BTreeMap<String, AlarmState> = BTreeMap::new();
    for radar in radars {
        let Some(range) = engagement_range(&radar.type_name) else {
            tracing::warn!(
                target: "air_defense::monitor",
                unit = %radar.name,
                type_name = %radar.type_name,
                "monitor.unknown_radar_type"
            );
            continue;
        };

        let threatened = units
            .iter()
            .filter(|other| radar.coalition.is_hostile_to(other.coalition))
            .any(|hostile| match great_circle_distance(&radar.position, &hostile.position) {
                Ok(distance) => distance < range,
                Err(err) => {
                    tracing::warn!(
                        target: "air_defense::monitor",
                        unit = %radar.name,
                        hostile = %hostile.name,
                        error = %err,
                        "monitor.distance_failed"
                    );
                    false
                }
            });

        let state = if threatened {
            AlarmState::Active
        } else {
            AlarmState::Standby
        };
        let entry = decisions
            .entry(radar.group_name.clone())
            .or_insert(state);
        *entry = (*entry).max(state);
    }
    decisions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::Position;
    use async_trait::async_trait;
    use defense_rpc::{Coalition, StreamUnitsOptions, UnitUpdateStream};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSource {
        attributes: HashMap<String, Vec<String>>,
        commands: Mutex<Vec<(AlarmTarget, AlarmState)>>,
        reject_commands: bool,
        /// Commands for this group never get an answer.
        unanswered_group: Option<String>,
    }

    impl RecordingSource {
        fn with(types: &[(&str, &[&str])]) -> Self {
            let attributes = types
                .iter()
                .map(|(name, attrs)| {
                    (
                        name.to_string(),
                        attrs.iter().map(|a| a.to_string()).collect(),
                    )
                })
                .collect();
            Self {
                attributes,
                ..Self::default()
            }
        }

        fn commands(&self) -> Vec<(AlarmTarget, AlarmState)> {
            self.commands.lock().clone()
        }

        fn commands_for(&self, group: &str) -> usize {
            let target = AlarmTarget::Group(group.to_string());
            self.commands
                .lock()
                .iter()
                .filter(|(commanded, _)| *commanded == target)
                .count()
        }
    }

    #[async_trait]
    impl EntitySource for RecordingSource {
        async fn stream_units(
            &self,
            _options: StreamUnitsOptions,
        ) -> Result<UnitUpdateStream, RpcError> {
            Err(RpcError::Unavailable("no stream".into()))
        }

        // Test units are named after their type.
        async fn unit_descriptor(&self, unit_name: &str) -> Result<Vec<String>, RpcError> {
            let type_name = unit_name.split('#').next().unwrap_or(unit_name);
            self.attributes
                .get(type_name)
                .cloned()
                .ok_or_else(|| RpcError::Unavailable(format!("no unit {unit_name}")))
        }

        async fn set_alarm_state(
            &self,
            target: &AlarmTarget,
            state: AlarmState,
        ) -> Result<(), RpcError> {
            self.commands.lock().push((target.clone(), state));
            if let Some(group) = &self.unanswered_group {
                if *target == AlarmTarget::Group(group.clone()) {
                    futures::future::pending::<()>().await;
                }
            }
            if self.reject_commands {
                Err(RpcError::Unavailable("refused".into()))
            } else {
                Ok(())
            }
        }
    }

    fn unit(
        id: u32,
        type_name: &str,
        group: &str,
        coalition: Coalition,
        latitude: f64,
        longitude: f64,
    ) -> Unit {
        let mut unit = Unit::tombstone(id, format!("{type_name}#{id}"));
        unit.deleted = false;
        unit.type_name = type_name.to_string();
        unit.group_name = group.to_string();
        unit.coalition = coalition;
        unit.position = Position::new(latitude, longitude);
        unit
    }

    /// Latitude offset that puts a point `metres` north of the equator origin.
    fn north(metres: f64) -> f64 {
        (metres / crate::geo::EARTH_RADIUS_M).to_degrees()
    }

    fn monitor(source: Arc<RecordingSource>) -> (AirspaceMonitor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache = DescriptorCache::open(dir.path()).unwrap();
        (
            AirspaceMonitor::new(
                source,
                cache,
                Duration::from_secs(10),
                Duration::from_secs(3),
            ),
            dir,
        )
    }

    fn store(units: Vec<Unit>) -> UnitStore {
        let store = UnitStore::new();
        for unit in units {
            store.apply(unit);
        }
        store
    }

    const TYPES: &[(&str, &[&str])] = &[
        ("1L13 EWR", &["EWR", "RADAR"]),
        ("Patriot STR", &["SAM TR", "RADAR"]),
        ("ZSU-23-4 Shilka", &["SAM TR", "AAA"]),
        ("Hawk tr", &["SAM TR"]),
        ("Mystery TR", &["SAM TR"]),
        ("F-15C", &["Fighters"]),
    ];

    #[test]
    fn range_table_lookup() {
        assert_eq!(engagement_range("Patriot STR"), Some(100_000.0));
        assert_eq!(engagement_range("HQ-7_STR_SP"), Some(12_500.0));
        assert_eq!(engagement_range("patriot str"), None);
    }

    #[tokio::test]
    async fn empty_store_skips_tick() {
        let source = Arc::new(RecordingSource::with(TYPES));
        let (monitor, _dir) = monitor(source.clone());
        let report = monitor.tick(&UnitStore::new()).await;
        assert!(report.skipped);
        assert!(source.commands().is_empty());
    }

    #[tokio::test]
    async fn ewr_with_hostile_in_range_activates_group() {
        let source = Arc::new(RecordingSource::with(TYPES));
        let (monitor, _dir) = monitor(source.clone());
        let store = store(vec![
            unit(1, "1L13 EWR", "EWR", Coalition::BLUE, 5.0, 5.0),
            unit(2, "Hawk tr", "Hawk Site", Coalition::BLUE, 0.0, 0.0),
            unit(3, "F-15C", "Bandit", Coalition::RED, north(40_000.0), 0.0),
        ]);

        let report = monitor.tick(&store).await;
        assert_eq!(
            report.commands,
            vec![(AlarmTarget::Group("Hawk Site".into()), AlarmState::Active)]
        );
        assert_eq!(monitor.settle().await, 0);
        assert_eq!(source.commands(), report.commands);
    }

    #[tokio::test]
    async fn ewr_without_threat_puts_group_on_standby() {
        let source = Arc::new(RecordingSource::with(TYPES));
        let (monitor, _dir) = monitor(source.clone());
        let store = store(vec![
            unit(1, "1L13 EWR", "EWR", Coalition::BLUE, 5.0, 5.0),
            unit(2, "Hawk tr", "Hawk Site", Coalition::BLUE, 0.0, 0.0),
            unit(3, "F-15C", "Bandit", Coalition::RED, north(90_000.0), 0.0),
        ]);

        let report = monitor.tick(&store).await;
        assert_eq!(
            report.commands,
            vec![(AlarmTarget::Group("Hawk Site".into()), AlarmState::Standby)]
        );
    }

    #[tokio::test]
    async fn no_ewr_activates_every_tracking_radar() {
        let source = Arc::new(RecordingSource::with(TYPES));
        let (monitor, _dir) = monitor(source.clone());
        let store = store(vec![
            unit(1, "Hawk tr", "Hawk Site", Coalition::BLUE, 0.0, 0.0),
            unit(2, "Patriot STR", "Patriot Site", Coalition::BLUE, 10.0, 10.0),
            unit(3, "F-15C", "Bandit", Coalition::RED, 60.0, 60.0),
        ]);

        let report = monitor.tick(&store).await;
        assert_eq!(
            report.commands,
            vec![
                (AlarmTarget::Group("Hawk Site".into()), AlarmState::Active),
                (AlarmTarget::Group("Patriot Site".into()), AlarmState::Active),
            ]
        );
    }

    #[tokio::test]
    async fn long_range_radar_keeps_group_active() {
        let source = Arc::new(RecordingSource::with(TYPES));
        let (monitor, _dir) = monitor(source.clone());
        let store = store(vec![
            unit(1, "1L13 EWR", "EWR", Coalition::BLUE, 5.0, 5.0),
            unit(2, "ZSU-23-4 Shilka", "Site", Coalition::BLUE, 0.0, 0.0),
            unit(3, "Patriot STR", "Site", Coalition::BLUE, 0.0, 0.0),
            unit(4, "F-15C", "Bandit", Coalition::RED, north(80_000.0), 0.0),
        ]);

        let report = monitor.tick(&store).await;
        assert_eq!(
            report.commands,
            vec![(AlarmTarget::Group("Site".into()), AlarmState::Active)]
        );
    }

    #[tokio::test]
    async fn unknown_radar_type_is_skipped() {
        let source = Arc::new(RecordingSource::with(TYPES));
        let (monitor, _dir) = monitor(source.clone());
        let store = store(vec![
            unit(1, "1L13 EWR", "EWR", Coalition::BLUE, 5.0, 5.0),
            unit(2, "Mystery TR", "Odd Site", Coalition::BLUE, 0.0, 0.0),
            unit(3, "Hawk tr", "Hawk Site", Coalition::BLUE, 0.0, 0.0),
        ]);

        let report = monitor.tick(&store).await;
        assert_eq!(
            report.commands,
            vec![(AlarmTarget::Group("Hawk Site".into()), AlarmState::Standby)]
        );
    }

    #[tokio::test]
    async fn unresolved_units_have_no_capabilities() {
        let source = Arc::new(RecordingSource::with(TYPES));
        let (monitor, _dir) = monitor(source.clone());
        let store = store(vec![
            unit(1, "Unheard Of EWR", "EWR", Coalition::BLUE, 5.0, 5.0),
            unit(2, "Hawk tr", "Hawk Site", Coalition::BLUE, 0.0, 0.0),
        ]);

        let report = monitor.tick(&store).await;
        assert_eq!(report.unresolved_units, 1);
        assert_eq!(
            report.commands,
            vec![(AlarmTarget::Group("Hawk Site".into()), AlarmState::Active)]
        );
    }

    #[tokio::test]
    async fn command_failures_are_counted_not_fatal() {
        let source = Arc::new(RecordingSource {
            reject_commands: true,
            ..RecordingSource::with(TYPES)
        });
        let (monitor, _dir) = monitor(source.clone());
        let store = store(vec![
            unit(1, "Hawk tr", "A", Coalition::BLUE, 0.0, 0.0),
            unit(2, "Hawk tr", "B", Coalition::BLUE, 0.0, 0.0),
        ]);

        let first = monitor.tick(&store).await;
        assert_eq!(first.commands.len(), 2);
        assert_eq!(first.command_failures, 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = monitor.tick(&store).await;
        assert_eq!(second.commands.len(), 2);
        assert_eq!(second.command_failures, 2);
        assert_eq!(monitor.settle().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_command_times_out_without_holding_the_tick() {
        let source = Arc::new(RecordingSource {
            unanswered_group: Some("A".into()),
            ..RecordingSource::with(TYPES)
        });
        let (monitor, _dir) = monitor(source.clone());
        let store = store(vec![
            unit(1, "Hawk tr", "A", Coalition::BLUE, 0.0, 0.0),
            unit(2, "Hawk tr", "B", Coalition::BLUE, 1.0, 0.0),
        ]);

        let first = monitor.tick(&store).await;
        assert_eq!(first.commands.len(), 2);
        tokio::time::sleep(Duration::from_secs(4)).await;
        let second = monitor.tick(&store).await;
        assert_eq!(second.command_failures, 1);
        assert_eq!(monitor.settle().await, 1);
        assert_eq!(source.commands_for("A"), 2);
        assert_eq!(source.commands_for("B"), 2);

        let (trigger, shutdown) = crate::shutdown::shutdown_channel();
        let task = tokio::spawn(monitor.run(store, shutdown));
        tokio::time::sleep(Duration::from_secs(45)).await;

        // Ticks at 10, 20, 30 and 40 seconds each reach both groups.
        assert_eq!(source.commands_for("A"), 6);
        assert_eq!(source.commands_for("B"), 6);

        trigger.trigger();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_interval() {
        let source = Arc::new(RecordingSource::with(TYPES));
        let (monitor, _dir) = monitor(source.clone());
        let store = store(vec![unit(1, "Hawk tr", "A", Coalition::BLUE, 0.0, 0.0)]);
        // Warm the descriptor cache so the timed ticks do no file i/o.
        monitor.tick(&store).await;
        assert_eq!(monitor.settle().await, 0);
        assert_eq!(source.commands().len(), 1);

        let (trigger, shutdown) = crate::shutdown::shutdown_channel();
        let task = tokio::spawn(monitor.run(store, shutdown));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(source.commands().len(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(source.commands().len(), 2);

        trigger.trigger();
        task.await.unwrap();
    }
}
