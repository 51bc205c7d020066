//! In-memory [`TelemetryStore`] used by tests and local experiments.
//!
//! Multi-row writes are applied to a copy of the state which replaces the
//! original only when every step succeeded, mirroring a database transaction.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{
    MergeCommit, RaceEntry, RaceSnapshot, RankingUpsert, RecordSamples, TelemetryStore,
};
use crate::dto::record::{CreateFragmentRequest, RecordFilter, RecordOrderUpdate};
use crate::error::{Result, StorageError};
use crate::models::{Competition, Device, FinishStatus, Race, Ranking, Record, Sample, Team};
use crate::services::aggregate::Aggregates;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    competitions: BTreeMap<i32, Competition>,
    teams: BTreeMap<i32, Team>,
    devices: BTreeMap<i32, Device>,
    races: BTreeMap<i32, Race>,
    records: BTreeMap<i32, Record>,
    samples: BTreeMap<i64, Sample>,
    rankings: BTreeMap<i32, Ranking>,
    next_id: i32,
    next_sample_id: i64,
    failing_ranking_teams: HashSet<i32>,
    /// Overrides written right after the next race snapshot is taken.
    overrides_after_snapshot: Vec<(i32, FinishStatus)>,
}

impl MemoryState {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn record(&self, record_id: i32) -> Result<&Record> {
        self.records
            .get(&record_id)
            .ok_or(StorageError::not_found("record", record_id))
    }

    fn record_mut(&mut self, record_id: i32) -> Result<&mut Record> {
        self.records
            .get_mut(&record_id)
            .ok_or(StorageError::not_found("record", record_id))
    }

    fn race(&self, race_id: i32) -> Result<&Race> {
        self.races
            .get(&race_id)
            .ok_or(StorageError::not_found("race", race_id))
    }

    fn samples_of(&self, record_id: i32) -> Vec<Sample> {
        let mut samples: Vec<Sample> = self
            .samples
            .values()
            .filter(|s| s.record_id == record_id)
            .cloned()
            .collect();
        samples.sort_by_key(|s| (s.timestamp, s.sample_id));
        samples
    }

    fn merged_into(&self, record_id: i32) -> Option<i32> {
        self.records
            .values()
            .find(|r| r.merged_from_ids.contains(&record_id))
            .map(|r| r.record_id)
    }

    fn team_of_device(&self, device_id: i32) -> Option<&Team> {
        self.devices
            .get(&device_id)
            .and_then(|d| d.team_id)
            .and_then(|team_id| self.teams.get(&team_id))
    }

    fn set_finish_status(
        &mut self,
        ranking_id: i32,
        finish_status: Option<FinishStatus>,
    ) -> Result<Ranking> {
        let ranking = self
            .rankings
            .get_mut(&ranking_id)
            .ok_or(StorageError::not_found("ranking", ranking_id))?;

        ranking.finish_status = finish_status;
        ranking.status_overridden = finish_status.is_some();
        if finish_status.is_some() {
            ranking.score = 0;
        }
        ranking.updated_at = now();
        Ok(ranking.clone())
    }

    fn rankings_with_teams(&self, filter: impl Fn(&Ranking) -> bool) -> Vec<(Ranking, Team)> {
        self.rankings
            .values()
            .filter(|r| filter(r))
            .filter_map(|r| self.teams.get(&r.team_id).map(|t| (r.clone(), t.clone())))
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

fn now() -> chrono::NaiveDateTime {
    Utc::now().naive_utc()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `apply` on a copy of the state and keeps the copy only on success.
    fn transaction<T>(&self, apply: impl FnOnce(&mut MemoryState) -> Result<T>) -> Result<T> {
        let mut state = self.state();
        let mut working = state.clone();
        let value = apply(&mut working)?;
        *state = working;
        Ok(value)
    }

    pub fn add_competition(&self, name: &str) -> Competition {
        let mut state = self.state();
        let competition = Competition {
            competition_id: state.next_id(),
            name: name.to_string(),
            created_at: now(),
        };
        state
            .competitions
            .insert(competition.competition_id, competition.clone());
        competition
    }

    pub fn add_team(&self, team_name: &str, vehicle_class: &str, vehicle_type: &str) -> Team {
        let mut state = self.state();
        let team = Team {
            team_id: state.next_id(),
            team_name: team_name.to_string(),
            vehicle_class: vehicle_class.to_string(),
            vehicle_type: vehicle_type.to_string(),
        };
        state.teams.insert(team.team_id, team.clone());
        team
    }

    pub fn add_device(&self, serial_no: i64, team_id: Option<i32>) -> Device {
        let mut state = self.state();
        let device = Device {
            device_id: state.next_id(),
            serial_no,
            team_id,
        };
        state.devices.insert(device.device_id, device.clone());
        device
    }

    pub fn add_race(&self, competition_id: i32, event_name: &str, event_type: &str) -> Race {
        let mut state = self.state();
        let id = state.next_id();
        let race = Race {
            race_id: id,
            competition_id,
            event_id: id,
            event_name: event_name.to_string(),
            event_type: event_type.to_string(),
            completed: false,
        };
        state.races.insert(race.race_id, race.clone());
        race
    }

    /// Makes every ranking write for `team_id` fail until cleared.
    pub fn fail_ranking_writes_for(&self, team_id: i32) {
        self.state().failing_ranking_teams.insert(team_id);
    }

    /// Forces `finish_status` onto a ranking as soon as the next race
    /// snapshot has been read, as a concurrent operator would.
    pub fn override_after_next_snapshot(&self, ranking_id: i32, finish_status: FinishStatus) {
        self.state()
            .overrides_after_snapshot
            .push((ranking_id, finish_status));
    }

    pub fn clear_failures(&self) {
        self.state().failing_ranking_teams.clear();
    }

    pub fn all_records(&self) -> Vec<Record> {
        self.state().records.values().cloned().collect()
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn find_device(&self, device_id: i32) -> Result<Device> {
        self.state()
            .devices
            .get(&device_id)
            .cloned()
            .ok_or(StorageError::not_found("device", device_id))
    }

    async fn find_competition(&self, competition_id: i32) -> Result<Competition> {
        self.state()
            .competitions
            .get(&competition_id)
            .cloned()
            .ok_or(StorageError::not_found("competition", competition_id))
    }

    async fn find_race(&self, race_id: i32) -> Result<Race> {
        self.state().race(race_id).cloned()
    }

    async fn find_record(&self, record_id: i32) -> Result<Record> {
        self.state().record(record_id).cloned()
    }

    async fn list_records(&self, filter: &RecordFilter) -> Result<Vec<Record>> {
        let state = self.state();
        let mut records: Vec<Record> = state
            .records
            .values()
            .filter(|r| filter.include_disabled || !r.disabled)
            .filter(|r| filter.competition_id.is_none_or(|id| r.competition_id == Some(id)))
            .filter(|r| filter.race_id.is_none_or(|id| r.race_id == Some(id)))
            .filter(|r| filter.device_id.is_none_or(|id| r.device_id == id))
            .filter(|r| {
                filter
                    .team_id
                    .is_none_or(|id| state.devices.get(&r.device_id).and_then(|d| d.team_id) == Some(id))
            })
            .filter(|r| !filter.unassigned || r.race_id.is_none())
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.sort_order, r.record_id));
        Ok(records)
    }

    async fn count_samples(&self, record_id: i32) -> Result<i64> {
        let state = self.state();
        state.record(record_id)?;
        Ok(state.samples.values().filter(|s| s.record_id == record_id).count() as i64)
    }

    async fn samples_for_record(&self, record_id: i32) -> Result<Vec<Sample>> {
        let state = self.state();
        state.record(record_id)?;
        Ok(state.samples_of(record_id))
    }

    async fn load_records_with_samples(&self, record_ids: &[i32]) -> Result<Vec<RecordSamples>> {
        let state = self.state();
        Ok(record_ids
            .iter()
            .filter_map(|id| state.records.get(id))
            .map(|record| RecordSamples {
                record: record.clone(),
                samples: state.samples_of(record.record_id),
            })
            .collect())
    }

    async fn find_merged_sources(&self, record_ids: &[i32]) -> Result<Vec<(i32, i32)>> {
        let state = self.state();
        Ok(record_ids
            .iter()
            .filter_map(|id| state.merged_into(*id).map(|canonical| (*id, canonical)))
            .collect())
    }

    async fn create_fragment(
        &self,
        fragment: &CreateFragmentRequest,
        aggregates: &Aggregates,
    ) -> Result<Record> {
        self.transaction(|state| {
            if !state.devices.contains_key(&fragment.device_id) {
                return Err(StorageError::not_found("device", fragment.device_id));
            }
            let mut competition_id = fragment.competition_id;
            if let Some(race_id) = fragment.race_id {
                let race = state.race(race_id)?;
                if race.completed {
                    return Err(StorageError::Consistency(format!(
                        "race {race_id} is already completed"
                    )));
                }
                competition_id = competition_id.or(Some(race.competition_id));
            }
            if let Some(id) = competition_id
                && !state.competitions.contains_key(&id)
            {
                return Err(StorageError::not_found("competition", id));
            }

            let record = Record {
                record_id: state.next_id(),
                device_id: fragment.device_id,
                race_id: fragment.race_id,
                competition_id,
                avg_voltage: aggregates.avg_voltage,
                avg_current: aggregates.avg_current,
                energy: aggregates.energy,
                stop_time: fragment.stop_time,
                disabled: false,
                merged_from_ids: Vec::new(),
                time_offset: 0,
                sort_order: 0,
                created_at: now(),
            };

            for new_sample in &fragment.samples {
                state.next_sample_id += 1;
                let sample = Sample {
                    sample_id: state.next_sample_id,
                    record_id: record.record_id,
                    device_id: fragment.device_id,
                    session_id: new_sample.session_id,
                    timestamp: new_sample.timestamp,
                    raw_timestamp: new_sample.timestamp,
                    voltage: new_sample.voltage,
                    current: new_sample.current,
                    energy: new_sample.energy,
                };
                state.samples.insert(sample.sample_id, sample);
            }

            state.records.insert(record.record_id, record.clone());
            Ok(record)
        })
    }

    async fn commit_merge(&self, commit: &MergeCommit) -> Result<Record> {
        self.transaction(|state| {
            let source_ids = commit.source_ids();

            for id in &source_ids {
                let source = state.record(*id)?;
                if source.disabled {
                    return Err(StorageError::Consistency(format!(
                        "record {id} is disabled"
                    )));
                }
                if let Some(canonical) = state.merged_into(*id) {
                    return Err(StorageError::Consistency(format!(
                        "record {id} was already merged into record {canonical}"
                    )));
                }
            }
            if !state.devices.contains_key(&commit.device_id) {
                return Err(StorageError::not_found("device", commit.device_id));
            }

            let owned = state
                .samples
                .values()
                .filter(|s| source_ids.contains(&s.record_id))
                .count();
            if owned != commit.reassignments.len() {
                return Err(StorageError::Consistency(
                    "source samples changed while merging".to_string(),
                ));
            }

            let canonical = Record {
                record_id: state.next_id(),
                device_id: commit.device_id,
                race_id: commit.race_id,
                competition_id: commit.competition_id,
                avg_voltage: commit.aggregates.avg_voltage,
                avg_current: commit.aggregates.avg_current,
                energy: commit.aggregates.energy,
                stop_time: Some(commit.stop_time),
                disabled: false,
                merged_from_ids: source_ids.clone(),
                time_offset: 0,
                sort_order: 0,
                created_at: now(),
            };

            for reassignment in &commit.reassignments {
                let sample = state
                    .samples
                    .get_mut(&reassignment.sample_id)
                    .filter(|s| source_ids.contains(&s.record_id))
                    .ok_or_else(|| {
                        StorageError::Consistency(format!(
                            "sample {} does not belong to a merge source",
                            reassignment.sample_id
                        ))
                    })?;
                sample.record_id = canonical.record_id;
                sample.timestamp = reassignment.timestamp;
            }

            for (position, source) in commit.sources.iter().enumerate() {
                let record = state.record_mut(source.record_id)?;
                record.disabled = true;
                record.time_offset = source.offset_ms;
                record.sort_order = position as i32;
            }

            state.records.insert(canonical.record_id, canonical.clone());
            Ok(canonical)
        })
    }

    async fn update_aggregates(&self, record_id: i32, aggregates: &Aggregates) -> Result<Record> {
        let mut state = self.state();
        let record = state.record_mut(record_id)?;
        record.avg_voltage = aggregates.avg_voltage;
        record.avg_current = aggregates.avg_current;
        record.energy = aggregates.energy;
        Ok(record.clone())
    }

    async fn set_record_disabled(&self, record_id: i32, disabled: bool) -> Result<Record> {
        let mut state = self.state();
        let record = state.record_mut(record_id)?;
        record.disabled = disabled;
        Ok(record.clone())
    }

    async fn update_record_order(&self, updates: &[RecordOrderUpdate]) -> Result<Vec<Record>> {
        self.transaction(|state| {
            updates
                .iter()
                .map(|update| {
                    let record = state.record_mut(update.record_id)?;
                    if let Some(sort_order) = update.sort_order {
                        record.sort_order = sort_order;
                    }
                    if let Some(time_offset) = update.time_offset {
                        record.time_offset = time_offset;
                    }
                    Ok(record.clone())
                })
                .collect()
        })
    }

    async fn assign_record(
        &self,
        record_id: i32,
        race_id: Option<i32>,
        competition_id: Option<i32>,
    ) -> Result<Record> {
        self.transaction(|state| {
            if let Some(id) = competition_id
                && !state.competitions.contains_key(&id)
            {
                return Err(StorageError::not_found("competition", id));
            }
            if let Some(id) = race_id {
                state.race(id)?;
            }
            let record = state.record_mut(record_id)?;
            record.race_id = race_id;
            record.competition_id = competition_id;
            Ok(record.clone())
        })
    }

    async fn load_race_snapshot(&self, race_id: i32) -> Result<RaceSnapshot> {
        let mut state = self.state();
        let race = state.race(race_id)?.clone();

        let mut entries = Vec::new();
        let mut unassigned_record_ids = Vec::new();
        for record in state
            .records
            .values()
            .filter(|r| r.race_id == Some(race_id) && !r.disabled)
        {
            match state.team_of_device(record.device_id) {
                Some(team) => entries.push(RaceEntry {
                    record: record.clone(),
                    team: team.clone(),
                    samples: state.samples_of(record.record_id),
                }),
                None => unassigned_record_ids.push(record.record_id),
            }
        }

        let rankings = state
            .rankings
            .values()
            .filter(|r| r.race_id == race_id)
            .cloned()
            .collect();

        for (ranking_id, finish_status) in std::mem::take(&mut state.overrides_after_snapshot) {
            state.set_finish_status(ranking_id, Some(finish_status))?;
        }

        Ok(RaceSnapshot {
            race,
            entries,
            unassigned_record_ids,
            rankings,
        })
    }

    async fn commit_race_scores(
        &self,
        race_id: i32,
        rankings: &[RankingUpsert],
        overwrite_overrides: bool,
    ) -> Result<Vec<Ranking>> {
        self.transaction(|state| {
            state.race(race_id)?;

            for upsert in rankings {
                if state.failing_ranking_teams.contains(&upsert.team_id) {
                    return Err(StorageError::Database(sqlx::Error::Protocol(format!(
                        "injected ranking write failure for team {}",
                        upsert.team_id
                    ))));
                }

                let existing = state
                    .rankings
                    .values()
                    .find(|r| r.race_id == race_id && r.team_id == upsert.team_id);
                if existing.is_some_and(|r| r.status_overridden) && !overwrite_overrides {
                    continue;
                }
                let ranking_id = match existing.map(|r| r.ranking_id) {
                    Some(id) => id,
                    None => state.next_id(),
                };

                let ranking = Ranking {
                    ranking_id,
                    team_id: upsert.team_id,
                    race_id,
                    rank: upsert.rank,
                    score: upsert.score,
                    elapsed_ms: upsert.elapsed_ms,
                    finish_status: upsert.finish_status,
                    status_overridden: upsert.status_overridden,
                    updated_at: now(),
                };
                state.rankings.insert(ranking_id, ranking);
            }

            let kept: HashSet<i32> = rankings.iter().map(|r| r.team_id).collect();
            state
                .rankings
                .retain(|_, r| r.race_id != race_id || kept.contains(&r.team_id));

            if let Some(race) = state.races.get_mut(&race_id) {
                race.completed = true;
            }

            let mut persisted: Vec<Ranking> = state
                .rankings
                .values()
                .filter(|r| r.race_id == race_id)
                .cloned()
                .collect();
            persisted.sort_by_key(|r| (r.rank, r.team_id));
            Ok(persisted)
        })
    }

    async fn race_rankings(&self, race_id: i32) -> Result<Vec<(Ranking, Team)>> {
        let state = self.state();
        state.race(race_id)?;
        Ok(state.rankings_with_teams(|r| r.race_id == race_id))
    }

    async fn set_finish_status(
        &self,
        ranking_id: i32,
        finish_status: Option<FinishStatus>,
    ) -> Result<Ranking> {
        self.state().set_finish_status(ranking_id, finish_status)
    }

    async fn competition_rankings(&self, competition_id: i32) -> Result<Vec<(Ranking, Team)>> {
        let state = self.state();
        if !state.competitions.contains_key(&competition_id) {
            return Err(StorageError::not_found("competition", competition_id));
        }
        let races: HashSet<i32> = state
            .races
            .values()
            .filter(|r| r.competition_id == competition_id)
            .map(|r| r.race_id)
            .collect();
        Ok(state.rankings_with_teams(|r| races.contains(&r.race_id)))
    }
}
