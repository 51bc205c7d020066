//! Scoring passes over races and the views built on their rankings.

use std::collections::HashMap;

use crate::dto::race::{RaceRankingsResponse, ScoreRaceRequest, ScoreRaceResponse};
use crate::dto::ranking::{FinishStatusOverrideRequest, LeaderboardResponse};
use crate::error::{Result, StorageError};
use crate::models::{FinishStatus, Ranking, Team};
use crate::repository::RankingUpsert;
use crate::services::active_window;
use crate::services::ranking::{self, RaceResult};
use crate::services::reconciliation::TelemetryEngine;

impl TelemetryEngine {
    /// Ranks every team of a race within its category, persists one ranking
    /// per team and marks the race completed.
    ///
    /// Running the pass again on unchanged input yields the same rankings.
    /// When persisting fails nothing is written and the race stays open.
    pub async fn score_race(&self, request: &ScoreRaceRequest) -> Result<ScoreRaceResponse> {
        let snapshot = self.store.load_race_snapshot(request.race_id).await?;

        for record_id in &snapshot.unassigned_record_ids {
            tracing::warn!(
                race_id = request.race_id,
                record_id,
                "skipping record whose device has no team"
            );
        }

        let mut seen: HashMap<i32, i32> = HashMap::new();
        for entry in &snapshot.entries {
            if let Some(other) = seen.insert(entry.team.team_id, entry.record.record_id) {
                return Err(StorageError::Consistency(format!(
                    "team {} has several enabled records in race {} ({} and {}); merge them first",
                    entry.team.team_id, request.race_id, other, entry.record.record_id
                )));
            }
        }

        let overrides: HashMap<i32, FinishStatus> = if request.overwrite_overrides {
            HashMap::new()
        } else {
            snapshot
                .rankings
                .iter()
                .filter(|r| r.status_overridden)
                .filter_map(|r| r.finish_status.map(|status| (r.team_id, status)))
                .collect()
        };

        let teams: HashMap<i32, Team> = snapshot
            .entries
            .iter()
            .map(|e| (e.team.team_id, e.team.clone()))
            .collect();

        let results: Vec<RaceResult> = snapshot
            .entries
            .into_iter()
            .map(|entry| RaceResult {
                elapsed_ms: active_window::elapsed_ms(
                    &entry.samples,
                    self.config.activity_threshold_amps,
                ),
                overridden_status: overrides.get(&entry.team.team_id).copied(),
                team: entry.team,
            })
            .collect();

        let ranked = ranking::rank_categories(results);
        let upserts: Vec<RankingUpsert> = ranked
            .values()
            .flatten()
            .map(RankingUpsert::from)
            .collect();

        let persisted = self
            .store
            .commit_race_scores(request.race_id, &upserts, request.overwrite_overrides)
            .await
            .inspect_err(|e| {
                tracing::error!(race_id = request.race_id, error = %e, "scoring pass failed");
            })?;

        tracing::info!(
            race_id = request.race_id,
            rankings = persisted.len(),
            categories = ranked.len(),
            "scored race"
        );

        Ok(ScoreRaceResponse {
            race_id: request.race_id,
            completed: true,
            rankings_by_category: ranking::group_race_rankings(with_teams(persisted, &teams)),
            skipped_record_ids: snapshot.unassigned_record_ids,
        })
    }

    /// Forces a non-finish status onto a ranking, or clears a forced status
    /// when `finish_status` is `None`.
    pub async fn override_finish_status(
        &self,
        ranking_id: i32,
        request: &FinishStatusOverrideRequest,
    ) -> Result<Ranking> {
        let ranking = self
            .store
            .set_finish_status(ranking_id, request.finish_status)
            .await?;

        tracing::info!(
            ranking_id,
            race_id = ranking.race_id,
            finish_status = ?ranking.finish_status,
            "finish status overridden"
        );
        Ok(ranking)
    }

    pub async fn race_rankings(&self, race_id: i32) -> Result<RaceRankingsResponse> {
        let race = self.store.find_race(race_id).await?;
        let rankings = self.store.race_rankings(race_id).await?;

        Ok(RaceRankingsResponse {
            race_id,
            completed: race.completed,
            rankings_by_category: ranking::group_race_rankings(rankings),
        })
    }

    pub async fn leaderboard(&self, competition_id: i32) -> Result<LeaderboardResponse> {
        let rankings = self.store.competition_rankings(competition_id).await?;

        Ok(LeaderboardResponse {
            competition_id,
            categories: ranking::build_leaderboard(&rankings),
        })
    }
}

fn with_teams(rankings: Vec<Ranking>, teams: &HashMap<i32, Team>) -> Vec<(Ranking, Team)> {
    rankings
        .into_iter()
        .filter_map(|r| teams.get(&r.team_id).cloned().map(|team| (r, team)))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dto::record::{AssignRecordRequest, CreateFragmentRequest};
    use crate::error::ErrorKind;
    use crate::models::Race;
    use crate::repository::{MemoryStore, TelemetryStore};
    use crate::services::reconciliation::tests::{engine, readings, upload};

    struct Fixture {
        store: Arc<MemoryStore>,
        engine: TelemetryEngine,
        race: Race,
        teams: Vec<Team>,
    }

    /// Three open karts with elapsed times of 120 s, 95 s and 150 s.
    async fn scenario() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store);
        let competition = store.add_competition("Spring Cup");
        let race = store.add_race(competition.competition_id, "Heat 1", "sprint");

        let mut teams = Vec::new();
        for (i, (name, elapsed)) in [("A", 120_000), ("B", 95_000), ("C", 150_000)]
            .into_iter()
            .enumerate()
        {
            let team = store.add_team(name, "Open", "Kart");
            let device = store.add_device(100 + i as i64, Some(team.team_id));
            upload(&engine, device.device_id, Some(race.race_id), readings(&[0, elapsed], 12.0)).await;
            teams.push(team);
        }

        Fixture {
            store,
            engine,
            race,
            teams,
        }
    }

    fn request(race_id: i32) -> ScoreRaceRequest {
        ScoreRaceRequest {
            race_id,
            overwrite_overrides: false,
        }
    }

    fn scores(response: &ScoreRaceResponse, category: &str) -> Vec<(String, i32, i32)> {
        response.rankings_by_category[category]
            .iter()
            .map(|e| (e.team_name.clone(), e.rank, e.score))
            .collect()
    }

    #[tokio::test]
    async fn test_score_race_ranks_by_elapsed_time() {
        let fixture = scenario().await;

        let response = fixture.engine.score_race(&request(fixture.race.race_id)).await.unwrap();

        assert!(response.completed);
        assert_eq!(
            scores(&response, "Open Kart"),
            vec![
                ("B".to_string(), 1, 100),
                ("A".to_string(), 2, 63),
                ("C".to_string(), 3, 25)
            ]
        );
        let race = fixture.store.find_race(fixture.race.race_id).await.unwrap();
        assert!(race.completed);
    }

    #[tokio::test]
    async fn test_rescoring_is_idempotent() {
        let fixture = scenario().await;

        let first = fixture.engine.score_race(&request(fixture.race.race_id)).await.unwrap();
        let second = fixture.engine.score_race(&request(fixture.race.race_id)).await.unwrap();

        assert_eq!(first.rankings_by_category, second.rankings_by_category);
        let stored = fixture.store.race_rankings(fixture.race.race_id).await.unwrap();
        assert_eq!(stored.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_pass_leaves_race_open_and_can_be_retried() {
        let fixture = scenario().await;
        fixture.store.fail_ranking_writes_for(fixture.teams[2].team_id);

        let err = fixture
            .engine
            .score_race(&request(fixture.race.race_id))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Store);
        assert!(err.is_retryable());

        let race = fixture.store.find_race(fixture.race.race_id).await.unwrap();
        assert!(!race.completed);
        assert!(fixture.store.race_rankings(fixture.race.race_id).await.unwrap().is_empty());

        fixture.store.clear_failures();
        let response = fixture.engine.score_race(&request(fixture.race.race_id)).await.unwrap();
        assert_eq!(response.rankings_by_category["Open Kart"].len(), 3);
    }

    #[tokio::test]
    async fn test_vehicle_without_activity_is_dnf() {
        let fixture = scenario().await;
        let team = fixture.store.add_team("D", "Open", "Kart");
        let device = fixture.store.add_device(200, Some(team.team_id));
        upload(
            &fixture.engine,
            device.device_id,
            Some(fixture.race.race_id),
            readings(&[0, 5000], 0.2),
        )
        .await;

        let response = fixture.engine.score_race(&request(fixture.race.race_id)).await.unwrap();
        let kart = &response.rankings_by_category["Open Kart"];

        assert_eq!(kart.len(), 4);
        assert_eq!(kart[3].team_id, team.team_id);
        assert_eq!(kart[3].score, 0);
        assert_eq!(kart[3].finish_status, Some(FinishStatus::Dnf));
        assert_eq!(kart[1].score, 75);
    }

    #[tokio::test]
    async fn test_records_without_team_are_skipped() {
        let fixture = scenario().await;
        let device = fixture.store.add_device(300, None);
        let orphan = upload(
            &fixture.engine,
            device.device_id,
            Some(fixture.race.race_id),
            readings(&[0, 1000], 12.0),
        )
        .await;

        let response = fixture.engine.score_race(&request(fixture.race.race_id)).await.unwrap();

        assert_eq!(response.skipped_record_ids, vec![orphan.record_id]);
        assert_eq!(response.rankings_by_category["Open Kart"].len(), 3);
    }

    #[tokio::test]
    async fn test_unmerged_fragments_block_scoring() {
        let fixture = scenario().await;
        let device = fixture.store.add_device(400, Some(fixture.teams[0].team_id));
        upload(
            &fixture.engine,
            device.device_id,
            Some(fixture.race.race_id),
            readings(&[0, 1000], 12.0),
        )
        .await;

        let err = fixture
            .engine
            .score_race(&request(fixture.race.race_id))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Consistency);
    }

    #[tokio::test]
    async fn test_override_survives_rescoring_unless_overwritten() {
        let fixture = scenario().await;
        let response = fixture.engine.score_race(&request(fixture.race.race_id)).await.unwrap();
        let winner = response.rankings_by_category["Open Kart"][0].clone();

        let ranking = fixture
            .engine
            .override_finish_status(
                winner.ranking_id,
                &FinishStatusOverrideRequest {
                    finish_status: Some(FinishStatus::Dq),
                },
            )
            .await
            .unwrap();
        assert_eq!(ranking.score, 0);
        assert!(ranking.status_overridden);

        let rescored = fixture.engine.score_race(&request(fixture.race.race_id)).await.unwrap();
        let kart = &rescored.rankings_by_category["Open Kart"];
        assert_eq!(kart[0].team_name, "A");
        assert_eq!(kart[0].score, 100);
        assert_eq!(kart[2].team_id, winner.team_id);
        assert_eq!(kart[2].finish_status, Some(FinishStatus::Dq));
        assert_eq!(kart[2].score, 0);

        let overwritten = fixture
            .engine
            .score_race(&ScoreRaceRequest {
                race_id: fixture.race.race_id,
                overwrite_overrides: true,
            })
            .await
            .unwrap();
        let kart = &overwritten.rankings_by_category["Open Kart"];
        assert_eq!(kart[0].team_id, winner.team_id);
        assert_eq!(kart[0].score, 100);
        assert!(!kart[0].status_overridden);
    }

    #[tokio::test]
    async fn test_override_written_during_a_pass_is_kept() {
        let fixture = scenario().await;
        let response = fixture.engine.score_race(&request(fixture.race.race_id)).await.unwrap();
        let winner = response.rankings_by_category["Open Kart"][0].clone();

        fixture
            .store
            .override_after_next_snapshot(winner.ranking_id, FinishStatus::Dq);
        let rescored = fixture.engine.score_race(&request(fixture.race.race_id)).await.unwrap();

        let stored = fixture.store.race_rankings(fixture.race.race_id).await.unwrap();
        let (ranking, _) = stored
            .iter()
            .find(|(r, _)| r.ranking_id == winner.ranking_id)
            .unwrap();
        assert_eq!(ranking.finish_status, Some(FinishStatus::Dq));
        assert!(ranking.status_overridden);
        assert_eq!(ranking.score, 0);

        let entry = rescored.rankings_by_category["Open Kart"]
            .iter()
            .find(|e| e.ranking_id == winner.ranking_id)
            .unwrap();
        assert_eq!(entry.finish_status, Some(FinishStatus::Dq));

        fixture
            .store
            .override_after_next_snapshot(winner.ranking_id, FinishStatus::Dns);
        fixture
            .engine
            .score_race(&ScoreRaceRequest {
                race_id: fixture.race.race_id,
                overwrite_overrides: true,
            })
            .await
            .unwrap();
        let stored = fixture.store.race_rankings(fixture.race.race_id).await.unwrap();
        let (ranking, _) = stored
            .iter()
            .find(|(r, _)| r.ranking_id == winner.ranking_id)
            .unwrap();
        assert_eq!(ranking.finish_status, None);
        assert!(!ranking.status_overridden);
        assert_eq!(ranking.score, 100);
    }

    #[tokio::test]
    async fn test_cleared_override_is_rescored() {
        let fixture = scenario().await;
        let response = fixture.engine.score_race(&request(fixture.race.race_id)).await.unwrap();
        let winner = response.rankings_by_category["Open Kart"][0].clone();

        for finish_status in [Some(FinishStatus::Dns), None] {
            fixture
                .engine
                .override_finish_status(winner.ranking_id, &FinishStatusOverrideRequest { finish_status })
                .await
                .unwrap();
        }

        let rescored = fixture.engine.score_race(&request(fixture.race.race_id)).await.unwrap();
        assert_eq!(rescored.rankings_by_category["Open Kart"][0].team_id, winner.team_id);
        assert_eq!(rescored.rankings_by_category["Open Kart"][0].score, 100);
    }

    #[tokio::test]
    async fn test_completed_race_rejects_new_records() {
        let fixture = scenario().await;
        fixture.engine.score_race(&request(fixture.race.race_id)).await.unwrap();
        let device = fixture.store.add_device(500, None);

        let err = fixture
            .engine
            .ingest_fragment(&CreateFragmentRequest {
                device_id: device.device_id,
                race_id: Some(fixture.race.race_id),
                competition_id: None,
                stop_time: None,
                samples: readings(&[0], 1.0),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Consistency);

        let loose = upload(&fixture.engine, device.device_id, None, readings(&[0], 1.0)).await;
        let err = fixture
            .engine
            .assign_record(
                loose.record_id,
                &AssignRecordRequest {
                    race_id: Some(fixture.race.race_id),
                    competition_id: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Consistency);
    }

    #[tokio::test]
    async fn test_race_rankings_and_leaderboard() {
        let fixture = scenario().await;
        fixture.engine.score_race(&request(fixture.race.race_id)).await.unwrap();

        let listing = fixture.engine.race_rankings(fixture.race.race_id).await.unwrap();
        assert!(listing.completed);
        let ranks: Vec<i32> = listing.rankings_by_category["Open Kart"]
            .iter()
            .map(|e| e.rank)
            .collect();
        assert_eq!(ranks, vec![1, 2, 3]);

        let leaderboard = fixture
            .engine
            .leaderboard(fixture.race.competition_id)
            .await
            .unwrap();
        let kart = &leaderboard.categories["Open Kart"];
        assert_eq!(kart[0].team_name, "B");
        assert_eq!(kart[0].total_score, 100);
        assert_eq!(kart[2].total_score, 25);

        let err = fixture.engine.leaderboard(9999).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_unknown_race_is_not_found() {
        let fixture = scenario().await;
        let err = fixture.engine.score_race(&request(9999)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
