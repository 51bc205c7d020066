use std::collections::BTreeMap;

use crate::dto::ranking::{LeaderboardEntry, RaceRankingEntry};
use crate::models::{FinishStatus, Ranking, Team};
use crate::services::scoring::{Placement, calculate_score};

/// Outcome of one vehicle in a race before it is ranked.
#[derive(Debug, Clone)]
pub struct RaceResult {
    pub team: Team,
    /// Elapsed race time, `None` when no active window was found.
    pub elapsed_ms: Option<i64>,
    /// Finish status forced by hand on a previous ranking.
    pub overridden_status: Option<FinishStatus>,
}

impl RaceResult {
    fn finish_time(&self) -> Option<i64> {
        match self.overridden_status {
            Some(_) => None,
            None => self.elapsed_ms,
        }
    }
}

/// A ranked and scored result, ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredResult {
    pub team_id: i32,
    pub category: String,
    pub rank: i32,
    pub score: i32,
    pub elapsed_ms: Option<i64>,
    pub finish_status: Option<FinishStatus>,
    pub status_overridden: bool,
}

/// Ranks results within their categories.
///
/// Finishers are ordered by ascending elapsed time (team id breaks ties so
/// repeated passes agree), followed by non-finishers in team id order.
/// Places are 1-based and every score is computed against the full category
/// size. A non-finisher keeps its overridden status, or is marked DNF.
pub fn rank_categories(results: Vec<RaceResult>) -> BTreeMap<String, Vec<ScoredResult>> {
    let mut grouped: BTreeMap<String, Vec<RaceResult>> = BTreeMap::new();
    for result in results {
        grouped
            .entry(result.team.category().label())
            .or_default()
            .push(result);
    }

    grouped
        .into_iter()
        .map(|(category, mut results)| {
            results.sort_by_key(|r| match r.finish_time() {
                Some(elapsed) => (0, elapsed, r.team.team_id),
                None => (1, 0, r.team.team_id),
            });

            let size = results.len() as i64;
            let scored = results
                .into_iter()
                .enumerate()
                .map(|(index, result)| {
                    let place = index as i64 + 1;
                    let finish_status = match result.finish_time() {
                        Some(_) => None,
                        None => Some(result.overridden_status.unwrap_or(FinishStatus::Dnf)),
                    };
                    let placement = match finish_status {
                        Some(status) => Placement::NonFinish(status),
                        None => Placement::Place(place),
                    };

                    ScoredResult {
                        team_id: result.team.team_id,
                        category: category.clone(),
                        rank: place as i32,
                        score: calculate_score(placement, size),
                        elapsed_ms: result.elapsed_ms,
                        finish_status,
                        status_overridden: result.overridden_status.is_some(),
                    }
                })
                .collect();

            (category, scored)
        })
        .collect()
}

/// Groups persisted rankings of one race by category, best rank first.
pub fn group_race_rankings(
    rankings: Vec<(Ranking, Team)>,
) -> BTreeMap<String, Vec<RaceRankingEntry>> {
    let mut grouped: BTreeMap<String, Vec<RaceRankingEntry>> = BTreeMap::new();
    for (ranking, team) in rankings {
        grouped
            .entry(team.category().label())
            .or_default()
            .push(RaceRankingEntry::from_ranking(&ranking, &team));
    }
    for entries in grouped.values_mut() {
        entries.sort_by_key(|e| (e.rank, e.team_id));
    }
    grouped
}

/// Sums ranking scores per team across races, grouped by category and
/// sorted by descending total.
pub fn build_leaderboard(rankings: &[(Ranking, Team)]) -> BTreeMap<String, Vec<LeaderboardEntry>> {
    let mut totals: BTreeMap<String, BTreeMap<i32, LeaderboardEntry>> = BTreeMap::new();

    for (ranking, team) in rankings {
        let entry = totals
            .entry(team.category().label())
            .or_default()
            .entry(team.team_id)
            .or_insert_with(|| LeaderboardEntry {
                team_id: team.team_id,
                team_name: team.team_name.clone(),
                total_score: 0,
                races_scored: 0,
            });
        entry.total_score += i64::from(ranking.score);
        entry.races_scored += 1;
    }

    totals
        .into_iter()
        .map(|(category, teams)| {
            let mut entries: Vec<LeaderboardEntry> = teams.into_values().collect();
            entries.sort_by(|a, b| {
                b.total_score
                    .cmp(&a.total_score)
                    .then_with(|| a.team_name.cmp(&b.team_name))
            });
            (category, entries)
        })
        .collect()
}
