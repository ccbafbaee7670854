use crate::analysis::equity::equity_score;
use crate::analysis::fill::{self, HISTORY_WEEKS, MAX_TREND_BONUS};
use crate::analysis::profitability::profitability_score;
use crate::analysis::recency::{days_since_last_visit, visit_timestamp, Clock, DaysSince};
use crate::analysis::urgency::urgency_score;
use crate::commands::cache::{CacheState, ScoreCache};
use crate::commands::catalog::{require_fill, BoxCatalog};
use crate::commands::ledger::VisitLedger;
use crate::error::{EngineError, Result};
use crate::models::box_record::{BoxRecord, BoxUpdate, NewBox};
use crate::models::score::*;
use crate::models::visit::{VisitEvent, VisitRecord};
use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;
use log::{info, warn};
use std::collections::HashMap;

const DETAIL_HISTORY_WEEKS: usize = 8;
const TOP_LOGGED: usize = 5;

/// Owns the catalog, the visit ledger and the score cache. Callers serialize
/// access (one `&mut` owner); persistence happens outside, after a mutation.
pub struct RecommendationEngine {
    catalog: BoxCatalog,
    ledger: VisitLedger,
    cache: ScoreCache,
    clock: Box<dyn Clock>,
}

impl RecommendationEngine {
    pub fn new(catalog: BoxCatalog, mut ledger: VisitLedger, clock: Box<dyn Clock>) -> Self {
        let dropped = ledger.retain_boxes(|id| catalog.contains(id));
        if !dropped.is_empty() {
            warn!(
                "Ignoring visits for {} boxes missing from the catalog: {dropped:?}",
                dropped.len()
            );
        }

        let mut engine = Self {
            catalog,
            ledger,
            cache: ScoreCache::new(),
            clock,
        };

        info!(
            "Engine initialised with {} boxes and {} weeks of data",
            engine.catalog.len(),
            engine.catalog.week_count()
        );
        engine.log_parameters();
        engine.rebuild_cache();
        engine
    }

    pub fn catalog(&self) -> &BoxCatalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &VisitLedger {
        &self.ledger
    }

    pub fn cache_state(&self) -> CacheState {
        self.cache.state()
    }

    pub fn timezone(&self) -> Tz {
        self.clock.timezone()
    }

    pub fn now(&self) -> DateTime<Tz> {
        self.clock.now()
    }

    pub fn days_since_last_visit(&self, box_id: u32) -> Result<DaysSince> {
        self.require_box(box_id)?;
        Ok(days_since_last_visit(self.ledger.last_visit(box_id), self.clock.now()))
    }

    /// Score bundle for one box, from the cache when an entry is present.
    /// Entries may be served while the cache is INVALID: every mutation either
    /// drops the whole cache or recomputes the entry it touched, so any entry
    /// still present is current. Only full reads force a rebuild.
    pub fn snapshot(&mut self, box_id: u32) -> Result<ScoreSnapshot> {
        if let Some(cached) = self.cache.get(box_id) {
            return Ok(cached.clone());
        }

        let record = self.require_box(box_id)?;
        let snapshot = compute_snapshot(record, self.ledger.last_visit(box_id), self.clock.now());
        self.cache.refresh_box(box_id, snapshot.clone());
        Ok(snapshot)
    }

    pub fn profitability_score(&mut self, box_id: u32) -> Result<f64> {
        Ok(self.snapshot(box_id)?.profitability_score)
    }

    /// Full recompute of every box (INVALID → VALID).
    pub fn rebuild_cache(&mut self) {
        let now = self.clock.now();
        let entries: HashMap<u32, ScoreSnapshot> = self
            .catalog
            .iter()
            .map(|record| {
                let snapshot = compute_snapshot(record, self.ledger.last_visit(record.id), now);
                (record.id, snapshot)
            })
            .collect();

        info!("Scores computed for {} boxes", entries.len());
        self.cache.rebuild(entries);
    }

    fn ensure_cache(&mut self) {
        if !self.cache.is_valid() {
            self.rebuild_cache();
        }
    }

    /// Boxes scoring at least `min_score`, best first (ties by ascending id), at most `max_count`.
    pub fn recommended_boxes(&mut self, max_count: usize, min_score: f64) -> Vec<Recommendation> {
        self.ensure_cache();

        let mut all_scores = Vec::with_capacity(self.catalog.len());
        let mut recommendations = Vec::new();

        for record in self.catalog.iter() {
            let Some(snapshot) = self.cache.get(record.id) else {
                continue;
            };
            all_scores.push(snapshot.profitability_score);

            if snapshot.profitability_score >= min_score {
                recommendations.push(Recommendation {
                    box_id: record.id,
                    address: record.address.clone(),
                    municipality: record.municipality.clone(),
                    postal_code: record.postal_code.clone(),
                    container_type: record.container_type.clone(),
                    profitability_score: snapshot.profitability_score,
                    expected_fill: snapshot.expected_fill,
                    equity_score: snapshot.equity_score,
                    days_since_last_visit: snapshot.days_since_last_visit,
                    average_fill: record.average_or_zero(),
                });
            }
        }

        recommendations.sort_by(|a, b| {
            b.profitability_score
                .total_cmp(&a.profitability_score)
                .then_with(|| a.box_id.cmp(&b.box_id))
        });

        log_scoring_stats(&scoring_stats(&all_scores), &recommendations);

        recommendations.truncate(max_count);
        recommendations
    }

    pub fn box_details(&mut self, box_id: u32) -> Result<BoxDetails> {
        let snapshot = self.snapshot(box_id)?;
        let record = self.require_box(box_id)?;

        let newest = self.catalog.week_count();
        let oldest = newest.saturating_sub(DETAIL_HISTORY_WEEKS - 1).max(1);
        let recent_history = (oldest..=newest)
            .rev()
            .filter_map(|week| {
                record.reading(week).map(|fill_level| WeeklyReading { week, fill_level })
            })
            .collect();

        Ok(BoxDetails {
            box_id,
            address: record.address.clone(),
            municipality: record.municipality.clone(),
            postal_code: record.postal_code.clone(),
            container_type: record.container_type.clone(),
            average_fill: record.average_or_zero(),
            current_score: snapshot.profitability_score,
            expected_fill: snapshot.expected_fill,
            days_since_last_visit: snapshot.days_since_last_visit,
            recent_history,
            visit_history: self.ledger.history(box_id).to_vec(),
        })
    }

    /// Every box, optionally filtered by address or id substring, best score first.
    pub fn all_boxes(&mut self, search: Option<&str>) -> Vec<BoxSummary> {
        self.ensure_cache();
        let needle = search.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty());

        let mut boxes: Vec<BoxSummary> = self
            .catalog
            .iter()
            .filter(|record| match &needle {
                Some(needle) => {
                    record.address.to_lowercase().contains(needle.as_str())
                        || record.id.to_string().contains(needle.as_str())
                }
                None => true,
            })
            .filter_map(|record| {
                let snapshot = self.cache.get(record.id)?;
                Some(BoxSummary {
                    box_id: record.id,
                    address: record.address.clone(),
                    municipality: record.municipality.clone(),
                    postal_code: record.postal_code.clone(),
                    container_type: record.container_type.clone(),
                    average_fill: record.average_or_zero(),
                    profitability_score: snapshot.profitability_score,
                    expected_fill: snapshot.expected_fill,
                    days_since_last_visit: snapshot.days_since_last_visit,
                })
            })
            .collect();

        boxes.sort_by(|a, b| {
            b.profitability_score
                .total_cmp(&a.profitability_score)
                .then_with(|| a.box_id.cmp(&b.box_id))
        });
        boxes
    }

    /// Boxes with a recorded visit, most recently visited first.
    pub fn visited_boxes(&self) -> Vec<VisitedBox> {
        let now = self.clock.now();
        let mut visited: Vec<VisitedBox> = self
            .ledger
            .iter()
            .filter_map(|(box_id, entry)| {
                let last_visit = entry.last_visit?;
                let record = self.catalog.get(box_id)?;
                Some(VisitedBox {
                    box_id,
                    address: record.address.clone(),
                    municipality: record.municipality.clone(),
                    postal_code: record.postal_code.clone(),
                    container_type: record.container_type.clone(),
                    last_visit,
                    days_since_last_visit: days_since_last_visit(Some(last_visit), now).as_option(),
                    visit_history: entry.history.clone(),
                })
            })
            .collect();

        visited.sort_by(|a, b| {
            b.last_visit
                .cmp(&a.last_visit)
                .then_with(|| a.box_id.cmp(&b.box_id))
        });
        visited
    }

    pub fn stats(&self) -> CatalogStats {
        let total_boxes = self.catalog.len();
        let visited_boxes = self.ledger.visited_count();

        let known: Vec<&BoxRecord> = self
            .catalog
            .iter()
            .filter(|r| r.average_fill.is_some_and(f64::is_finite))
            .collect();
        let average_fill = if known.is_empty() {
            0.0
        } else {
            known.iter().map(|r| r.average_or_zero()).sum::<f64>() / known.len() as f64
        };

        let mut top = known;
        top.sort_by(|a, b| {
            b.average_or_zero()
                .total_cmp(&a.average_or_zero())
                .then_with(|| a.id.cmp(&b.id))
        });

        CatalogStats {
            total_boxes,
            visited_boxes,
            visit_rate: if total_boxes == 0 {
                0.0
            } else {
                round1(visited_boxes as f64 / total_boxes as f64 * 100.0)
            },
            average_fill: round1(average_fill),
            top_boxes: top
                .into_iter()
                .take(TOP_LOGGED)
                .map(|r| TopBox {
                    box_id: r.id,
                    address: r.address.clone(),
                    average_fill: r.average_or_zero(),
                })
                .collect(),
        }
    }

    /// Record a visit now. Drops the whole cache, then recomputes just this box.
    /// The returned record is meant for the audit log.
    pub fn mark_visit(&mut self, box_id: u32, observed_fill: Option<f64>) -> Result<VisitRecord> {
        if let Some(fill) = observed_fill {
            require_fill("fill_level", fill)?;
        }
        let record = self.require_box(box_id)?;

        let now = self.clock.now();
        let previous = days_since_last_visit(self.ledger.last_visit(box_id), now).as_option();
        let expected_fill = fill::expected_fill(record);
        let visited_at = visit_timestamp(now);

        let audit = VisitRecord {
            timestamp: visited_at,
            box_id,
            address: record.address.clone(),
            municipality: record.municipality.clone(),
            postal_code: record.postal_code.clone(),
            container_type: record.container_type.clone(),
            expected_fill,
            observed_fill,
            fill_difference: observed_fill.map(|observed| observed - expected_fill),
            days_since_previous_visit: previous,
            average_fill: record.average_fill,
        };

        self.ledger.record_visit(
            box_id,
            VisitEvent {
                date: visited_at,
                fill_level: observed_fill,
                expected_fill,
            },
        );

        self.cache.invalidate_all();
        self.refresh_box(box_id, now);

        info!(
            "Visit recorded - box #{box_id}: expected {expected_fill:.1}, observed {}",
            observed_fill.map_or_else(|| "N/A".to_string(), |f| format!("{f:.1}"))
        );
        Ok(audit)
    }

    pub fn add_box(&mut self, new_box: NewBox) -> Result<BoxRecord> {
        let record = self.catalog.insert(new_box)?.clone();
        self.cache.invalidate_all();
        info!("Box #{} added: {}", record.id, record.address);
        Ok(record)
    }

    /// Remove a box along with its ledger entry and cached snapshot.
    pub fn remove_box(&mut self, box_id: u32) -> Result<BoxRecord> {
        let record = self.catalog.remove(box_id)?;
        self.ledger.remove(box_id);
        self.cache.invalidate_all();
        info!("Box #{box_id} removed");
        Ok(record)
    }

    pub fn update_box(&mut self, box_id: u32, update: BoxUpdate) -> Result<BoxRecord> {
        let record = self.catalog.update(box_id, update)?.clone();
        self.cache.invalidate_all();
        info!("Box #{box_id} updated");
        Ok(record)
    }

    /// Forget every visit; returns how many boxes had one.
    pub fn reset_visits(&mut self) -> usize {
        let cleared = self.ledger.reset();
        self.cache.invalidate_all();
        info!("{cleared} visits cleared");
        cleared
    }

    fn refresh_box(&mut self, box_id: u32, now: DateTime<Tz>) {
        if let Some(record) = self.catalog.get(box_id) {
            let snapshot = compute_snapshot(record, self.ledger.last_visit(box_id), now);
            self.cache.refresh_box(box_id, snapshot);
        }
    }

    fn require_box(&self, box_id: u32) -> Result<&BoxRecord> {
        self.catalog.get(box_id).ok_or(EngineError::NotFound(box_id))
    }

    fn log_parameters(&self) {
        info!("=== Scoring parameters ===");
        info!("Timezone: {}", self.clock.timezone());
        info!("History window: last {HISTORY_WEEKS} weeks with data, per box");
        info!("Trend bonus: 0.5 x slope, max +{MAX_TREND_BONUS}");
        info!("Expected fill: 0.7 x fill score + 0.3 x long-run average");
        info!("Urgency: 10 / (1 + exp(-0.5 * (days - 7))), never visited = 0.8 x average (max 8)");
        info!("Urgency multiplier: 1.0 to 1.5, equity bonus: up to 30 points");
    }
}

/// Score bundle of one box at `now`; a pure function of record and last visit.
pub fn compute_snapshot(
    record: &BoxRecord,
    last_visit: Option<DateTime<FixedOffset>>,
    now: DateTime<Tz>,
) -> ScoreSnapshot {
    let days = days_since_last_visit(last_visit, now);
    let fill_score = fill::fill_score(record);
    let expected_fill = fill::expected_fill_from(fill_score, record.average_fill);
    let urgency = urgency_score(days, record.average_fill);
    let equity = equity_score(days);

    ScoreSnapshot {
        fill_score,
        urgency_score: urgency,
        equity_score: equity,
        expected_fill,
        profitability_score: profitability_score(expected_fill, urgency, equity),
        days_since_last_visit: days.as_option(),
    }
}

fn scoring_stats(scores: &[f64]) -> ScoringStats {
    let total = scores.len();
    if total == 0 {
        return ScoringStats {
            total: 0,
            scored: 0,
            mean: 0.0,
            std_dev: 0.0,
        };
    }

    let mean = scores.iter().sum::<f64>() / total as f64;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / total as f64;

    ScoringStats {
        total,
        scored: scores.iter().filter(|s| **s > 0.0).count(),
        mean,
        std_dev: variance.sqrt(),
    }
}

fn log_scoring_stats(stats: &ScoringStats, ranked: &[Recommendation]) {
    if stats.total == 0 {
        return;
    }

    info!(
        "Scoring stats - scored boxes: {}/{}, mean: {:.1}, std dev: {:.1}",
        stats.scored, stats.total, stats.mean, stats.std_dev
    );
    if !ranked.is_empty() {
        info!("Top {} boxes:", ranked.len().min(TOP_LOGGED));
        for (rank, rec) in ranked.iter().take(TOP_LOGGED).enumerate() {
            info!(
                "  {}. box #{} - score {:.1} - {} ({})",
                rank + 1,
                rec.box_id,
                rec.profitability_score,
                rec.address,
                rec.municipality
            );
        }
    }
}

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::recency::{ManualClock, DEFAULT_TIMEZONE};
    use chrono::{Duration, TimeZone};

    fn record(id: u32, weekly: f64, average: Option<f64>) -> BoxRecord {
        BoxRecord {
            id,
            address: format!("Rue {id}"),
            municipality: "Morges".to_string(),
            postal_code: "1110".to_string(),
            container_type: "Textile".to_string(),
            weekly_fill: vec![Some(weekly); 4],
            average_fill: average,
        }
    }

    fn clock() -> ManualClock {
        ManualClock::new(
            DEFAULT_TIMEZONE
                .with_ymd_and_hms(2024, 6, 1, 9, 0, 0)
                .single()
                .expect("time"),
        )
    }

    fn engine(records: Vec<BoxRecord>, clock: &ManualClock) -> RecommendationEngine {
        let catalog = BoxCatalog::new(4, records).expect("catalog");
        RecommendationEngine::new(catalog, VisitLedger::new(), Box::new(clock.clone()))
    }

    #[test]
    fn stats_use_population_std_dev() {
        let stats = scoring_stats(&[0.0, 10.0, 20.0, 30.0]);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.scored, 3);
        assert!((stats.mean - 15.0).abs() < 1e-9);
        assert!((stats.std_dev - 125.0f64.sqrt()).abs() < 1e-9);

        assert_eq!(scoring_stats(&[]).total, 0);
    }

    #[test]
    fn construction_prewarms_cache() {
        let clock = clock();
        let engine = engine(vec![record(1, 5.0, Some(5.0))], &clock);
        assert_eq!(engine.cache_state(), CacheState::Valid);
    }

    #[test]
    fn snapshot_scenario_ten_days_after_visit() {
        let clock = clock();
        let mut engine = engine(vec![record(1, 5.0, None)], &clock);

        engine.mark_visit(1, Some(5.0)).expect("visit");
        clock.advance(Duration::days(10));
        engine.rebuild_cache();

        let snap = engine.snapshot(1).expect("snapshot");
        assert_eq!(snap.days_since_last_visit, Some(10));
        assert!((snap.fill_score - 5.0).abs() < 1e-9);
        assert!((snap.expected_fill - 3.5).abs() < 1e-9);
        assert!((snap.equity_score - 4.1).abs() < 1e-9);
        assert!((snap.profitability_score - 57.5).abs() < 0.1);
    }

    #[test]
    fn ties_break_by_ascending_id() {
        let clock = clock();
        let mut engine = engine(
            vec![record(9, 5.0, Some(5.0)), record(2, 5.0, Some(5.0)), record(4, 8.0, Some(8.0))],
            &clock,
        );

        let ranked: Vec<u32> = engine
            .recommended_boxes(10, 0.0)
            .iter()
            .map(|r| r.box_id)
            .collect();
        assert_eq!(ranked, vec![4, 2, 9]);
    }

    #[test]
    fn mark_visit_rejects_out_of_range_fill() {
        let clock = clock();
        let mut engine = engine(vec![record(1, 5.0, Some(5.0))], &clock);

        assert!(matches!(engine.mark_visit(1, Some(12.0)), Err(EngineError::InvalidInput(_))));
        assert!(matches!(engine.mark_visit(1, Some(f64::NAN)), Err(EngineError::InvalidInput(_))));
        assert!(matches!(engine.mark_visit(2, None), Err(EngineError::NotFound(2))));
        assert!(engine.ledger().is_empty());
        assert_eq!(engine.cache_state(), CacheState::Valid);
    }

    #[test]
    fn single_box_reads_while_invalid_are_current() {
        let clock = clock();
        let mut engine = engine(vec![record(1, 5.0, Some(5.0)), record(2, 5.0, Some(5.0))], &clock);
        clock.advance(Duration::days(3));

        engine.mark_visit(1, None).expect("visit");
        assert_eq!(engine.cache_state(), CacheState::Invalid);

        assert_eq!(engine.snapshot(1).expect("visited").days_since_last_visit, Some(0));
        let other = engine.snapshot(2).expect("other");
        let expected = compute_snapshot(engine.catalog().get(2).expect("box"), None, clock.now());
        assert_eq!(other, expected);
        assert_eq!(engine.cache_state(), CacheState::Invalid);
    }

    #[test]
    fn round1_rounds_half_away_from_zero() {
        assert_eq!(round1(57.46), 57.5);
        assert_eq!(round1(3.25), 3.3);
    }
}
