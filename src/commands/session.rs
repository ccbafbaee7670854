use crate::analysis::recency::{Clock, SystemClock};
use crate::commands::audit::{CsvVisitLog, VisitLog};
use crate::commands::catalog::{load_catalog_csv, write_catalog_csv};
use crate::commands::db::{load_or_empty, JsonLedgerStore, LedgerStore, SqliteLedgerStore};
use crate::commands::scoring::RecommendationEngine;
use crate::commands::settings::{EngineSettings, LedgerBackend};
use crate::error::{EngineError, Result};
use crate::models::visit::VisitRecord;
use log::{error, info};
use std::path::PathBuf;

/// What a mutation touched, so `commit` writes only what changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Ledger,
    Catalog,
    CatalogAndLedger,
}

/// An engine wired to its catalog file, ledger store and visit log.
pub struct Session {
    engine: RecommendationEngine,
    catalog_file: PathBuf,
    store: Box<dyn LedgerStore>,
    visit_log: Box<dyn VisitLog>,
}

impl Session {
    pub fn open(settings: &EngineSettings) -> Result<Self> {
        Self::open_with_clock(settings, Box::new(SystemClock::new(settings.timezone)))
    }

    /// A missing or malformed catalog is fatal; an unreadable ledger starts empty.
    pub fn open_with_clock(settings: &EngineSettings, clock: Box<dyn Clock>) -> Result<Self> {
        let catalog = load_catalog_csv(&settings.catalog_file)?;

        let store: Box<dyn LedgerStore> = match settings.ledger_backend {
            LedgerBackend::Json => {
                Box::new(JsonLedgerStore::new(&settings.state_file, settings.timezone))
            }
            LedgerBackend::Sqlite => {
                Box::new(SqliteLedgerStore::new(&settings.database_file, settings.timezone))
            }
        };
        let ledger = load_or_empty(store.as_ref());
        info!(
            "Loaded {} visited boxes from {:?} ledger",
            ledger.visited_count(),
            settings.ledger_backend
        );

        Ok(Self {
            engine: RecommendationEngine::new(catalog, ledger, clock),
            catalog_file: settings.catalog_file.clone(),
            store,
            visit_log: Box::new(CsvVisitLog::new(&settings.visit_log_file)),
        })
    }

    pub fn engine(&self) -> &RecommendationEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut RecommendationEngine {
        &mut self.engine
    }

    /// Mark a visit, then persist the ledger and append the audit row.
    /// The in-memory visit stands even if persistence fails; the error is returned alongside.
    pub fn record_visit(
        &mut self,
        box_id: u32,
        observed_fill: Option<f64>,
    ) -> Result<(VisitRecord, Option<EngineError>)> {
        let record = self.engine.mark_visit(box_id, observed_fill)?;

        let mut failure = self.commit(Change::Ledger).err();
        if let Err(e) = self.visit_log.append(&record) {
            error!("Failed to append visit #{box_id} to the visit log: {e}");
            if failure.is_none() {
                failure = Some(e);
            }
        }

        Ok((record, failure))
    }

    /// Write the parts of the state a mutation changed. Nothing is rolled back on failure.
    pub fn commit(&self, change: Change) -> Result<()> {
        if matches!(change, Change::Catalog | Change::CatalogAndLedger) {
            write_catalog_csv(&self.catalog_file, self.engine.catalog()).map_err(|e| {
                error!("Failed to save catalog to {}: {e}", self.catalog_file.display());
                e
            })?;
        }
        if matches!(change, Change::Ledger | Change::CatalogAndLedger) {
            self.store.save(self.engine.ledger()).map_err(|e| {
                error!("Failed to save visit ledger: {e}");
                e
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::recency::ManualClock;
    use chrono::TimeZone;
    use std::fs;
    use std::path::Path;

    fn settings(dir: &Path, backend: LedgerBackend) -> EngineSettings {
        EngineSettings {
            data_dir: dir.to_path_buf(),
            timezone: chrono_tz::Europe::Zurich,
            max_boxes: 20,
            min_score: 30.0,
            ledger_backend: backend,
            catalog_file: dir.join("boxes.csv"),
            state_file: dir.join("state.json"),
            database_file: dir.join("ledger.db"),
            visit_log_file: dir.join("visits.csv"),
        }
    }

    fn write_catalog(dir: &Path) {
        fs::write(
            dir.join("boxes.csv"),
            "n_boite,adresse,commune,cp,conteneur,volume_moyen,semaine_1,semaine_2\n\
             1,Rue A 1,Nyon,1260,Textile,6,5,6\n\
             2,Rue B 2,Gland,1196,Shoes,4,3,4\n",
        )
        .expect("write catalog");
    }

    fn clock() -> Box<ManualClock> {
        Box::new(ManualClock::new(
            chrono_tz::Europe::Zurich.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
        ))
    }

    #[test]
    fn visit_survives_reopen_with_both_backends() {
        for backend in [LedgerBackend::Json, LedgerBackend::Sqlite] {
            let dir = tempfile::tempdir().expect("temp dir");
            write_catalog(dir.path());
            let settings = settings(dir.path(), backend);

            let mut session = Session::open_with_clock(&settings, clock()).expect("open");
            let (record, failure) = session.record_visit(2, Some(5.0)).expect("visit");
            assert!(failure.is_none());
            assert_eq!(record.box_id, 2);

            let reopened = Session::open_with_clock(&settings, clock()).expect("reopen");
            assert_eq!(reopened.engine().ledger().visited_count(), 1);
            assert!(reopened.engine().ledger().last_visit(2).is_some());

            let log = fs::read_to_string(&settings.visit_log_file).expect("visit log");
            assert_eq!(log.lines().count(), 2);
        }
    }

    #[test]
    fn missing_catalog_fails_to_open() {
        let dir = tempfile::tempdir().expect("temp dir");
        let settings = settings(dir.path(), LedgerBackend::Json);
        assert!(Session::open_with_clock(&settings, clock()).is_err());
    }

    #[test]
    fn unwritable_ledger_keeps_the_visit_in_memory() {
        let dir = tempfile::tempdir().expect("temp dir");
        write_catalog(dir.path());
        let mut settings = settings(dir.path(), LedgerBackend::Json);
        // Parent is a regular file, so the ledger cannot be written.
        settings.state_file = dir.path().join("boxes.csv").join("state.json");

        let mut session = Session::open_with_clock(&settings, clock()).expect("open");
        let (_, failure) = session.record_visit(1, None).expect("visit");

        assert!(failure.is_some());
        assert!(session.engine().ledger().last_visit(1).is_some());
    }
}
