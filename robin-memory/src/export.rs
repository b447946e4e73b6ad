//! Export and import of the whole store as a JSON document

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::store::{entity_breakdown, entity_from_row, investigation_from_row, ENTITY_COLUMNS, INVESTIGATION_COLUMNS};
use crate::{Entity, Investigation, MemoryStore, StoreResult};

/// Full dump of investigations and indicators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportSnapshot {
    pub investigations: Vec<Investigation>,
    pub entities: Vec<Entity>,
    /// Indicator count per type
    pub entity_stats: BTreeMap<String, i64>,
    pub exported_at: DateTime<Utc>,
}

/// What an import added
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub investigations_added: usize,
    pub investigations_skipped: usize,
    pub entities_added: usize,
    pub entities_skipped: usize,
}

impl MemoryStore {
    pub fn export_all(&self) -> StoreResult<ExportSnapshot> {
        self.read(|conn| {
            let sql = format!("SELECT {} FROM investigations ORDER BY id", INVESTIGATION_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let investigations = stmt
                .query_map([], investigation_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            let sql = format!("SELECT {} FROM entities ORDER BY id", ENTITY_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let entities = stmt.query_map([], entity_from_row)?.collect::<Result<Vec<_>, _>>()?;

            Ok(ExportSnapshot {
                investigations,
                entities,
                entity_stats: entity_breakdown(conn)?,
                exported_at: Utc::now(),
            })
        })
    }

    /// Merge a snapshot into this store. Nothing is cleared; rows whose
    /// investigation id or (type, value) already exist are left alone.
    pub fn import_all(&self, snapshot: &ExportSnapshot) -> StoreResult<ImportSummary> {
        let summary = self.write(|conn| {
            let mut summary = ImportSummary::default();

            // Investigations may name sessions this store has never seen
            let sessions: BTreeSet<(&str, DateTime<Utc>)> = snapshot
                .investigations
                .iter()
                .filter_map(|inv| inv.session_id.as_deref().map(|s| (s, inv.created_at)))
                .collect();
            for (session_id, started_at) in sessions {
                conn.execute(
                    "INSERT OR IGNORE INTO sessions (id, started_at, investigation_count) VALUES (?1, ?2, 0)",
                    params![session_id, started_at],
                )?;
            }

            for inv in &snapshot.investigations {
                let added = conn.execute(
                    "INSERT OR IGNORE INTO investigations (
                        id, query, refined_query, model, created_at, summary, summary_file,
                        result_count, filtered_count, capture_count, duration_seconds, session_id
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        inv.id,
                        inv.query,
                        inv.refined_query,
                        inv.model,
                        inv.created_at,
                        inv.summary,
                        inv.summary_file,
                        inv.result_count,
                        inv.filtered_count,
                        inv.capture_count,
                        inv.duration_seconds,
                        inv.session_id,
                    ],
                )?;
                if added == 1 {
                    summary.investigations_added += 1;
                } else {
                    summary.investigations_skipped += 1;
                }
            }

            conn.execute(
                "UPDATE sessions SET investigation_count =
                    (SELECT COUNT(*) FROM investigations WHERE session_id = sessions.id)",
                [],
            )?;

            for entity in &snapshot.entities {
                let added = conn.execute(
                    "INSERT OR IGNORE INTO entities (entity_type, value, first_seen, last_seen, frequency)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        entity.entity_type.as_str(),
                        entity.value,
                        entity.first_seen,
                        entity.last_seen,
                        entity.frequency,
                    ],
                )?;
                if added == 1 {
                    summary.entities_added += 1;
                } else {
                    summary.entities_skipped += 1;
                }
            }

            Ok(summary)
        })?;

        info!(
            "Imported {} investigations and {} entities ({} and {} already present)",
            summary.investigations_added,
            summary.entities_added,
            summary.investigations_skipped,
            summary.entities_skipped
        );
        Ok(summary)
    }

    /// Write a pretty-printed export to `path`
    pub fn export_to_file(&self, path: impl AsRef<Path>) -> StoreResult<ExportSnapshot> {
        let snapshot = self.export_all()?;
        fs::write(path.as_ref(), serde_json::to_string_pretty(&snapshot)?)?;
        info!("Exported memory to {}", path.as_ref().display());
        Ok(snapshot)
    }

    pub fn import_from_file(&self, path: impl AsRef<Path>) -> StoreResult<ImportSummary> {
        let data = fs::read_to_string(path.as_ref())?;
        let snapshot: ExportSnapshot = serde_json::from_str(&data)?;
        self.import_all(&snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NewInvestigation, NewSearchResult, StoreError};

    fn populated() -> MemoryStore {
        let store = MemoryStore::open_in_memory().unwrap();
        let session = store.start_session().unwrap();
        for (query, text) in [
            ("ransomware payments", "pay 1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"),
            ("exploit broker", "selling CVE-2024-1234 contact broker@example.com"),
        ] {
            let new = NewInvestigation {
                query: query.to_string(),
                model: "gpt-4o-mini".to_string(),
                session_id: Some(session.clone()),
                ..Default::default()
            };
            store
                .save_run(&new, &[NewSearchResult::new("http://a.onion/", "A")], &[], text)
                .unwrap();
        }
        store
    }

    #[test]
    fn test_export_shape() {
        let snapshot = populated().export_all().unwrap();
        let json = serde_json::to_value(&snapshot).unwrap();
        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["entities", "entity_stats", "exported_at", "investigations"]);
        assert_eq!(snapshot.entity_stats.get("cve"), Some(&1));
    }

    #[test]
    fn test_round_trip_into_empty_store() {
        let source = populated();
        let snapshot = source.export_all().unwrap();

        let target = MemoryStore::open_in_memory().unwrap();
        let summary = target.import_all(&snapshot).unwrap();
        assert_eq!(summary.investigations_added, 2);
        assert_eq!(summary.entities_added, 3);

        let source_stats = source.get_statistics().unwrap();
        let target_stats = target.get_statistics().unwrap();
        assert_eq!(target_stats.total_investigations, source_stats.total_investigations);
        assert_eq!(target_stats.total_entities, source_stats.total_entities);

        let session_id = snapshot.investigations[0].session_id.clone().unwrap();
        assert_eq!(target.get_session(&session_id).unwrap().unwrap().investigation_count, 2);
    }

    #[test]
    fn test_reimport_is_ignored() {
        let store = populated();
        let snapshot = store.export_all().unwrap();

        let summary = store.import_all(&snapshot).unwrap();
        assert_eq!(summary.investigations_added, 0);
        assert_eq!(summary.investigations_skipped, 2);
        assert_eq!(summary.entities_added, 0);
        assert_eq!(store.get_statistics().unwrap().total_investigations, 2);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");

        populated().export_to_file(&path).unwrap();
        let target = MemoryStore::open_in_memory().unwrap();
        let summary = target.import_from_file(&path).unwrap();

        assert_eq!(summary.investigations_added, 2);
        assert_eq!(target.get_top_entities(None, 10).unwrap().len(), 3);
    }

    #[test]
    fn test_import_rejects_other_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"investigations": [], "entities": [], "extra": 1}"#).unwrap();

        let store = MemoryStore::open_in_memory().unwrap();
        assert!(matches!(store.import_from_file(&path), Err(StoreError::Serialization(_))));
    }
}
