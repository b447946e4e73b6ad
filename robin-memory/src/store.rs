//! SQLite-backed investigation store
//!
//! One connection per process, guarded by a mutex. Every write runs in an
//! immediate transaction so concurrent savers of the same indicator
//! serialize on the database write lock instead of losing updates.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use robin_core::{extract_indicators, indicator_pairs, IndicatorType};

use crate::schema::{apply_pragmas, initialize};
use crate::similarity::rank_by_overlap;
use crate::{
    Entity, EntityMatch, Investigation, InvestigationRef, ModelUsage, NewInvestigation, NewSearchResult,
    OnionReputation, QueryContext, ReputationScore, SearchResultRecord, Session, SimilarInvestigation,
    Statistics, StoreError, StoreResult,
};

/// Investigations scanned by similarity lookup
pub const SIMILARITY_WINDOW: i64 = 100;

/// Related investigations reported by a reputation lookup
pub const REPUTATION_RELATED_LIMIT: i64 = 10;

pub(crate) const INVESTIGATION_COLUMNS: &str = "id, query, refined_query, model, created_at, summary, summary_file, \
     result_count, filtered_count, capture_count, duration_seconds, session_id";

pub(crate) const ENTITY_COLUMNS: &str = "id, entity_type, value, first_seen, last_seen, frequency";

/// Persistent memory of investigations and the indicators they surfaced
pub struct MemoryStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Open (creating if needed) a file-backed store
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        apply_pragmas(&conn, true)?;
        initialize(&conn)?;
        info!("Opened investigation memory at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a throwaway in-memory store
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        apply_pragmas(&conn, false)?;
        initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` inside an immediate transaction
    pub(crate) fn write<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    // Sessions

    /// Open a new session and return its id
    pub fn start_session(&self) -> StoreResult<String> {
        let id = uuid::Uuid::new_v4().simple().to_string()[..16].to_string();
        self.write(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, started_at, investigation_count) VALUES (?1, ?2, 0)",
                params![id, Utc::now()],
            )?;
            Ok(())
        })?;
        debug!("Started session {}", id);
        Ok(id)
    }

    /// Close a session, recounting its investigations
    pub fn end_session(&self, session_id: &str) -> StoreResult<Session> {
        self.write(|conn| {
            let updated = conn.execute(
                "UPDATE sessions
                 SET ended_at = ?2,
                     investigation_count = (SELECT COUNT(*) FROM investigations WHERE session_id = ?1)
                 WHERE id = ?1",
                params![session_id, Utc::now()],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("session {}", session_id)));
            }
            load_session(conn, session_id)?.ok_or_else(|| StoreError::NotFound(format!("session {}", session_id)))
        })
    }

    pub fn get_session(&self, session_id: &str) -> StoreResult<Option<Session>> {
        self.read(|conn| load_session(conn, session_id))
    }

    // Saving

    pub fn save_investigation(&self, investigation: &NewInvestigation) -> StoreResult<i64> {
        self.write(|conn| insert_investigation(conn, investigation, Utc::now()))
    }

    #[cfg(test)]
    pub(crate) fn save_investigation_at(&self, investigation: &NewInvestigation, created_at: DateTime<Utc>) -> StoreResult<i64> {
        self.write(|conn| insert_investigation(conn, investigation, created_at))
    }

    /// Store discovered links, flagging those that were selected
    pub fn save_search_results(
        &self,
        investigation_id: i64,
        results: &[NewSearchResult],
        selected_urls: &[String],
    ) -> StoreResult<usize> {
        if results.is_empty() {
            return Ok(0);
        }
        self.write(|conn| insert_search_results(conn, investigation_id, results, selected_urls))
    }

    /// Extract indicators from `text` and attach them to an investigation.
    /// Returns the number of newly linked indicators; repeating the call
    /// with the same text changes nothing.
    pub fn extract_and_save_entities(&self, investigation_id: i64, text: &str) -> StoreResult<usize> {
        self.extract_and_save_entities_at(investigation_id, text, Utc::now())
    }

    pub(crate) fn extract_and_save_entities_at(
        &self,
        investigation_id: i64,
        text: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        self.write(|conn| record_entities(conn, investigation_id, text, now))
    }

    /// Save an investigation, its results and its indicators atomically
    pub fn save_run(
        &self,
        investigation: &NewInvestigation,
        results: &[NewSearchResult],
        selected_urls: &[String],
        entity_text: &str,
    ) -> StoreResult<i64> {
        let now = Utc::now();
        let id = self.write(|conn| {
            let id = insert_investigation(conn, investigation, now)?;
            insert_search_results(conn, id, results, selected_urls)?;
            record_entities(conn, id, entity_text, now)?;
            Ok(id)
        })?;
        info!("Saved investigation {} ({} results)", id, results.len());
        Ok(id)
    }

    // Queries

    pub fn get_investigation(&self, id: i64) -> StoreResult<Option<Investigation>> {
        self.read(|conn| {
            let sql = format!("SELECT {} FROM investigations WHERE id = ?1", INVESTIGATION_COLUMNS);
            Ok(conn.query_row(&sql, [id], investigation_from_row).optional()?)
        })
    }

    pub fn get_search_results(&self, investigation_id: i64) -> StoreResult<Vec<SearchResultRecord>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, investigation_id, url, title, was_filtered, was_scraped, relevance_score
                 FROM search_results WHERE investigation_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map([investigation_id], |row| {
                Ok(SearchResultRecord {
                    id: row.get(0)?,
                    investigation_id: row.get(1)?,
                    url: row.get(2)?,
                    title: row.get(3)?,
                    was_filtered: row.get(4)?,
                    was_scraped: row.get(5)?,
                    relevance_score: row.get(6)?,
                })
            })?;
            Ok(rows.collect::<Result<_, _>>()?)
        })
    }

    /// Most recent investigations, newest first
    pub fn get_investigation_history(&self, limit: usize) -> StoreResult<Vec<Investigation>> {
        self.read(|conn| recent_investigations(conn, limit as i64))
    }

    /// Past investigations sharing keywords with `query`
    pub fn get_similar_investigations(&self, query: &str, limit: usize) -> StoreResult<Vec<SimilarInvestigation>> {
        self.read(|conn| similar_investigations(conn, query, limit))
    }

    pub fn get_entity_statistics(&self) -> StoreResult<BTreeMap<String, i64>> {
        self.read(entity_breakdown)
    }

    pub fn get_statistics(&self) -> StoreResult<Statistics> {
        self.read(|conn| {
            let total_investigations = conn.query_row("SELECT COUNT(*) FROM investigations", [], |r| r.get(0))?;
            let total_entities = conn.query_row("SELECT COUNT(*) FROM entities", [], |r| r.get(0))?;

            let mut stmt = conn.prepare(
                "SELECT model, COUNT(*) AS uses FROM investigations
                 GROUP BY model ORDER BY uses DESC, model ASC LIMIT 5",
            )?;
            let top_models = stmt
                .query_map([], |row| {
                    Ok(ModelUsage {
                        model: row.get(0)?,
                        count: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let total_captures =
                conn.query_row("SELECT COALESCE(SUM(capture_count), 0) FROM investigations", [], |r| r.get(0))?;
            let avg: Option<f64> = conn.query_row(
                "SELECT AVG(result_count) FROM investigations WHERE result_count > 0",
                [],
                |r| r.get(0),
            )?;

            Ok(Statistics {
                total_investigations,
                total_entities,
                entity_breakdown: entity_breakdown(conn)?,
                top_models,
                total_captures,
                avg_results: (avg.unwrap_or(0.0) * 10.0).round() / 10.0,
            })
        })
    }

    /// Most frequent indicators, optionally of one type
    pub fn get_top_entities(&self, entity_type: Option<IndicatorType>, limit: usize) -> StoreResult<Vec<Entity>> {
        self.read(|conn| {
            let sql = format!(
                "SELECT {} FROM entities
                 WHERE (?1 IS NULL OR entity_type = ?1)
                 ORDER BY frequency DESC, id ASC LIMIT ?2",
                ENTITY_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![entity_type.map(|t| t.as_str()), limit as i64], entity_from_row)?;
            Ok(rows.collect::<Result<_, _>>()?)
        })
    }

    /// Exact-value lookup. When several types share the value, the most
    /// frequent one wins.
    pub fn search_entity(&self, value: &str) -> StoreResult<Option<EntityMatch>> {
        self.read(|conn| {
            let sql = format!(
                "SELECT {} FROM entities WHERE value = ?1 ORDER BY frequency DESC, id ASC LIMIT 1",
                ENTITY_COLUMNS
            );
            match conn.query_row(&sql, [value], entity_from_row).optional()? {
                Some(entity) => Ok(Some(entity_match(conn, entity, None)?)),
                None => Ok(None),
            }
        })
    }

    /// Similar investigations plus known indicators mentioned in `query`
    pub fn get_context_for_query(&self, query: &str) -> StoreResult<QueryContext> {
        self.read(|conn| {
            let similar_investigations = similar_investigations(conn, query, 5)?;

            let mut related_entities = Vec::new();
            for (indicator_type, value) in indicator_pairs(&extract_indicators(query)) {
                if let Some(entity) = find_entity(conn, indicator_type, value)? {
                    related_entities.push(entity_match(conn, entity, None)?);
                }
            }

            Ok(QueryContext {
                similar_investigations,
                related_entities,
            })
        })
    }

    /// Historical context for an onion domain (scheme and path ignored)
    pub fn onion_reputation(&self, domain: &str) -> StoreResult<OnionReputation> {
        let domain = normalize_onion_domain(domain);
        self.read(|conn| {
            let Some(entity) = find_entity(conn, IndicatorType::OnionDomain, &domain)? else {
                return Ok(OnionReputation {
                    domain,
                    known: false,
                    first_seen: None,
                    last_seen: None,
                    appearances: 0,
                    related_investigations: Vec::new(),
                    reputation_score: None,
                });
            };

            let appearances: i64 = conn.query_row(
                "SELECT COUNT(*) FROM investigation_entities WHERE entity_id = ?1",
                [entity.id],
                |r| r.get(0),
            )?;
            let first_seen = entity.first_seen;
            let last_seen = entity.last_seen;
            let related = entity_match(conn, entity, Some(REPUTATION_RELATED_LIMIT))?;

            Ok(OnionReputation {
                domain,
                known: true,
                first_seen: Some(first_seen),
                last_seen: Some(last_seen),
                appearances,
                related_investigations: related.investigations,
                reputation_score: Some(ReputationScore::from_appearances(appearances)),
            })
        })
    }

    /// Delete investigations older than `days`. Their results and
    /// indicator links go with them; the indicators themselves stay.
    pub fn cleanup_older_than(&self, days: u32) -> StoreResult<usize> {
        // A window reaching past the earliest representable date keeps everything
        let Some(cutoff) = Duration::try_days(i64::from(days)).and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            info!("Cleanup window of {} days predates any record, nothing removed", days);
            return Ok(0);
        };
        let deleted = self.write(|conn| Ok(conn.execute("DELETE FROM investigations WHERE created_at < ?1", [cutoff])?))?;
        info!("Cleanup removed {} investigations older than {} days", deleted, days);
        Ok(deleted)
    }
}

pub(crate) fn investigation_from_row(row: &Row) -> rusqlite::Result<Investigation> {
    Ok(Investigation {
        id: row.get(0)?,
        query: row.get(1)?,
        refined_query: row.get(2)?,
        model: row.get(3)?,
        created_at: row.get(4)?,
        summary: row.get(5)?,
        summary_file: row.get(6)?,
        result_count: row.get(7)?,
        filtered_count: row.get(8)?,
        capture_count: row.get(9)?,
        duration_seconds: row.get(10)?,
        session_id: row.get(11)?,
    })
}

pub(crate) fn entity_from_row(row: &Row) -> rusqlite::Result<Entity> {
    let type_name: String = row.get(1)?;
    let entity_type = type_name
        .parse::<IndicatorType>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
    Ok(Entity {
        id: row.get(0)?,
        entity_type,
        value: row.get(2)?,
        first_seen: row.get(3)?,
        last_seen: row.get(4)?,
        frequency: row.get(5)?,
    })
}

fn load_session(conn: &Connection, session_id: &str) -> StoreResult<Option<Session>> {
    Ok(conn
        .query_row(
            "SELECT id, started_at, ended_at, investigation_count FROM sessions WHERE id = ?1",
            [session_id],
            |row| {
                Ok(Session {
                    id: row.get(0)?,
                    started_at: row.get(1)?,
                    ended_at: row.get(2)?,
                    investigation_count: row.get(3)?,
                })
            },
        )
        .optional()?)
}

fn insert_investigation(conn: &Connection, inv: &NewInvestigation, created_at: DateTime<Utc>) -> StoreResult<i64> {
    if let Some(session_id) = &inv.session_id {
        let bumped = conn.execute(
            "UPDATE sessions SET investigation_count = investigation_count + 1 WHERE id = ?1",
            [session_id],
        )?;
        if bumped == 0 {
            return Err(StoreError::NotFound(format!("session {}", session_id)));
        }
    }

    conn.execute(
        "INSERT INTO investigations (
            query, refined_query, model, created_at, summary, summary_file,
            result_count, filtered_count, capture_count, duration_seconds, session_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            inv.query,
            inv.refined_query,
            inv.model,
            created_at,
            inv.summary,
            inv.summary_file,
            inv.result_count,
            inv.filtered_count,
            inv.capture_count,
            inv.duration_seconds,
            inv.session_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_search_results(
    conn: &Connection,
    investigation_id: i64,
    results: &[NewSearchResult],
    selected_urls: &[String],
) -> StoreResult<usize> {
    let selected: HashSet<&str> = selected_urls.iter().map(String::as_str).collect();
    let mut stmt = conn.prepare_cached(
        "INSERT INTO search_results (investigation_id, url, title, was_filtered, was_scraped, relevance_score)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for result in results {
        stmt.execute(params![
            investigation_id,
            result.url,
            result.title,
            selected.contains(result.url.as_str()),
            result.was_scraped,
            result.relevance_score,
        ])?;
    }
    Ok(results.len())
}

/// Link every indicator in `text` to the investigation. Frequency moves
/// only when a link is new, so replays are no-ops.
fn record_entities(conn: &Connection, investigation_id: i64, text: &str, now: DateTime<Utc>) -> StoreResult<usize> {
    let extraction = extract_indicators(text);
    let mut linked = 0;

    for (indicator_type, value) in indicator_pairs(&extraction) {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM entities WHERE entity_type = ?1 AND value = ?2",
                params![indicator_type.as_str(), value],
                |r| r.get(0),
            )
            .optional()?;

        let entity_id = match existing {
            Some(id) => id,
            None => {
                conn.execute(
                    "INSERT INTO entities (entity_type, value, first_seen, last_seen, frequency)
                     VALUES (?1, ?2, ?3, ?3, 0)",
                    params![indicator_type.as_str(), value, now],
                )?;
                conn.last_insert_rowid()
            }
        };

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO investigation_entities (investigation_id, entity_id) VALUES (?1, ?2)",
            params![investigation_id, entity_id],
        )?;
        if inserted == 0 {
            continue;
        }

        conn.execute(
            "UPDATE entities
             SET frequency = frequency + 1,
                 first_seen = MIN(first_seen, ?2),
                 last_seen = MAX(last_seen, ?2)
             WHERE id = ?1",
            params![entity_id, now],
        )?;
        linked += 1;
    }

    debug!("Linked {} indicators to investigation {}", linked, investigation_id);
    Ok(linked)
}

fn recent_investigations(conn: &Connection, limit: i64) -> StoreResult<Vec<Investigation>> {
    let sql = format!(
        "SELECT {} FROM investigations ORDER BY created_at DESC, id DESC LIMIT ?1",
        INVESTIGATION_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([limit], investigation_from_row)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

fn similar_investigations(conn: &Connection, query: &str, limit: usize) -> StoreResult<Vec<SimilarInvestigation>> {
    let recent = recent_investigations(conn, SIMILARITY_WINDOW)?;
    let candidates = recent.iter().map(|inv| (inv, inv.query.as_str())).collect();

    Ok(rank_by_overlap(query, candidates, limit)
        .into_iter()
        .map(|(inv, score)| SimilarInvestigation {
            investigation: inv.clone(),
            score,
        })
        .collect())
}

pub(crate) fn entity_breakdown(conn: &Connection) -> StoreResult<BTreeMap<String, i64>> {
    let mut stmt = conn.prepare("SELECT entity_type, COUNT(*) FROM entities GROUP BY entity_type")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    Ok(rows.collect::<Result<_, _>>()?)
}

fn find_entity(conn: &Connection, indicator_type: IndicatorType, value: &str) -> StoreResult<Option<Entity>> {
    let sql = format!(
        "SELECT {} FROM entities WHERE entity_type = ?1 AND value = ?2",
        ENTITY_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![indicator_type.as_str(), value], entity_from_row)
        .optional()?)
}

fn entity_match(conn: &Connection, entity: Entity, limit: Option<i64>) -> StoreResult<EntityMatch> {
    let mut stmt = conn.prepare(
        "SELECT i.id, i.query, i.created_at, i.summary_file
         FROM investigations i
         JOIN investigation_entities ie ON i.id = ie.investigation_id
         WHERE ie.entity_id = ?1
         ORDER BY i.created_at DESC, i.id DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![entity.id, limit.unwrap_or(-1)], |row| {
        Ok(InvestigationRef {
            id: row.get(0)?,
            query: row.get(1)?,
            created_at: row.get(2)?,
            summary_file: row.get(3)?,
        })
    })?;
    let investigations = rows.collect::<Result<_, _>>()?;
    Ok(EntityMatch { entity, investigations })
}

/// Reduce a URL or host to a bare lowercase onion domain
pub fn normalize_onion_domain(input: &str) -> String {
    let trimmed = input.trim();
    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .trim_end_matches('.')
        .to_lowercase()
}
