//! Diesel-based crawl ledger for SQLite.
//!
//! Every state transition runs inside an immediate (write-locked)
//! transaction on a blocking thread, so a transition is either fully
//! durable or not applied at all, and two workers can never claim the
//! same URL.

use std::collections::HashMap;

use diesel::prelude::*;
use tracing::{debug, warn};

use super::diesel_models::{LedgerRecord, NewLedgerRecord, SignatureRow};
use super::diesel_pool::{run_blocking, SqlitePool};
use super::{now_string, parse_datetime, parse_datetime_opt, LedgerError};
use crate::dedup::hasher::MinHashSignature;
use crate::models::{
    FetchResult, LedgerEntry, LedgerState, LedgerStats, Metadata, PreviousOutcome,
    DUPLICATE_OF_KEY, PREVIOUS_OUTCOME_KEY,
};
use crate::schema::crawl_ledger;

/// Rows fetched per page by the near-duplicate scan.
const SIGNATURE_PAGE_SIZE: i64 = 500;

/// Convert a database record to a domain model.
impl TryFrom<LedgerRecord> for LedgerEntry {
    type Error = LedgerError;

    fn try_from(record: LedgerRecord) -> Result<Self, Self::Error> {
        let state = stored_state(&record)?;
        Ok(LedgerEntry {
            state,
            discovered_at: parse_datetime(&record.discovered_at),
            last_fetched_at: parse_datetime_opt(record.last_fetched_at),
            http_status: record.http_status.and_then(|s| u16::try_from(s).ok()),
            etag: record.etag,
            last_modified: record.last_modified,
            content_length: record.content_length.and_then(|l| u64::try_from(l).ok()),
            text_hash: record.text_hash,
            minhash_signature: record.minhash_signature,
            silver_id: record.silver_id,
            retry_count: u32::try_from(record.retry_count).unwrap_or(0),
            error_message: record.error_message,
            metadata: serde_json::from_str(&record.metadata).unwrap_or_default(),
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
            url: record.url,
            source: record.source,
        })
    }
}

/// A processed entry whose signature is close to a query signature.
#[derive(Debug, Clone, PartialEq)]
pub struct NearMatch {
    pub entry: LedgerEntry,
    pub similarity: f64,
}

fn stored_state(record: &LedgerRecord) -> Result<LedgerState, LedgerError> {
    LedgerState::from_str(&record.state).ok_or_else(|| LedgerError::Corrupt {
        key: record.url.clone(),
        reason: format!("unknown state '{}'", record.state),
    })
}

fn find_record(conn: &mut SqliteConnection, url: &str) -> QueryResult<Option<LedgerRecord>> {
    crawl_ledger::table
        .filter(crawl_ledger::url.eq(url))
        .select(LedgerRecord::as_select())
        .first(conn)
        .optional()
}

fn require_record(conn: &mut SqliteConnection, url: &str) -> Result<LedgerRecord, LedgerError> {
    find_record(conn, url)?.ok_or_else(|| LedgerError::NotFound(url.to_string()))
}

/// Check that the stored entry may move to `to`, returning its current state.
fn require_transition(record: &LedgerRecord, to: LedgerState) -> Result<LedgerState, LedgerError> {
    let from = stored_state(record)?;
    if from.can_transition_to(to) {
        Ok(from)
    } else {
        Err(LedgerError::InvalidTransition {
            url: record.url.clone(),
            from,
            to,
        })
    }
}

fn metadata_json(metadata: &Metadata) -> String {
    serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string())
}

fn stored_metadata(record: &LedgerRecord) -> Metadata {
    serde_json::from_str(&record.metadata).unwrap_or_default()
}

fn take_previous_outcome(metadata: &mut Metadata) -> Option<PreviousOutcome> {
    metadata
        .remove(PREVIOUS_OUTCOME_KEY)
        .and_then(|v| serde_json::from_value(v).ok())
}

/// Whether another processed entry already owns `text_hash`.
fn hash_taken(conn: &mut SqliteConnection, text_hash: &str, except_id: i32) -> QueryResult<bool> {
    crawl_ledger::table
        .filter(crawl_ledger::text_hash.eq(text_hash))
        .filter(crawl_ledger::state.eq(LedgerState::Processed.as_str()))
        .filter(crawl_ledger::id.ne(except_id))
        .select(crawl_ledger::id)
        .first::<i32>(conn)
        .optional()
        .map(|id| id.is_some())
}

fn load_entries(records: Vec<LedgerRecord>) -> Result<Vec<LedgerEntry>, LedgerError> {
    records.into_iter().map(LedgerEntry::try_from).collect()
}

/// Durable per-URL crawl state.
#[derive(Clone)]
pub struct CrawlLedger {
    pool: SqlitePool,
}

impl CrawlLedger {
    /// Create a ledger over an existing pool. The schema must already exist.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Record a URL as discovered, or return the existing entry unchanged.
    pub async fn register_discovered(
        &self,
        url: &str,
        source: &str,
        metadata: &Metadata,
    ) -> Result<LedgerEntry, LedgerError> {
        let url = url.to_string();
        let source = source.to_string();
        let metadata = metadata_json(metadata);
        let now = now_string();

        run_blocking(self.pool.clone(), move |conn| {
            conn.immediate_transaction::<_, LedgerError, _>(|conn| {
                let inserted = diesel::insert_or_ignore_into(crawl_ledger::table)
                    .values(&NewLedgerRecord {
                        url: &url,
                        source: &source,
                        state: LedgerState::Discovered.as_str(),
                        discovered_at: &now,
                        retry_count: 0,
                        metadata: &metadata,
                        created_at: &now,
                        updated_at: &now,
                    })
                    .execute(conn)?;
                if inserted > 0 {
                    debug!(url = %url, source = %source, "Registered new URL");
                }
                LedgerEntry::try_from(require_record(conn, &url)?)
            })
        })
        .await
    }

    /// Claim a discovered URL for fetching.
    pub async fn mark_fetching(&self, url: &str) -> Result<(), LedgerError> {
        let url = url.to_string();
        let now = now_string();

        run_blocking(self.pool.clone(), move |conn| {
            conn.immediate_transaction::<_, LedgerError, _>(|conn| {
                let record = require_record(conn, &url)?;
                require_transition(&record, LedgerState::Fetching)?;
                diesel::update(crawl_ledger::table.find(record.id))
                    .set((
                        crawl_ledger::state.eq(LedgerState::Fetching.as_str()),
                        crawl_ledger::updated_at.eq(&now),
                    ))
                    .execute(conn)?;
                Ok(())
            })
        })
        .await
    }

    /// Record the outcome of a fetch and return the entry's new state.
    ///
    /// A 2xx response without an error moves the entry to `Fetched` and
    /// stores its validators and hashes; anything else moves it to `Failed`
    /// and bumps `retry_count`.
    pub async fn record_fetch_result(
        &self,
        url: &str,
        result: FetchResult,
    ) -> Result<LedgerState, LedgerError> {
        let url = url.to_string();
        let now = now_string();

        run_blocking(self.pool.clone(), move |conn| {
            conn.immediate_transaction::<_, LedgerError, _>(|conn| {
                let record = require_record(conn, &url)?;
                let status = result.http_status.map(i32::from);

                if result.is_success() {
                    require_transition(&record, LedgerState::Fetched)?;
                    diesel::update(crawl_ledger::table.find(record.id))
                        .set((
                            crawl_ledger::state.eq(LedgerState::Fetched.as_str()),
                            crawl_ledger::last_fetched_at.eq(&now),
                            crawl_ledger::http_status.eq(status),
                            crawl_ledger::etag.eq(result.etag.as_deref()),
                            crawl_ledger::last_modified.eq(result.last_modified.as_deref()),
                            crawl_ledger::content_length
                                .eq(result.content_length.and_then(|l| i64::try_from(l).ok())),
                            crawl_ledger::text_hash.eq(result.text_hash.as_deref()),
                            crawl_ledger::minhash_signature
                                .eq(result.minhash_signature.as_deref()),
                            crawl_ledger::error_message.eq(None::<String>),
                            crawl_ledger::updated_at.eq(&now),
                        ))
                        .execute(conn)?;
                    Ok(LedgerState::Fetched)
                } else {
                    require_transition(&record, LedgerState::Failed)?;
                    let message = result.failure_message();
                    debug!(url = %url, error = %message, "Fetch failed");
                    diesel::update(crawl_ledger::table.find(record.id))
                        .set((
                            crawl_ledger::state.eq(LedgerState::Failed.as_str()),
                            crawl_ledger::last_fetched_at.eq(&now),
                            crawl_ledger::http_status.eq(status),
                            crawl_ledger::retry_count.eq(crawl_ledger::retry_count + 1),
                            crawl_ledger::error_message.eq(&message),
                            crawl_ledger::updated_at.eq(&now),
                        ))
                        .execute(conn)?;
                    Ok(LedgerState::Failed)
                }
            })
        })
        .await
    }

    /// Mark a fetched URL as written to the silver layer.
    pub async fn record_processed(&self, url: &str, silver_id: &str) -> Result<(), LedgerError> {
        let url = url.to_string();
        let silver_id = silver_id.to_string();
        let now = now_string();

        run_blocking(self.pool.clone(), move |conn| {
            conn.immediate_transaction::<_, LedgerError, _>(|conn| {
                let record = require_record(conn, &url)?;
                require_transition(&record, LedgerState::Processed)?;
                let mut metadata = stored_metadata(&record);
                metadata.remove(PREVIOUS_OUTCOME_KEY);
                diesel::update(crawl_ledger::table.find(record.id))
                    .set((
                        crawl_ledger::state.eq(LedgerState::Processed.as_str()),
                        crawl_ledger::silver_id.eq(&silver_id),
                        crawl_ledger::error_message.eq(None::<String>),
                        crawl_ledger::metadata.eq(metadata_json(&metadata)),
                        crawl_ledger::updated_at.eq(&now),
                    ))
                    .execute(conn)?;
                Ok(())
            })
        })
        .await
    }

    /// Mark a URL as a duplicate of `duplicate_of`, recorded in its metadata.
    pub async fn mark_skipped_duplicate(
        &self,
        url: &str,
        duplicate_of: &str,
    ) -> Result<(), LedgerError> {
        let url = url.to_string();
        let duplicate_of = duplicate_of.to_string();
        let now = now_string();

        run_blocking(self.pool.clone(), move |conn| {
            conn.immediate_transaction::<_, LedgerError, _>(|conn| {
                let record = require_record(conn, &url)?;
                require_transition(&record, LedgerState::SkippedDuplicate)?;

                let mut metadata = stored_metadata(&record);
                metadata.remove(PREVIOUS_OUTCOME_KEY);
                metadata.insert(
                    DUPLICATE_OF_KEY.to_string(),
                    serde_json::Value::String(duplicate_of.clone()),
                );

                diesel::update(crawl_ledger::table.find(record.id))
                    .set((
                        crawl_ledger::state.eq(LedgerState::SkippedDuplicate.as_str()),
                        crawl_ledger::metadata.eq(metadata_json(&metadata)),
                        crawl_ledger::error_message.eq(None::<String>),
                        crawl_ledger::updated_at.eq(&now),
                    ))
                    .execute(conn)?;
                debug!(url = %url, duplicate_of = %duplicate_of, "Marked duplicate");
                Ok(())
            })
        })
        .await
    }

    /// Store an error message without changing the entry's state.
    pub async fn record_error(&self, url: &str, message: &str) -> Result<(), LedgerError> {
        let url = url.to_string();
        let message = message.to_string();
        let now = now_string();

        run_blocking(self.pool.clone(), move |conn| -> Result<(), LedgerError> {
            let rows = diesel::update(crawl_ledger::table.filter(crawl_ledger::url.eq(&url)))
                .set((
                    crawl_ledger::error_message.eq(&message),
                    crawl_ledger::updated_at.eq(&now),
                ))
                .execute(conn)?;
            if rows == 0 {
                return Err(LedgerError::NotFound(url.clone()));
            }
            Ok(())
        })
        .await
    }

    /// Move a failed URL back to `Discovered` so a later pass retries it.
    pub async fn mark_for_retry(&self, url: &str) -> Result<(), LedgerError> {
        let url = url.to_string();
        let now = now_string();

        run_blocking(self.pool.clone(), move |conn| {
            conn.immediate_transaction::<_, LedgerError, _>(|conn| {
                let record = require_record(conn, &url)?;
                require_transition(&record, LedgerState::Discovered)?;
                diesel::update(crawl_ledger::table.find(record.id))
                    .set((
                        crawl_ledger::state.eq(LedgerState::Discovered.as_str()),
                        crawl_ledger::updated_at.eq(&now),
                    ))
                    .execute(conn)?;
                Ok(())
            })
        })
        .await
    }

    /// Return `Fetching` and `Fetched` entries of a source to `Discovered`.
    ///
    /// Used at run start to recover URLs orphaned by an interrupted run. The
    /// hashes of the unfinished fetch are cleared; validators are kept for
    /// entries that can still fall back on a previous outcome.
    pub async fn reset_stale(&self, source: &str) -> Result<usize, LedgerError> {
        let source = source.to_string();
        let now = now_string();

        let reset = run_blocking(self.pool.clone(), move |conn| {
            conn.immediate_transaction::<_, LedgerError, _>(|conn| {
                let rows = diesel::update(
                    crawl_ledger::table
                        .filter(crawl_ledger::source.eq(&source))
                        .filter(crawl_ledger::state.eq_any([
                            LedgerState::Fetching.as_str(),
                            LedgerState::Fetched.as_str(),
                        ])),
                )
                .set((
                    crawl_ledger::state.eq(LedgerState::Discovered.as_str()),
                    crawl_ledger::text_hash.eq(None::<String>),
                    crawl_ledger::minhash_signature.eq(None::<String>),
                    crawl_ledger::updated_at.eq(&now),
                ))
                .execute(conn)?;
                Ok(rows)
            })
        })
        .await?;

        if reset > 0 {
            warn!("Reset {} stale ledger entries to discovered", reset);
        }
        Ok(reset)
    }

    /// Return a finished entry to `Discovered` for forced reprocessing.
    ///
    /// Clears hashes, the silver id and any duplicate marker, keeping the
    /// validators for a conditional refetch. A processed or skipped entry's
    /// outcome is saved in its metadata until the refetch settles, see
    /// [`Self::restore_previous_outcome`]. Returns the entry as it was before
    /// the reset so callers can evict its fingerprints from caches.
    pub async fn reset_for_reprocess(&self, url: &str) -> Result<LedgerEntry, LedgerError> {
        let url = url.to_string();
        let now = now_string();

        run_blocking(self.pool.clone(), move |conn| {
            conn.immediate_transaction::<_, LedgerError, _>(|conn| {
                let record = require_record(conn, &url)?;
                let from = stored_state(&record)?;
                if !matches!(
                    from,
                    LedgerState::Processed | LedgerState::SkippedDuplicate | LedgerState::Failed
                ) {
                    return Err(LedgerError::InvalidTransition {
                        url: url.clone(),
                        from,
                        to: LedgerState::Discovered,
                    });
                }

                let mut metadata = stored_metadata(&record);
                let duplicate_of = metadata
                    .remove(DUPLICATE_OF_KEY)
                    .and_then(|v| v.as_str().map(str::to_string));
                // A failed entry keeps the snapshot of an earlier forced reset.
                if from.is_done() {
                    let previous = PreviousOutcome {
                        state: from,
                        text_hash: record.text_hash.clone(),
                        minhash_signature: record.minhash_signature.clone(),
                        silver_id: record.silver_id.clone(),
                        duplicate_of,
                    };
                    let value = serde_json::to_value(&previous).map_err(|e| {
                        LedgerError::Corrupt {
                            key: url.clone(),
                            reason: format!("cannot encode previous outcome: {e}"),
                        }
                    })?;
                    metadata.insert(PREVIOUS_OUTCOME_KEY.to_string(), value);
                }

                diesel::update(crawl_ledger::table.find(record.id))
                    .set((
                        crawl_ledger::state.eq(LedgerState::Discovered.as_str()),
                        crawl_ledger::text_hash.eq(None::<String>),
                        crawl_ledger::minhash_signature.eq(None::<String>),
                        crawl_ledger::silver_id.eq(None::<String>),
                        crawl_ledger::error_message.eq(None::<String>),
                        crawl_ledger::metadata.eq(metadata_json(&metadata)),
                        crawl_ledger::updated_at.eq(&now),
                    ))
                    .execute(conn)?;
                debug!(url = %url, from = %from, "Reset entry for reprocessing");
                LedgerEntry::try_from(record)
            })
        })
        .await
    }

    /// Settle a `Fetching` entry whose server answered 304 Not Modified.
    ///
    /// Puts back the outcome saved by a forced reset and returns the restored
    /// entry. Returns `None`, leaving the entry `Fetching`, when there is
    /// nothing to restore or another processed entry has taken the saved
    /// hash in the meantime. The snapshot is dropped either way, so a later
    /// attempt fetches unconditionally.
    pub async fn restore_previous_outcome(
        &self,
        url: &str,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        let url = url.to_string();
        let now = now_string();

        run_blocking(self.pool.clone(), move |conn| {
            conn.immediate_transaction::<_, LedgerError, _>(|conn| {
                let record = require_record(conn, &url)?;
                let from = stored_state(&record)?;
                if from != LedgerState::Fetching {
                    return Err(LedgerError::InvalidTransition {
                        url: url.clone(),
                        from,
                        to: LedgerState::Processed,
                    });
                }

                let mut metadata = stored_metadata(&record);
                let Some(previous) = take_previous_outcome(&mut metadata) else {
                    return Ok(None);
                };

                let conflict = match (previous.state, previous.text_hash.as_deref()) {
                    (LedgerState::Processed, Some(hash)) => hash_taken(conn, hash, record.id)?,
                    _ => false,
                };
                if !previous.state.is_done() || conflict {
                    debug!(url = %url, "Previous outcome no longer applies");
                    diesel::update(crawl_ledger::table.find(record.id))
                        .set((
                            crawl_ledger::metadata.eq(metadata_json(&metadata)),
                            crawl_ledger::updated_at.eq(&now),
                        ))
                        .execute(conn)?;
                    return Ok(None);
                }

                if let Some(original) = &previous.duplicate_of {
                    metadata.insert(
                        DUPLICATE_OF_KEY.to_string(),
                        serde_json::Value::String(original.clone()),
                    );
                }
                diesel::update(crawl_ledger::table.find(record.id))
                    .set((
                        crawl_ledger::state.eq(previous.state.as_str()),
                        crawl_ledger::last_fetched_at.eq(&now),
                        crawl_ledger::http_status.eq(Some(304)),
                        crawl_ledger::text_hash.eq(previous.text_hash.as_deref()),
                        crawl_ledger::minhash_signature.eq(previous.minhash_signature.as_deref()),
                        crawl_ledger::silver_id.eq(previous.silver_id.as_deref()),
                        crawl_ledger::error_message.eq(None::<String>),
                        crawl_ledger::metadata.eq(metadata_json(&metadata)),
                        crawl_ledger::updated_at.eq(&now),
                    ))
                    .execute(conn)?;
                debug!(url = %url, state = %previous.state, "Restored previous outcome");
                LedgerEntry::try_from(require_record(conn, &url)?).map(Some)
            })
        })
        .await
    }

    /// Find the earliest-discovered processed entry with this exact text hash.
    pub async fn lookup_by_hash(&self, text_hash: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let text_hash = text_hash.to_string();

        let record = run_blocking(self.pool.clone(), move |conn| {
            crawl_ledger::table
                .filter(crawl_ledger::text_hash.eq(&text_hash))
                .filter(crawl_ledger::state.eq(LedgerState::Processed.as_str()))
                .order((crawl_ledger::discovered_at.asc(), crawl_ledger::id.asc()))
                .select(LedgerRecord::as_select())
                .first(conn)
                .optional()
        })
        .await?;

        record.map(LedgerEntry::try_from).transpose()
    }

    /// Find processed entries whose signature similarity is at least `threshold`.
    ///
    /// Results are ordered by similarity (highest first), then by earliest
    /// discovery, then by URL. Signatures are scanned a page at a time;
    /// only matches are held in memory.
    pub async fn lookup_by_signature_near(
        &self,
        signature: &MinHashSignature,
        threshold: f64,
    ) -> Result<Vec<NearMatch>, LedgerError> {
        let signature = signature.clone();

        run_blocking(self.pool.clone(), move |conn| -> Result<Vec<NearMatch>, LedgerError> {
            let mut hits: Vec<(i32, String, String, f64)> = Vec::new();
            let mut last_id = 0;

            loop {
                let page: Vec<SignatureRow> = crawl_ledger::table
                    .filter(crawl_ledger::state.eq(LedgerState::Processed.as_str()))
                    .filter(crawl_ledger::minhash_signature.is_not_null())
                    .filter(crawl_ledger::id.gt(last_id))
                    .order(crawl_ledger::id.asc())
                    .limit(SIGNATURE_PAGE_SIZE)
                    .select((
                        crawl_ledger::id,
                        crawl_ledger::url,
                        crawl_ledger::discovered_at,
                        crawl_ledger::minhash_signature.assume_not_null(),
                    ))
                    .load(conn)?;

                let page_len = page.len();
                for row in page {
                    last_id = row.id;
                    let stored = match MinHashSignature::from_hex(&row.minhash_signature) {
                        Ok(stored) => stored,
                        Err(e) => {
                            debug!(url = %row.url, error = %e, "Skipping undecodable signature");
                            continue;
                        }
                    };
                    if let Some(similarity) = signature.jaccard(&stored) {
                        if similarity >= threshold {
                            hits.push((row.id, row.discovered_at, row.url, similarity));
                        }
                    }
                }

                if (page_len as i64) < SIGNATURE_PAGE_SIZE {
                    break;
                }
            }

            hits.sort_by(|a, b| {
                b.3.total_cmp(&a.3)
                    .then_with(|| a.1.cmp(&b.1))
                    .then_with(|| a.2.cmp(&b.2))
            });

            let ids: Vec<i32> = hits.iter().map(|h| h.0).collect();
            let mut by_id: HashMap<i32, LedgerRecord> = crawl_ledger::table
                .filter(crawl_ledger::id.eq_any(&ids))
                .select(LedgerRecord::as_select())
                .load(conn)?
                .into_iter()
                .map(|r| (r.id, r))
                .collect();

            hits.into_iter()
                .filter_map(|(id, _, _, similarity)| by_id.remove(&id).map(|r| (r, similarity)))
                .map(|(record, similarity)| {
                    Ok(NearMatch {
                        entry: LedgerEntry::try_from(record)?,
                        similarity,
                    })
                })
                .collect()
        })
        .await
    }

    /// Whether a URL must be fetched again given the server's current validators.
    ///
    /// Unknown URLs, and entries with no stored validators, always need a fetch.
    pub async fn needs_refetch(
        &self,
        url: &str,
        current_etag: Option<&str>,
        current_last_modified: Option<&str>,
    ) -> Result<bool, LedgerError> {
        let Some(entry) = self.get(url).await? else {
            return Ok(true);
        };

        if entry.etag.is_none() && entry.last_modified.is_none() {
            return Ok(true);
        }

        Ok(entry.etag.as_deref() != current_etag
            || entry.last_modified.as_deref() != current_last_modified)
    }

    /// Get the entry for a URL.
    pub async fn get(&self, url: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let url = url.to_string();
        let record = run_blocking(self.pool.clone(), move |conn| find_record(conn, &url)).await?;
        record.map(LedgerEntry::try_from).transpose()
    }

    /// Find the entry written to the silver layer under `silver_id`.
    pub async fn find_by_silver_id(
        &self,
        silver_id: &str,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        let silver_id = silver_id.to_string();

        let record = run_blocking(self.pool.clone(), move |conn| {
            crawl_ledger::table
                .filter(crawl_ledger::silver_id.eq(&silver_id))
                .select(LedgerRecord::as_select())
                .first(conn)
                .optional()
        })
        .await?;

        record.map(LedgerEntry::try_from).transpose()
    }

    /// Discovered entries of a source, oldest first.
    pub async fn pending_urls(
        &self,
        source: &str,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let source = source.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let records = run_blocking(self.pool.clone(), move |conn| {
            crawl_ledger::table
                .filter(crawl_ledger::source.eq(&source))
                .filter(crawl_ledger::state.eq(LedgerState::Discovered.as_str()))
                .order((crawl_ledger::discovered_at.asc(), crawl_ledger::id.asc()))
                .limit(limit)
                .select(LedgerRecord::as_select())
                .load(conn)
        })
        .await?;

        load_entries(records)
    }

    /// Entry counts per state for a source. States with no entries are omitted.
    pub async fn count_by_state(
        &self,
        source: &str,
    ) -> Result<HashMap<LedgerState, u64>, LedgerError> {
        use diesel::dsl::count_star;

        let source = source.to_string();
        let rows: Vec<(String, i64)> = run_blocking(self.pool.clone(), move |conn| {
            crawl_ledger::table
                .filter(crawl_ledger::source.eq(&source))
                .group_by(crawl_ledger::state)
                .select((crawl_ledger::state, count_star()))
                .load::<(String, i64)>(conn)
        })
        .await?;

        rows.into_iter()
            .map(|(state, count)| {
                let parsed = LedgerState::from_str(&state).ok_or_else(|| LedgerError::Corrupt {
                    key: state.clone(),
                    reason: "unknown state in ledger".to_string(),
                })?;
                Ok((parsed, u64::try_from(count).unwrap_or(0)))
            })
            .collect()
    }

    /// Aggregate statistics for a source.
    pub async fn stats(&self, source: &str) -> Result<LedgerStats, LedgerError> {
        let counts = self.count_by_state(source).await?;
        let get = |state: LedgerState| counts.get(&state).copied().unwrap_or(0);

        Ok(LedgerStats {
            source: source.to_string(),
            total: counts.values().sum(),
            discovered: get(LedgerState::Discovered),
            fetching: get(LedgerState::Fetching),
            fetched: get(LedgerState::Fetched),
            processed: get(LedgerState::Processed),
            failed: get(LedgerState::Failed),
            skipped_duplicate: get(LedgerState::SkippedDuplicate),
        })
    }
}
