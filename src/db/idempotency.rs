//! Idempotency ledger: durable key -> outcome cache for retried requests.
//!
//! A key is reserved before the state machine runs and committed with the
//! response afterwards. Reservation is a plain insert whose unique-key
//! violation is swallowed, so two racing requests with the same key may both
//! execute; whichever commits last owns the stored outcome.

use super::{Database, is_unique_violation, now_ms};
use anyhow::Result;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Header carrying the caller's idempotency token.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Default lifetime of a ledger row (24 hours).
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Maximum accepted key length.
pub const MAX_KEY_LEN: usize = 256;

/// Stored ledger row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub method: String,
    pub path: String,
    pub request_hash: String,
    pub response_status: Option<u16>,
    pub response_body: Option<Value>,
    pub created_at: i64,
    pub expires_at: i64,
}

/// What the ledger knows about a key.
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyLookup {
    /// Never seen (or expired): run the request.
    Miss,
    /// Seen with another method, path or payload: reject with 409.
    Conflict,
    /// Seen and completed: replay the stored response verbatim.
    Replay { status: u16, body: Value },
    /// Reserved but never committed. The first attempt may have died, so the
    /// request runs again rather than waiting on it.
    Pending,
}

/// SHA-256 (hex) over method, path and the canonical JSON of the validated body.
///
/// `body` should be the typed, defaults-applied input re-serialized, so two
/// payloads that differ only in key order or omitted defaults hash equal.
pub fn hash_request(method: &str, path: &str, body: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"|");
    hasher.update(path.as_bytes());
    hasher.update(b"|");
    hasher.update(body.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn get_record_internal(
    conn: &rusqlite::Connection,
    key: &str,
) -> Result<Option<IdempotencyRecord>> {
    let row = conn
        .query_row(
            "SELECT key, method, path, request_hash, response_status, response_body,
                    created_at, expires_at
             FROM idempotency_keys WHERE key = ?1",
            params![key],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<u16>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            },
        )
        .optional()?;

    match row {
        None => Ok(None),
        Some((key, method, path, request_hash, response_status, body, created_at, expires_at)) => {
            let response_body = match body {
                Some(text) => Some(serde_json::from_str(&text)?),
                None => None,
            };
            Ok(Some(IdempotencyRecord {
                key,
                method,
                path,
                request_hash,
                response_status,
                response_body,
                created_at,
                expires_at,
            }))
        }
    }
}

impl Database {
    /// Classify a key against the incoming request.
    pub fn lookup_idempotency_key(
        &self,
        key: &str,
        method: &str,
        path: &str,
        request_hash: &str,
    ) -> Result<IdempotencyLookup> {
        let now = now_ms();

        self.with_conn(|conn| {
            let record = match get_record_internal(conn, key)? {
                Some(record) if record.expires_at > now => record,
                _ => return Ok(IdempotencyLookup::Miss),
            };

            if record.method != method || record.path != path || record.request_hash != request_hash
            {
                return Ok(IdempotencyLookup::Conflict);
            }

            match (record.response_status, record.response_body) {
                (Some(status), Some(body)) => Ok(IdempotencyLookup::Replay { status, body }),
                _ => Ok(IdempotencyLookup::Pending),
            }
        })
    }

    /// Best-effort insert of a fresh reservation.
    ///
    /// Returns `false` when another request already holds the key; that race
    /// is tolerated, not reported. An expired row for the same key is replaced.
    pub fn reserve_idempotency_key(
        &self,
        key: &str,
        method: &str,
        path: &str,
        request_hash: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let now = now_ms();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now.saturating_add(ttl_ms);

        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM idempotency_keys WHERE key = ?1 AND expires_at <= ?2",
                params![key, now],
            )?;

            let inserted = conn.execute(
                "INSERT INTO idempotency_keys (key, method, path, request_hash, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![key, method, path, request_hash, now, expires_at],
            );

            match inserted {
                Ok(_) => Ok(true),
                Err(e) if is_unique_violation(&e) => {
                    tracing::debug!(idempotency_key = %key, "Idempotency key already reserved");
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Store the final outcome for a key. Unconditional: last writer wins.
    pub fn commit_idempotency_key(&self, key: &str, status: u16, body: &Value) -> Result<()> {
        let body = serde_json::to_string(body)?;

        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE idempotency_keys SET response_status = ?1, response_body = ?2
                 WHERE key = ?3",
                params![status, body, key],
            )?;
            if updated == 0 {
                tracing::warn!(idempotency_key = %key, "Committed outcome for unknown idempotency key");
            }
            Ok(())
        })
    }

    /// Get the raw ledger row for a key.
    pub fn get_idempotency_record(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        self.with_conn(|conn| get_record_internal(conn, key))
    }

    /// Delete rows past their expiry. Returns the number removed.
    pub fn purge_expired_idempotency_keys(&self) -> Result<usize> {
        let now = now_ms();
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM idempotency_keys WHERE expires_at <= ?1",
                params![now],
            )?;
            Ok(deleted)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_is_stable_and_payload_sensitive() {
        let a = hash_request("POST", "/api/tasks/t1/assign", &json!({ "agentId": "a" }));
        let b = hash_request("POST", "/api/tasks/t1/assign", &json!({ "agentId": "a" }));
        let c = hash_request("POST", "/api/tasks/t1/assign", &json!({ "agentId": "b" }));
        let d = hash_request("POST", "/api/tasks/t2/assign", &json!({ "agentId": "a" }));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn lookup_walks_miss_pending_replay() {
        let db = Database::open_in_memory().unwrap();
        let hash = hash_request("POST", "/p", &json!({}));

        assert_eq!(
            db.lookup_idempotency_key("k", "POST", "/p", &hash).unwrap(),
            IdempotencyLookup::Miss
        );

        assert!(db.reserve_idempotency_key("k", "POST", "/p", &hash, DEFAULT_TTL).unwrap());
        assert_eq!(
            db.lookup_idempotency_key("k", "POST", "/p", &hash).unwrap(),
            IdempotencyLookup::Pending
        );

        db.commit_idempotency_key("k", 200, &json!({ "ok": true })).unwrap();
        assert_eq!(
            db.lookup_idempotency_key("k", "POST", "/p", &hash).unwrap(),
            IdempotencyLookup::Replay {
                status: 200,
                body: json!({ "ok": true })
            }
        );
    }

    #[test]
    fn mismatched_triple_is_conflict() {
        let db = Database::open_in_memory().unwrap();
        let hash = hash_request("POST", "/p", &json!({ "x": 1 }));
        db.reserve_idempotency_key("k", "POST", "/p", &hash, DEFAULT_TTL).unwrap();

        let other = hash_request("POST", "/p", &json!({ "x": 2 }));
        assert_eq!(
            db.lookup_idempotency_key("k", "POST", "/p", &other).unwrap(),
            IdempotencyLookup::Conflict
        );
        assert_eq!(
            db.lookup_idempotency_key("k", "POST", "/q", &hash).unwrap(),
            IdempotencyLookup::Conflict
        );
    }

    #[test]
    fn duplicate_reservation_is_swallowed() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.reserve_idempotency_key("k", "POST", "/p", "h", DEFAULT_TTL).unwrap());
        assert!(!db.reserve_idempotency_key("k", "POST", "/p", "h", DEFAULT_TTL).unwrap());
    }

    #[test]
    fn expired_rows_are_misses_and_purged() {
        let db = Database::open_in_memory().unwrap();
        db.reserve_idempotency_key("old", "POST", "/p", "h", Duration::ZERO).unwrap();

        assert_eq!(
            db.lookup_idempotency_key("old", "POST", "/p", "h").unwrap(),
            IdempotencyLookup::Miss
        );
        assert_eq!(db.purge_expired_idempotency_keys().unwrap(), 1);
        assert!(db.get_idempotency_record("old").unwrap().is_none());
    }

    #[test]
    fn expired_key_can_be_reserved_again() {
        let db = Database::open_in_memory().unwrap();
        db.reserve_idempotency_key("k", "POST", "/p", "h1", Duration::ZERO).unwrap();
        assert!(db.reserve_idempotency_key("k", "POST", "/p", "h2", DEFAULT_TTL).unwrap());

        let record = db.get_idempotency_record("k").unwrap().unwrap();
        assert_eq!(record.request_hash, "h2");
    }

    #[test]
    fn huge_ttl_saturates_instead_of_wrapping() {
        let db = Database::open_in_memory().unwrap();
        let ttl = Duration::from_secs(i64::MAX as u64 / 1000);
        assert!(db.reserve_idempotency_key("k", "POST", "/p", "h", ttl).unwrap());

        let record = db.get_idempotency_record("k").unwrap().unwrap();
        assert_eq!(record.expires_at, i64::MAX);
        assert_eq!(
            db.lookup_idempotency_key("k", "POST", "/p", "h").unwrap(),
            IdempotencyLookup::Pending
        );
    }
}
