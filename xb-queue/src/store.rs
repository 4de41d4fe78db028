use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rusqlite::{params, Connection};

use crate::entry::QueueEntry;
use crate::error::QueueError;

/// Priority-ordered, on-disk queue of pending invocations (C6, §4.6).
///
/// One `PersistentQueue` owns one `(node_id, queue_name)` pair inside a
/// SQLite file that may be shared with other queues for the same node —
/// mirrors the `NODES`/`QUEUES`/`ENTRIES` table layout in §6.5.
pub struct PersistentQueue {
    conn: Connection,
    node_id: String,
    queue_name: String,
    max_entries: i64,
    max_bytes: i64,
    num_entries: i64,
    num_bytes: i64,
}

impl PersistentQueue {
    /// Open (creating if needed) the store at `path` and reopen the
    /// `(node_id, queue_name)` queue inside it, restoring `num_entries`/
    /// `num_bytes` from the store (§4.6 "Restart behavior").
    pub fn open(
        path: &Path,
        node_id: &str,
        queue_name: &str,
        max_entries: i64,
        max_bytes: i64,
    ) -> Result<Self, QueueError> {
        let conn = Connection::open(path).map_err(|e| QueueError::DbUnavailable(e.to_string()))?;
        apply_pragmas(&conn)?;
        run_integrity_check(&conn)?;
        apply_schema(&conn)?;

        conn.execute(
            "INSERT OR IGNORE INTO nodes (node_id) VALUES (?1)",
            params![node_id],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO queues (queue_name, node_id, max_bytes, max_entries)
             VALUES (?1, ?2, ?3, ?4)",
            params![queue_name, node_id, max_bytes, max_entries],
        )?;

        let (num_entries, num_bytes) = count_existing(&conn, node_id, queue_name)?;

        info!(
            "queue '{}' on node '{}' reopened: {} entries, {} bytes",
            queue_name, node_id, num_entries, num_bytes
        );

        Ok(PersistentQueue {
            conn,
            node_id: node_id.to_owned(),
            queue_name: queue_name.to_owned(),
            max_entries,
            max_bytes,
            num_entries,
            num_bytes,
        })
    }

    /// In-memory-backed store, for tests and short-lived embedding where
    /// durability across restart isn't needed.
    pub fn open_in_memory(node_id: &str, queue_name: &str, max_entries: i64, max_bytes: i64) -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        conn.execute("INSERT OR IGNORE INTO nodes (node_id) VALUES (?1)", params![node_id])?;
        conn.execute(
            "INSERT OR REPLACE INTO queues (queue_name, node_id, max_bytes, max_entries) VALUES (?1, ?2, ?3, ?4)",
            params![queue_name, node_id, max_bytes, max_entries],
        )?;
        Ok(PersistentQueue {
            conn,
            node_id: node_id.to_owned(),
            queue_name: queue_name.to_owned(),
            max_entries,
            max_bytes,
            num_entries: 0,
            num_bytes: 0,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Insert `entry`. Fails with `QuotaExceeded` — leaving the queue
    /// unchanged — if it would exceed `max_entries` or `max_bytes`.
    pub fn put(&mut self, entry: QueueEntry) -> Result<(), QueueError> {
        if self.num_entries + 1 > self.max_entries {
            return Err(QueueError::QuotaExceeded {
                reason: format!("max_entries={} reached", self.max_entries),
            });
        }
        let new_bytes = self.num_bytes + entry.byte_size() as i64;
        if new_bytes > self.max_bytes {
            return Err(QueueError::QuotaExceeded {
                reason: format!("max_bytes={} reached", self.max_bytes),
            });
        }

        let blob_text = BASE64.encode(&entry.blob);
        self.conn.execute(
            "INSERT INTO entries
                 (unique_id, queue_name, node_id, priority, embedded_type, persistent, byte_size, blob)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.unique_id,
                self.queue_name,
                self.node_id,
                entry.priority,
                entry.embedded_type,
                entry.persistent as i64,
                entry.byte_size() as i64,
                blob_text,
            ],
        )?;

        self.num_entries += 1;
        self.num_bytes = new_bytes;
        Ok(())
    }

    /// Return up to `max_n` entries of the *same* (highest) priority,
    /// FIFO within that priority, without removing them, stopping early if
    /// `max_bytes` would be exceeded (§4.6).
    pub fn peek_with_same_priority(&self, max_n: usize, max_bytes: i64) -> Result<Vec<QueueEntry>, QueueError> {
        let mut stmt = self.conn.prepare(
            "SELECT unique_id, priority, embedded_type, persistent, byte_size, blob
             FROM entries
             WHERE queue_name = ?1
             ORDER BY priority DESC, unique_id ASC",
        )?;
        let mut rows = stmt.query(params![self.queue_name])?;

        let mut result = Vec::new();
        let mut top_priority: Option<i32> = None;
        let mut bytes_so_far: i64 = 0;

        while result.len() < max_n {
            let row = match rows.next()? {
                Some(row) => row,
                None => break,
            };
            let priority: i32 = row.get(1)?;
            match top_priority {
                None => top_priority = Some(priority),
                Some(p) if p != priority => break,
                _ => {}
            }

            let byte_size: i64 = row.get(4)?;
            if !result.is_empty() && bytes_so_far + byte_size > max_bytes {
                break;
            }

            let blob_text: String = row.get(5)?;
            let blob = BASE64
                .decode(blob_text.as_bytes())
                .map_err(|e| QueueError::CorruptBlob(e.to_string()))?;
            if blob.len() as i64 != byte_size {
                return Err(QueueError::SizeMismatch {
                    stored: byte_size,
                    decoded: blob.len(),
                });
            }

            bytes_so_far += byte_size;
            result.push(QueueEntry {
                unique_id: row.get(0)?,
                priority,
                persistent: row.get::<_, i64>(3)? != 0,
                embedded_type: row.get(2)?,
                blob,
            });
        }

        Ok(result)
    }

    /// Remove entries by `unique_id` (after broker acknowledgement).
    /// Returns the number actually removed.
    pub fn random_remove(&mut self, unique_ids: &[i64]) -> Result<usize, QueueError> {
        let mut removed = 0usize;
        let tx = self.conn.transaction()?;
        for id in unique_ids {
            let byte_size: Option<i64> = tx
                .query_row(
                    "SELECT byte_size FROM entries WHERE unique_id = ?1 AND queue_name = ?2",
                    params![id, self.queue_name],
                    |row| row.get(0),
                )
                .ok();

            if let Some(byte_size) = byte_size {
                tx.execute(
                    "DELETE FROM entries WHERE unique_id = ?1 AND queue_name = ?2",
                    params![id, self.queue_name],
                )?;
                removed += 1;
                self.num_entries -= 1;
                self.num_bytes -= byte_size;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    pub fn clear(&mut self) -> Result<(), QueueError> {
        self.conn
            .execute("DELETE FROM entries WHERE queue_name = ?1", params![self.queue_name])?;
        self.num_entries = 0;
        self.num_bytes = 0;
        Ok(())
    }

    pub fn empty(&self) -> bool {
        self.num_entries == 0
    }

    pub fn num_entries(&self) -> i64 {
        self.num_entries
    }

    pub fn num_bytes(&self) -> i64 {
        self.num_bytes
    }
}

fn apply_pragmas(conn: &Connection) -> Result<(), QueueError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=FULL;
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

fn run_integrity_check(conn: &Connection) -> Result<(), QueueError> {
    let result: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
    if result != "ok" {
        return Err(QueueError::DbUnavailable(format!("integrity_check: {}", result)));
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<(), QueueError> {
    conn.execute_batch(include_str!("schema.sql"))?;
    Ok(())
}

fn count_existing(conn: &Connection, node_id: &str, queue_name: &str) -> Result<(i64, i64), QueueError> {
    let num_entries: i64 = conn.query_row(
        "SELECT COUNT(*) FROM entries WHERE queue_name = ?1 AND node_id = ?2",
        params![queue_name, node_id],
        |row| row.get(0),
    )?;
    let num_bytes: i64 = conn.query_row(
        "SELECT COALESCE(SUM(byte_size), 0) FROM entries WHERE queue_name = ?1 AND node_id = ?2",
        params![queue_name, node_id],
        |row| row.get(0),
    )?;
    Ok((num_entries, num_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(unique_id: i64, priority: i32, content: &str) -> QueueEntry {
        QueueEntry::new(unique_id, priority, "MSG_RAW|publish", content.as_bytes().to_vec())
    }

    #[test]
    fn put_peek_remove_round_trip() {
        let mut queue = PersistentQueue::open_in_memory("node-1", "tail", 10, 10_000).unwrap();
        queue.put(entry(1, 5, "hello")).unwrap();

        let peeked = queue.peek_with_same_priority(10, 10_000).unwrap();
        assert_eq!(peeked.len(), 1);

        let removed = queue.random_remove(&[1]).unwrap();
        assert_eq!(removed, 1);
        assert!(queue.empty());
    }

    #[test]
    fn max_entries_cap_rejects_overflow() {
        let mut queue = PersistentQueue::open_in_memory("node-1", "tail", 1, 10_000).unwrap();
        queue.put(entry(1, 5, "a")).unwrap();
        let err = queue.put(entry(2, 5, "b"));
        assert!(matches!(err, Err(QueueError::QuotaExceeded { .. })));
        assert_eq!(queue.num_entries(), 1);
    }

    #[test]
    fn peek_stops_at_lower_priority() {
        let mut queue = PersistentQueue::open_in_memory("node-1", "tail", 10, 10_000).unwrap();
        queue.put(entry(1, 5, "low")).unwrap();
        queue.put(entry(2, 9, "high-a")).unwrap();
        queue.put(entry(3, 9, "high-b")).unwrap();

        let peeked = queue.peek_with_same_priority(10, 10_000).unwrap();
        let ids: Vec<i64> = peeked.iter().map(|e| e.unique_id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.sqlite3");

        let uids = [
            (1_081_492_136_826_000_000i64, 5, "1. Hello"),
            (1_081_492_136_856_000_000, 1, "2. World"),
            (1_081_492_136_876_000_000, 9, "3. High Prio 1"),
            (1_081_492_136_911_000_000, 9, "4. High Prio 2"),
            (1_081_492_136_922_000_000, 5, "5. done"),
        ];

        {
            let mut queue =
                PersistentQueue::open(&path, "node-1", "tail", 10_000_000, 1_000_000_000).unwrap();
            for &(id, prio, content) in &uids {
                queue.put(entry(id, prio, content)).unwrap();
            }
        }

        let queue = PersistentQueue::open(&path, "node-1", "tail", 10_000_000, 1_000_000_000).unwrap();
        assert_eq!(queue.num_entries(), 5);
        let expected_bytes: i64 = uids.iter().map(|(_, _, c)| c.len() as i64).sum();
        assert_eq!(queue.num_bytes(), expected_bytes);
        assert!(!queue.empty());

        let top = queue.peek_with_same_priority(10, 1_000_000_000).unwrap();
        let ids: Vec<i64> = top.iter().map(|e| e.unique_id).collect();
        assert_eq!(ids, vec![1_081_492_136_876_000_000, 1_081_492_136_911_000_000]);
    }
}
