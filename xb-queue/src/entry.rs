/// One pending invocation held by the persistent queue (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Strictly increasing timestamp, primary key within a queue.
    pub unique_id: i64,
    /// 0..9 conventionally; 5 is the default (`DEFAULT_PRIORITY`).
    pub priority: i32,
    /// Persistent entries survive process restart; transient ones don't
    /// (this crate only ever stores persistent entries — a caller wanting
    /// in-memory-only failsafe queueing keeps those outside `xb-queue`).
    pub persistent: bool,
    /// Tag identifying how to decode `blob`, e.g. `"MSG_RAW|publish"`.
    pub embedded_type: String,
    /// The encoded Invocation.
    pub blob: Vec<u8>,
}

impl QueueEntry {
    pub const DEFAULT_PRIORITY: i32 = 5;

    pub fn new(unique_id: i64, priority: i32, embedded_type: impl Into<String>, blob: Vec<u8>) -> Self {
        QueueEntry {
            unique_id,
            priority,
            persistent: true,
            embedded_type: embedded_type.into(),
            blob,
        }
    }

    pub fn byte_size(&self) -> usize {
        self.blob.len()
    }
}
