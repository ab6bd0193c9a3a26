//! Unique service names.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Low bits left for ids generated within the same millisecond.
const SEQUENCE_BITS: u32 = 12;

/// Time-ordered id source: milliseconds since the epoch in the high bits,
/// a per-millisecond sequence in the low bits. Ids never repeat within a
/// process, even when the clock steps back.
#[derive(Debug, Default)]
pub struct SvcNameGenerator {
    last: AtomicU64,
}

impl SvcNameGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let candidate = now << SEQUENCE_BITS;
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let id = candidate.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, id, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return id,
                Err(current) => last = current,
            }
        }
    }

    /// `{prefix}-{base36 id}`.
    pub fn generate(&self, prefix: &str) -> String {
        format!("{prefix}-{}", base36(self.next_id()))
    }
}

pub fn base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
