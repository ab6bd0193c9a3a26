//! Deploy log reads.

use hubdeploy_core::LogEntry;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Start of a log window given as `10mins`, `30mins`, `1hour`, `6hours`,
/// `1day`, `2days` or `1week`, in epoch seconds. Anything else means the
/// last ten minutes.
pub fn parse_since_time(since: &str, now: u64) -> u64 {
    let window = match since {
        "10mins" => 10 * MINUTE,
        "30mins" => 30 * MINUTE,
        "1hour" => HOUR,
        "6hours" => 6 * HOUR,
        "1day" => DAY,
        "2days" => 2 * DAY,
        "1week" => 7 * DAY,
        _ => 10 * MINUTE,
    };
    now.saturating_sub(window)
}

/// Build and run log streams of one deploy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiLogReader {
    build: Vec<LogEntry>,
    run: Vec<LogEntry>,
}

impl MultiLogReader {
    pub fn new(build: Vec<LogEntry>, run: Vec<LogEntry>) -> Self {
        Self { build, run }
    }

    pub fn build_log(&self) -> &[LogEntry] {
        &self.build
    }

    pub fn run_log(&self) -> &[LogEntry] {
        &self.run
    }

    /// Both streams interleaved by timestamp. Build lines win ties.
    pub fn merged(&self) -> Vec<LogEntry> {
        let mut all: Vec<LogEntry> = self.build.iter().chain(self.run.iter()).cloned().collect();
        all.sort_by_key(|e| e.timestamp);
        all
    }

    /// One formatted line per entry, in [`merged`](Self::merged) order.
    pub fn lines(&self) -> Vec<String> {
        self.merged()
            .into_iter()
            .map(|e| match &e.instance {
                Some(instance) => format!("[{}] {}: {}", instance, e.step, e.message),
                None => format!("{}: {}", e.step, e.message),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.build.is_empty() && self.run.is_empty()
    }
}
