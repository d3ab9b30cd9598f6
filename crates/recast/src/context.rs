//! Build context: category-tagged log ring buffer and accumulated per-stage timers.
//!
//! One context is owned by each navmesh instance and reset before every build, so it never
//! carries data from a previous build. Every entry is also forwarded to the `log` facade.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;
use web_time::Instant;

/// Default capacity of the log ring buffer
pub const DEFAULT_MAX_LOG_ENTRIES: usize = 1000;

/// Log level for context messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Progress messages
    Progress = 0,
    /// Warning messages
    Warning = 1,
    /// Error messages
    Error = 2,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Progress => log::Level::Debug,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// Build stages that are timed separately
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerCategory {
    /// Whole build of one mesh or tile
    Total,
    /// Triangle rasterization
    Rasterization,
    /// Heightfield span filters
    Filtering,
    /// Compact heightfield construction
    CompactHeightfield,
    /// Walkable area erosion
    Erosion,
    /// Convex volume area marking
    AreaMarking,
    /// Distance field computation (watershed only)
    DistanceField,
    /// Region partitioning
    Regions,
    /// Contour tracing and simplification
    Contours,
    /// Polygon mesh triangulation and merging
    PolyMesh,
    /// Detail height mesh
    DetailMesh,
    /// Tile data assembly and installation
    TileAssembly,
}

impl fmt::Display for TimerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimerCategory::Total => "total",
            TimerCategory::Rasterization => "rasterize",
            TimerCategory::Filtering => "filter",
            TimerCategory::CompactHeightfield => "compact",
            TimerCategory::Erosion => "erode",
            TimerCategory::AreaMarking => "areas",
            TimerCategory::DistanceField => "distance-field",
            TimerCategory::Regions => "regions",
            TimerCategory::Contours => "contours",
            TimerCategory::PolyMesh => "polymesh",
            TimerCategory::DetailMesh => "detail",
            TimerCategory::TileAssembly => "tile",
        };
        f.write_str(name)
    }
}

/// Log entry containing message and metadata
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Log level
    pub level: LogLevel,
    /// Category the message was tagged with
    pub category: TimerCategory,
    /// Log message
    pub message: String,
}

/// Per-build scratch state shared by every pipeline stage
#[derive(Debug)]
pub struct BuildContext {
    logs: VecDeque<LogEntry>,
    max_log_entries: usize,
    log_enabled: bool,
    timer_enabled: bool,
    active_timers: HashMap<TimerCategory, Instant>,
    timers: HashMap<TimerCategory, Duration>,
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildContext {
    /// Creates a context with logging and timing enabled
    pub fn new() -> Self {
        Self {
            logs: VecDeque::with_capacity(64),
            max_log_entries: DEFAULT_MAX_LOG_ENTRIES,
            log_enabled: true,
            timer_enabled: true,
            active_timers: HashMap::new(),
            timers: HashMap::new(),
        }
    }

    /// Sets the ring buffer capacity; oldest entries are evicted first
    pub fn set_max_log_entries(&mut self, max_entries: usize) {
        self.max_log_entries = max_entries.max(1);
        while self.logs.len() > self.max_log_entries {
            self.logs.pop_front();
        }
    }

    /// Enables or disables recording of log entries
    pub fn enable_log(&mut self, enabled: bool) {
        self.log_enabled = enabled;
    }

    /// Enables or disables stage timers
    pub fn enable_timer(&mut self, enabled: bool) {
        self.timer_enabled = enabled;
    }

    /// Clears logs and timers. Called before every build.
    pub fn reset(&mut self) {
        self.logs.clear();
        self.active_timers.clear();
        self.timers.clear();
    }

    /// Records a message
    pub fn log(&mut self, level: LogLevel, category: TimerCategory, message: impl Into<String>) {
        let message = message.into();
        log::log!(log::Level::from(level), "[{}] {}", category, message);
        if !self.log_enabled {
            return;
        }
        if self.logs.len() >= self.max_log_entries {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry {
            level,
            category,
            message,
        });
    }

    /// Records a progress message
    pub fn progress(&mut self, category: TimerCategory, message: impl Into<String>) {
        self.log(LogLevel::Progress, category, message);
    }

    /// Records a warning
    pub fn warn(&mut self, category: TimerCategory, message: impl Into<String>) {
        self.log(LogLevel::Warning, category, message);
    }

    /// Records an error
    pub fn error(&mut self, category: TimerCategory, message: impl Into<String>) {
        self.log(LogLevel::Error, category, message);
    }

    /// Starts (or restarts) the timer of a stage
    pub fn start_timer(&mut self, category: TimerCategory) {
        if self.timer_enabled {
            self.active_timers.insert(category, Instant::now());
        }
    }

    /// Stops the timer of a stage and adds the elapsed time to its total
    pub fn stop_timer(&mut self, category: TimerCategory) {
        if let Some(start) = self.active_timers.remove(&category) {
            *self.timers.entry(category).or_default() += start.elapsed();
        }
    }

    /// Runs `f` with the timer of `category` running around it
    pub fn timed<T>(&mut self, category: TimerCategory, f: impl FnOnce(&mut Self) -> T) -> T {
        self.start_timer(category);
        let result = f(self);
        self.stop_timer(category);
        result
    }

    /// Accumulated time of a stage since the last reset
    pub fn accumulated_time(&self, category: TimerCategory) -> Duration {
        self.timers.get(&category).copied().unwrap_or_default()
    }

    /// All recorded log entries, oldest first
    pub fn logs(&self) -> impl Iterator<Item = &LogEntry> {
        self.logs.iter()
    }

    /// Number of recorded log entries
    pub fn log_count(&self) -> usize {
        self.logs.len()
    }

    /// Recorded entries at or above the given level
    pub fn logs_at_least(&self, level: LogLevel) -> Vec<&LogEntry> {
        self.logs.iter().filter(|e| e.level >= level).collect()
    }

    /// Recorded entries tagged with the given category
    pub fn logs_by_category(&self, category: TimerCategory) -> Vec<&LogEntry> {
        self.logs.iter().filter(|e| e.category == category).collect()
    }

    /// Stage timings, slowest first
    pub fn timer_summary(&self) -> Vec<(TimerCategory, Duration)> {
        let mut timers: Vec<_> = self.timers.iter().map(|(c, d)| (*c, *d)).collect();
        timers.sort_by(|a, b| b.1.cmp(&a.1));
        timers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let mut ctx = BuildContext::new();
        ctx.set_max_log_entries(3);
        for i in 0..5 {
            ctx.progress(TimerCategory::Regions, format!("msg {}", i));
        }
        let messages: Vec<_> = ctx.logs().map(|e| e.message.clone()).collect();
        assert_eq!(messages, vec!["msg 2", "msg 3", "msg 4"]);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut ctx = BuildContext::new();
        ctx.warn(TimerCategory::Contours, "bad contour");
        ctx.timed(TimerCategory::Contours, |_| std::thread::sleep(Duration::from_millis(2)));
        assert!(ctx.accumulated_time(TimerCategory::Contours) > Duration::ZERO);

        ctx.reset();
        assert_eq!(ctx.log_count(), 0);
        assert_eq!(ctx.accumulated_time(TimerCategory::Contours), Duration::ZERO);
    }

    #[test]
    fn test_timers_accumulate() {
        let mut ctx = BuildContext::new();
        for _ in 0..2 {
            ctx.start_timer(TimerCategory::Rasterization);
            std::thread::sleep(Duration::from_millis(2));
            ctx.stop_timer(TimerCategory::Rasterization);
        }
        assert!(ctx.accumulated_time(TimerCategory::Rasterization) >= Duration::from_millis(4));
        assert_eq!(ctx.timer_summary()[0].0, TimerCategory::Rasterization);
    }

    #[test]
    fn test_filters() {
        let mut ctx = BuildContext::new();
        ctx.progress(TimerCategory::PolyMesh, "ok");
        ctx.error(TimerCategory::PolyMesh, "too many vertices");
        ctx.warn(TimerCategory::Contours, "hole");
        assert_eq!(ctx.logs_at_least(LogLevel::Warning).len(), 2);
        assert_eq!(ctx.logs_by_category(TimerCategory::PolyMesh).len(), 2);
    }

    #[test]
    fn test_disabled_log_records_nothing() {
        let mut ctx = BuildContext::new();
        ctx.enable_log(false);
        ctx.progress(TimerCategory::Total, "ignored");
        assert_eq!(ctx.log_count(), 0);
    }
}
