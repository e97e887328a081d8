//! Logging Module
//!
//! Structured logging using the `tracing` crate, plus a step logger that reports
//! timing for source epochs and adaptation steps.

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Create a verbose logging config for debugging
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }

    /// Create a quiet logging config (errors only)
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }

    /// Configuration for the CLI flags: `quiet` wins over `verbose`, and an
    /// explicit level replaces the preset's level
    pub fn from_flags(verbose: bool, quiet: bool, level: Option<&str>) -> Self {
        let mut config = if quiet {
            Self::quiet()
        } else if verbose {
            Self::verbose()
        } else {
            Self::default()
        };
        if let Some(level) = level {
            config.level = LogLevel::from_str(level);
        }
        config
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Create from string, falling back to `Info`
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Initialize logging with the given configuration
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level.to_tracing_level())
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Timing logger for a fixed sequence of steps (source epochs or adaptation steps)
pub struct StepLogger {
    /// Name of the phase ("Source epoch", "Adaptation step")
    phase: String,
    /// Steps completed so far
    completed: usize,
    /// Total steps in the phase
    total: usize,
    /// Step start time
    step_start: std::time::Instant,
    /// Phase start time
    phase_start: std::time::Instant,
}

impl StepLogger {
    /// Create a new step logger
    pub fn new(phase: &str, total: usize) -> Self {
        Self {
            phase: phase.to_string(),
            completed: 0,
            total,
            step_start: std::time::Instant::now(),
            phase_start: std::time::Instant::now(),
        }
    }

    /// Mark the start of a step
    pub fn start_step(&mut self, step: usize) {
        self.step_start = std::time::Instant::now();
        tracing::debug!("{} {} started", self.phase, step);
    }

    /// Mark the end of a step and return the estimated seconds remaining
    pub fn end_step(&mut self, step: usize) -> f64 {
        self.completed += 1;
        let step_time = self.step_start.elapsed().as_secs_f64();
        let avg = self.phase_start.elapsed().as_secs_f64() / self.completed as f64;
        let eta_secs = self.total.saturating_sub(self.completed) as f64 * avg;

        tracing::debug!(
            "{} {} took {:.1}s ({}/{} done, ETA {:.0}s)",
            self.phase,
            step,
            step_time,
            self.completed,
            self.total,
            eta_secs
        );

        eta_secs
    }

    /// Steps completed so far
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Log phase completion
    pub fn finish(&self) {
        tracing::info!(
            "{}: {} of {} completed in {:.1}s",
            self.phase,
            self.completed,
            self.total,
            self.phase_start.elapsed().as_secs_f64()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!(LogLevel::from_str("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::from_str("Warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("unknown"), LogLevel::Info);
    }

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert!(!config.include_target);
    }

    #[test]
    fn test_log_config_from_flags() {
        assert_eq!(LogConfig::from_flags(false, false, None).level, LogLevel::Info);
        assert_eq!(LogConfig::from_flags(true, false, None).level, LogLevel::Debug);
        assert_eq!(LogConfig::from_flags(true, true, None).level, LogLevel::Error);

        let config = LogConfig::from_flags(true, false, Some("warn"));
        assert_eq!(config.level, LogLevel::Warn);
        assert!(config.include_target);
    }

    #[test]
    fn test_step_logger_counts() {
        let mut logger = StepLogger::new("Adaptation step", 3);
        logger.start_step(1);
        logger.end_step(1);
        logger.start_step(2);
        let eta = logger.end_step(2);
        assert_eq!(logger.completed(), 2);
        assert!(eta >= 0.0);
    }
}
