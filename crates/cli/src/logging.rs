//! Log output for the `fai` binary.
//!
//! Everything goes to stderr so that stdout stays machine-readable.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CRATES: [&str; 5] = ["fai_cli", "fai_model", "fai_pdf", "fai_sidecar", "fai_viewer"];

/// Environment switch that turns on per-page PDF diagnostics.
pub const DEBUG_PDF_ENV: &str = "AS9102_DEBUG_PDF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Warnings, such as skipped bubbles or repaired counters.
    #[default]
    Normal,
    /// Open, save and export milestones.
    Verbose,
    /// Per-page import detail.
    Debug,
    Trace,
}

impl Verbosity {
    /// Pick a level from `-q` and the number of `-v` flags.
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        if quiet {
            return Self::Quiet;
        }
        match verbose {
            0 => Self::Normal,
            1 => Self::Verbose,
            2 => Self::Debug,
            _ => Self::Trace,
        }
    }

    /// Raise to at least [`Verbosity::Debug`] when the PDF debug switch is on.
    pub fn with_debug_switch(self, value: Option<&str>) -> Self {
        if value.is_some_and(is_truthy) {
            self.max(Self::Debug)
        } else {
            self
        }
    }

    pub fn level(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::WARN,
            Self::Verbose => Level::INFO,
            Self::Debug => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    fn directives(&self) -> String {
        let level = self.level().to_string().to_ascii_lowercase();
        CRATES.iter().map(|krate| format!("{krate}={level}")).collect::<Vec<_>>().join(",")
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Install the global subscriber. `RUST_LOG` wins over `verbosity` when set.
/// Calling this twice is harmless.
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directives()));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(false)
            .with_line_number(false),
    );

    let _ = subscriber.try_init();
}
