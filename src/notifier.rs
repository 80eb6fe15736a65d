//! Progress reporting for the append pipeline.
//!
//! [`Notifier`] puts `env_logger` text logs and an `indicatif` spinner behind a
//! single verbosity switch:
//! - [`VerbosityLevel::Quiet`] → no text logs below warnings; a spinner shows the
//!   current pipeline step.
//! - [`VerbosityLevel::Info`]/[`VerbosityLevel::Debug`]/[`VerbosityLevel::Trace`] →
//!   plain log lines, including the `log` records emitted by the library modules.

use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use std::cell::RefCell;
use std::time::Duration;

/// How much the CLI prints, from the number of `-v` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerbosityLevel {
    Quiet,
    Info,
    Debug,
    Trace,
}

impl From<u8> for VerbosityLevel {
    /// Counts past the last level saturate at [`VerbosityLevel::Trace`].
    fn from(count: u8) -> Self {
        const BY_COUNT: [VerbosityLevel; 4] = [
            VerbosityLevel::Quiet,
            VerbosityLevel::Info,
            VerbosityLevel::Debug,
            VerbosityLevel::Trace,
        ];
        BY_COUNT[usize::from(count.min(3))]
    }
}

impl From<VerbosityLevel> for LevelFilter {
    fn from(verbosity: VerbosityLevel) -> Self {
        match verbosity {
            // The spinner carries progress; only problems get a log line.
            VerbosityLevel::Quiet => LevelFilter::Warn,
            VerbosityLevel::Info => LevelFilter::Info,
            VerbosityLevel::Debug => LevelFilter::Debug,
            VerbosityLevel::Trace => LevelFilter::Trace,
        }
    }
}

pub struct Notifier {
    verbosity: VerbosityLevel,
    spinner: RefCell<Option<ProgressBar>>,
}

impl Notifier {
    pub fn new(verbose_flags: u8) -> Self {
        Self::with_level(VerbosityLevel::from(verbose_flags))
    }

    pub fn with_level(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            spinner: RefCell::new(None),
        }
    }

    /// Reports through `log` records at info level and never draws a spinner.
    /// Output appears only if the caller has installed a logger.
    pub fn plain() -> Self {
        Self::with_level(VerbosityLevel::Info)
    }

    /// Installs the global logger at this notifier's level. `RUST_LOG` still
    /// overrides per-module filters. Calling it twice is harmless.
    pub fn init_logging(&self) {
        let _ = env_logger::Builder::from_env(Env::default())
            .filter_level(self.verbosity.into())
            .try_init();
    }

    /// Announces the pipeline step that is starting.
    pub fn step(&self, message: &str) {
        match self.verbosity {
            VerbosityLevel::Quiet => {
                let mut slot = self.spinner.borrow_mut();
                let spinner = slot.get_or_insert_with(|| {
                    let bar = ProgressBar::new_spinner();
                    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
                        bar.set_style(style);
                    }
                    bar.enable_steady_tick(Duration::from_millis(100));
                    bar
                });
                spinner.set_message(message.to_string());
            }
            _ => log::info!("{}", message),
        }
    }

    pub fn info(&self, message: &str) {
        if self.verbosity > VerbosityLevel::Quiet {
            log::info!("{}", message);
        }
    }

    pub fn debug(&self, message: &str) {
        log::debug!("{}", message);
    }

    pub fn warn(&self, message: &str) {
        match self.spinner.borrow().as_ref() {
            Some(spinner) => spinner.println(format!("warning: {}", message)),
            None => log::warn!("{}", message),
        }
    }

    /// Stops the spinner, leaving `message` as its last line.
    pub fn finish(&self, message: &str) {
        match self.spinner.borrow_mut().take() {
            Some(spinner) => spinner.finish_with_message(message.to_string()),
            None => log::info!("{}", message),
        }
    }

    /// Clears the spinner without a final message, e.g. before printing an error.
    pub fn abandon(&self) {
        if let Some(spinner) = self.spinner.borrow_mut().take() {
            spinner.finish_and_clear();
        }
    }

    pub fn verbosity_level(&self) -> VerbosityLevel {
        self.verbosity
    }
}
