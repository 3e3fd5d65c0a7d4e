use crate::config::{Config, RustEnv};
use log::{LevelFilter, SetLoggerError};
use simplelog::{self, ColorChoice, ConfigBuilder, TerminalMode};

/// Modules to filter out from logging when not in Trace mode.
/// The streaming HTTP stack logs every chunk it reads, which drowns out frame logs.
const FILTERED_MODULES: &[&str] = &["reqwest", "hyper", "hyper_util", "h2", "mio", "native_tls"];

pub struct Logger {}

impl Logger {
    /// Initializes the global logger from the provided Config.
    ///
    /// Dependency logs are only shown at Trace level. Colors are disabled outside of
    /// development so that captured output stays plain text.
    pub fn init_logger(config: &Config) -> Result<(), SetLoggerError> {
        let level = config.log_level_filter;
        let log_config = Self::build_log_config(Self::should_filter_dependencies(level));

        simplelog::TermLogger::init(
            Self::convert_level_filter(level),
            log_config,
            TerminalMode::Mixed,
            Self::color_choice(&config.runtime_env()),
        )
    }

    fn convert_level_filter(level: LevelFilter) -> simplelog::LevelFilter {
        match level {
            LevelFilter::Off => simplelog::LevelFilter::Off,
            LevelFilter::Error => simplelog::LevelFilter::Error,
            LevelFilter::Warn => simplelog::LevelFilter::Warn,
            LevelFilter::Info => simplelog::LevelFilter::Info,
            LevelFilter::Debug => simplelog::LevelFilter::Debug,
            LevelFilter::Trace => simplelog::LevelFilter::Trace,
        }
    }

    fn should_filter_dependencies(level: LevelFilter) -> bool {
        level != LevelFilter::Trace
    }

    fn color_choice(env: &RustEnv) -> ColorChoice {
        match env {
            RustEnv::Development => ColorChoice::Auto,
            RustEnv::Production | RustEnv::Staging => ColorChoice::Never,
        }
    }

    fn build_log_config(apply_filters: bool) -> simplelog::Config {
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();

        if apply_filters {
            for module in FILTERED_MODULES {
                builder.add_filter_ignore_str(*module);
            }
        }

        builder.build()
    }
}
