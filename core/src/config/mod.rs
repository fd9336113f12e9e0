mod types;

pub use types::{
    AppConfig, CaptureConfig, FilterConfig, LoggingConfig, PersistConfig, RunnerConfig,
    SchedulerConfig,
};
