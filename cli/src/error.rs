use thiserror::Error;
use wiretap_core::RunnerError;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("runner failed: {0}")]
    Runner(#[from] RunnerError),
    #[error("command failed: {0}")]
    Command(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl CliError {
    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    /// 0 success, 11 config, 12 invalid input, 14 unknown id, 20 io,
    /// 50 anything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 11,
            Self::Runner(re) => match re {
                RunnerError::Validation(_) => 12,
                RunnerError::CollectionNotFound(_) | RunnerError::ScheduleNotFound(_) => 14,
                RunnerError::Store(_) => 20,
            },
            Self::Command(_) => 12,
            Self::Io(_) => 20,
            Self::Anyhow(_) => 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::Config("x".into()).exit_code(), 11);
        assert_eq!(
            CliError::from(RunnerError::validation("empty")).exit_code(),
            12
        );
        assert_eq!(
            CliError::from(RunnerError::ScheduleNotFound("s".into())).exit_code(),
            14
        );
        assert_eq!(CliError::from(anyhow::anyhow!("boom")).exit_code(), 50);
    }
}
