use std::io;

#[derive(thiserror::Error, Debug)]
pub enum MonitorError {
    #[error("config error: {0}")]
    Config(String),
    #[error("pattern error: {0}")]
    Pattern(String),
    #[error("notification error: {0}")]
    Notification(String),
    #[error("session store error: {0}")]
    Session(String),
    #[error("monitor already running")]
    AlreadyRunning,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<regex::Error> for MonitorError {
    fn from(err: regex::Error) -> Self {
        MonitorError::Pattern(err.to_string())
    }
}

impl From<toml::de::Error> for MonitorError {
    fn from(err: toml::de::Error) -> Self {
        MonitorError::Config(err.to_string())
    }
}
