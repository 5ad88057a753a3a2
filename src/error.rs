use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("history error: {0}")]
    History(String),
    #[error("invalid benchmark data: {0}")]
    InvalidBenchmark(String),
    #[error("git error: {0}")]
    Git(String),
    #[error("github error: {0}")]
    Github(String),
    #[error("benchmark ids must be unique, duplicated: '{0}'")]
    DuplicateId(String),
    #[error("no benchmark result was produced")]
    NoResults,
    #[error("performance regression: {}", failed.join(", "))]
    Regression { failed: Vec<String> },
    /// The function under test or one of its hooks failed, or the sampler produced no run.
    #[error("benchmark '{id}' failed: {source}")]
    Bench {
        id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Error::Config(msg.into())
    }

    pub fn history<T: Into<String>>(msg: T) -> Self {
        Error::History(msg.into())
    }

    pub fn invalid_benchmark<T: Into<String>>(msg: T) -> Self {
        Error::InvalidBenchmark(msg.into())
    }

    pub fn git<T: Into<String>>(msg: T) -> Self {
        Error::Git(msg.into())
    }

    pub fn github<T: Into<String>>(msg: T) -> Self {
        Error::Github(msg.into())
    }

    /// True when the run completed but the data shows a slowdown.
    pub fn is_regression(&self) -> bool {
        matches!(self, Error::Regression { .. })
    }
}
