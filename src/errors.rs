use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("Finalizer Error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("HttpError: {0}")]
    HttpError(String),

    #[error("MetadataMissing: {0}")]
    MetadataMissing(String),

    /// Non-retryable failure. A terminal Failed condition has already been
    /// written to the CR status; the event is not redelivered and an operator
    /// restart is required to retry.
    #[error("Fatal: {0}")]
    Fatal(String),
}

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::SerializationError(_) => "serializationerror",
            Error::KubeError(_) => "kubeerror",
            Error::FinalizerError(_) => "finalizererror",
            Error::HttpError(_) => "httperror",
            Error::MetadataMissing(_) => "metadatamissing",
            Error::Fatal(_) => "fatal",
        }
        .to_string()
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        Error::KubeError(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::HttpError(e.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
