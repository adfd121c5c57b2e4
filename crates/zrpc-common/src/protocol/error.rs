use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("invalid magic number: {0:#x}")]
    InvalidMagic(u32),

    #[error("invalid codec type {0}")]
    InvalidCodec(String),

    #[error("frame too large: {0} bytes (max {1} bytes)")]
    FrameTooLarge(usize, usize),

    #[error("service/method request ill-formed: {0}")]
    IllFormedMethod(String),

    #[error("can't find service: {0}")]
    ServiceNotFound(String),

    #[error("can't find method: {0}")]
    MethodNotFound(String),

    #[error("service already defined: {0}")]
    DuplicateService(String),

    #[error("{0} is not a valid service name")]
    InvalidServiceName(String),

    #[error("connect timeout: expect within {0:?}")]
    ConnectTimeout(Duration),

    #[error("unexpected HTTP response: {0}")]
    HttpUpgrade(String),

    #[error("call timeout")]
    CallTimeout,

    #[error("connection is closing")]
    Closing,

    #[error("connection shut down: {0}")]
    Shutdown(String),

    #[error("{0}")]
    Remote(String),

    #[error("{0}")]
    Handler(String),

    #[error("invalid rpc address: {0}")]
    InvalidAddress(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("serialization error: {0}")]
    Postcard(#[from] postcard::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        RpcError::Registry(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
