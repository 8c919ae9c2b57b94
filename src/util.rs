use thiserror::Error;

#[derive(Error, Debug)]
pub enum StasisError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("hyper error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("http error: {0}")]
    Http(#[from] http::Error),

    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("tls configuration error: {0}")]
    TlsConfig(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("certificate generation error: {0}")]
    CertGen(#[from] rcgen::Error),

    #[error("rsa key error: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("pkcs8 encoding error: {0}")]
    Pkcs8(#[from] rsa::pkcs8::Error),

    #[error("x509 parse error: {0}")]
    X509(#[from] x509_parser::nom::Err<x509_parser::error::X509Error>),
}

pub type Result<T> = std::result::Result<T, StasisError>;

pub fn setup_logger() {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
}
