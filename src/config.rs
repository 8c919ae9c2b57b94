use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Config {
    /// plaintext listener
    #[clap(long, env = "HTTP_ADDR", default_value = "0.0.0.0:80")]
    pub http_addr: String,

    /// tls listener, terminated with the generated ca identity
    #[clap(long, env = "HTTPS_ADDR", default_value = "0.0.0.0:443")]
    pub https_addr: String,

    /// host header that the control endpoint answers to
    #[clap(long, env = "PROXY_HOSTNAME", default_value = "stasis.proxy")]
    pub hostname: String,

    /// persist captured responses under this directory instead of memory
    #[clap(long, env = "CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// start with outbound requests disabled
    #[clap(long, env = "REPLAY_ONLY")]
    pub replay_only: bool,

    /// max buffered request body in mb
    #[clap(long, env = "MAX_BODY_MB", default_value_t = 64)]
    pub max_body_mb: usize,

    /// capacity of the dispatcher -> metrics event channel
    #[clap(long, env = "EVENT_BUFFER", default_value_t = 1024)]
    pub event_buffer: usize,

    /// worker count, defaults to the number of cpus
    #[clap(long, env = "WORKERS")]
    pub workers: Option<usize>,

    /// write the generated ca certificate here
    #[clap(long, env = "CA_CERT_OUT")]
    pub ca_cert_out: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Self {
        Config::parse()
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_mb.saturating_mul(1024 * 1024)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }
}
