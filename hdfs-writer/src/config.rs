use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "9393")]
    pub port: u16,

    /// Upper bound on one consumer poll, so workers check their shutdown
    /// signal frequently even on idle topics.
    #[envconfig(default = "100")]
    pub poll_timeout_ms: u64,

    /// How long shutdown waits for draining workers before exiting anyway.
    #[envconfig(default = "5")]
    pub shutdown_grace_secs: u64,

    #[envconfig(default = "6000")]
    pub kafka_session_timeout_ms: u32,

    #[envconfig(default = "earliest")]
    pub kafka_offset_reset: String,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn poll_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.shutdown_grace_secs)
    }
}
