use std::env;

/// Process configuration, loaded once at startup from the environment.
///
/// Mirrors the original service's env-var surface (`DATABASE_URL`,
/// `JOB_SECRET`, `SECRET_KEY`) plus the tunables named in the component
/// design for the RPC transport and the TCP prober.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub job_secret: Option<String>,
    pub secret_key: String,

    pub nvr_rpc_timeout_secs: u64,
    pub probe_ports: Vec<u16>,
    pub probe_timeout_secs: f64,
    pub probe_max_concurrency: usize,
    pub routability_timeout_secs: f64,

    pub web_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:///netmanager.db".to_string(),
            job_secret: None,
            secret_key: "netmanager-secret-change-in-production-2024".to_string(),

            nvr_rpc_timeout_secs: 15,
            probe_ports: vec![554, 80, 37777],
            probe_timeout_secs: 2.0,
            probe_max_concurrency: 50,
            routability_timeout_secs: 1.5,

            web_port: 8080,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment, optionally after
    /// reading a `.env` file in the working directory. Unset variables
    /// fall back to the same defaults the original service used.
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("no .env file loaded: {}", e);
        }

        let defaults = AppConfig::default();

        Self {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            job_secret: env::var("JOB_SECRET").ok().filter(|s| !s.is_empty()),
            secret_key: env::var("SECRET_KEY").unwrap_or(defaults.secret_key),

            nvr_rpc_timeout_secs: env::var("NVR_RPC_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.nvr_rpc_timeout_secs),
            probe_ports: env::var("PROBE_PORTS")
                .ok()
                .map(|v| {
                    v.split(',')
                        .filter_map(|p| p.trim().parse::<u16>().ok())
                        .collect::<Vec<_>>()
                })
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.probe_ports),
            probe_timeout_secs: env::var("PROBE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.probe_timeout_secs),
            probe_max_concurrency: env::var("PROBE_MAX_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.probe_max_concurrency),
            routability_timeout_secs: env::var("ROUTABILITY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.routability_timeout_secs),

            web_port: env::var("WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.web_port),
        }
    }
}
