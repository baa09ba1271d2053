/// Runtime settings, read once at startup. No config-file crate:
/// everything is read straight off the environment with a
/// parse-or-default idiom, consistently across every field.
#[derive(Clone, Debug)]
pub struct Settings {
    pub tcp_port: u16,
    pub http_port: u16,
    pub pair_sec: i64,
    pub drift_m: f64,
    pub gap_sec: i64,
    pub jump_m: f64,
    pub stop_kmh: f64,
    pub validate_crc: bool,
    pub persist_log_path: String,
    pub socket_idle_timeout_secs: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tcp_port: 15027,
            http_port: 8768,
            pair_sec: 60,
            drift_m: 30.0,
            gap_sec: 300,
            jump_m: 100.0,
            stop_kmh: 5.0,
            validate_crc: false,
            persist_log_path: "./fleet_state.ndjson".to_string(),
            socket_idle_timeout_secs: 300,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            tcp_port: env_or("AVL_TCP_PORT", d.tcp_port),
            http_port: env_or("HTTP_PORT", d.http_port),
            pair_sec: env_or("PAIR_SEC", d.pair_sec),
            drift_m: env_or("DRIFT_M", d.drift_m),
            gap_sec: env_or("GAP_SEC", d.gap_sec),
            jump_m: env_or("JUMP_M", d.jump_m),
            stop_kmh: env_or("STOP_KMH", d.stop_kmh),
            validate_crc: env_or("AVL_VALIDATE_CRC", d.validate_crc),
            persist_log_path: std::env::var("PERSIST_LOG_PATH").unwrap_or(d.persist_log_path),
            socket_idle_timeout_secs: env_or("SOCKET_IDLE_TIMEOUT_SECS", d.socket_idle_timeout_secs),
        }
    }
}
