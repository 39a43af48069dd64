//! Typed configuration loaded once from environment variables, validated
//! before any socket is opened. Collects every validation failure instead
//! of bailing on the first one, so a misconfigured deployment sees the
//! whole list at once.
use crate::types::Task;
use std::net::IpAddr;
use std::str::FromStr;

const MODELS: &[&str] = &["tiny", "base", "small", "medium", "large"];

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: IpAddr,
    pub external_host: String,
    pub port_tcp: u16,
    pub port_udp: u16,
    pub secret: String,
    pub record_timeout: f64,
    pub task: Task,
    pub model: String,
    pub only_english: bool,
    pub rsa_key_bits: usize,
    pub session_timeout: f64,
    pub worker_count: usize,
    pub accept_backlog: usize,
    pub health_check_port: u16,
    pub metrics_port: u16,
}

fn get_var(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

struct Collector {
    errors: Vec<String>,
}

impl Collector {
    fn new() -> Self {
        Self { errors: Vec::new() }
    }

    fn parse<T: FromStr>(&mut self, name: &str, raw: &str) -> Option<T> {
        match raw.parse::<T>() {
            Ok(v) => Some(v),
            Err(_) => {
                self.errors.push(format!("{name}: could not parse '{raw}'"));
                None
            }
        }
    }

    fn validate_model(&mut self, raw: &str) -> Option<String> {
        if MODELS.contains(&raw) {
            Some(raw.to_string())
        } else {
            self.errors.push(format!(
                "MODEL: '{raw}' is not one of {MODELS:?}"
            ));
            None
        }
    }

    fn validate_task(&mut self, raw: &str) -> Option<Task> {
        match raw.parse::<Task>() {
            Ok(t) => Some(t),
            Err(e) => {
                self.errors.push(format!("TASK: {e}"));
                None
            }
        }
    }

    fn validate_host(&mut self, raw: &str) -> Option<IpAddr> {
        match raw.parse::<IpAddr>() {
            Ok(ip) => Some(ip),
            Err(_) => {
                self.errors.push(format!("SERVER_HOST: '{raw}' is not a valid IP address"));
                None
            }
        }
    }
}

impl Config {
    /// Load and validate configuration from the process environment.
    /// On any validation failure, logs every collected error and exits the
    /// process with a non-zero code before the caller can open a socket.
    pub fn load_or_exit() -> Self {
        match Self::load() {
            Ok(cfg) => cfg,
            Err(errors) => {
                for err in &errors {
                    tracing::error!(target: "config", "{err}");
                }
                std::process::exit(1);
            }
        }
    }

    fn load() -> Result<Self, Vec<String>> {
        let mut c = Collector::new();

        let server_host = c.validate_host(&get_var("SERVER_HOST", "0.0.0.0"));
        let external_host = get_var("EXTERNAL_HOST", "127.0.0.1");
        let port_tcp = c.parse::<u16>("PORT_TCP", &get_var("PORT_TCP", "5000"));
        let port_udp = c.parse::<u16>("PORT_UDP", &get_var("PORT_UDP", "5001"));
        let secret = get_var("SECRET", "your_secret_token");
        let record_timeout = c.parse::<f64>("RECORD_TIMEOUT", &get_var("RECORD_TIMEOUT", "10.0"));
        let task = c.validate_task(&get_var("TASK", "transcribe"));
        let model = c.validate_model(&get_var("MODEL", "medium"));
        let only_english = c.parse::<bool>("ONLY_ENGLISH", &get_var("ONLY_ENGLISH", "false"));
        let rsa_key_bits = c.parse::<usize>("RSA_KEY_BITS", &get_var("RSA_KEY_BITS", "4096"));
        let session_timeout = c.parse::<f64>("SESSION_TIMEOUT", &get_var("SESSION_TIMEOUT", "5.0"));
        let worker_count = c.parse::<usize>("WORKER_COUNT", &get_var("WORKER_COUNT", "2"));
        let accept_backlog = c.parse::<usize>("ACCEPT_BACKLOG", &get_var("ACCEPT_BACKLOG", "10"));
        let health_check_port = c.parse::<u16>("HEALTH_CHECK_PORT", &get_var("HEALTH_CHECK_PORT", "8001"));
        let metrics_port = c.parse::<u16>("METRICS_PORT", &get_var("METRICS_PORT", "2112"));

        if !c.errors.is_empty() {
            return Err(c.errors);
        }

        Ok(Config {
            server_host: server_host.unwrap(),
            external_host,
            port_tcp: port_tcp.unwrap(),
            port_udp: port_udp.unwrap(),
            secret,
            record_timeout: record_timeout.unwrap(),
            task: task.unwrap(),
            model: model.unwrap(),
            only_english: only_english.unwrap(),
            rsa_key_bits: rsa_key_bits.unwrap(),
            session_timeout: session_timeout.unwrap(),
            worker_count: worker_count.unwrap(),
            accept_backlog: accept_backlog.unwrap(),
            health_check_port: health_check_port.unwrap(),
            metrics_port: metrics_port.unwrap(),
        })
    }

    pub fn model_name(&self) -> String {
        if self.only_english && self.model != "large" {
            format!("{}.en", self.model)
        } else {
            self.model.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for var in [
            "SERVER_HOST", "EXTERNAL_HOST", "PORT_TCP", "PORT_UDP", "SECRET",
            "RECORD_TIMEOUT", "TASK", "MODEL", "ONLY_ENGLISH", "RSA_KEY_BITS",
            "SESSION_TIMEOUT", "WORKER_COUNT", "ACCEPT_BACKLOG",
            "HEALTH_CHECK_PORT", "METRICS_PORT",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn defaults_load_successfully() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let cfg = Config::load().expect("defaults should validate");
        assert_eq!(cfg.port_tcp, 5000);
        assert_eq!(cfg.port_udp, 5001);
        assert_eq!(cfg.worker_count, 2);
        assert_eq!(cfg.model_name(), "medium");
    }

    #[test]
    fn only_english_appends_suffix() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("ONLY_ENGLISH", "true");
        std::env::set_var("MODEL", "small");
        let cfg = Config::load().expect("should validate");
        assert_eq!(cfg.model_name(), "small.en");
        clear_env();
    }

    #[test]
    fn invalid_model_is_collected_as_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("MODEL", "not-a-model");
        std::env::set_var("TASK", "also-not-a-task");
        let errs = Config::load().unwrap_err();
        assert!(errs.iter().any(|e| e.starts_with("MODEL")));
        assert!(errs.iter().any(|e| e.starts_with("TASK")));
        clear_env();
    }
}
