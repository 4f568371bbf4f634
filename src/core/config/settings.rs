use super::parsing::{
    env_flag, env_number, env_optional, env_or_default, is_http_url, parse_cors_origins,
    parse_environment,
};
use super::types::{
    ApiSettings, BackendSettings, ConfigError, CorsSettings, GradingSettings, RuntimeSettings,
    ServerHost, ServerPort, ServerSettings, Settings, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("GRADER_HOST", "0.0.0.0");
        let port = env_or_default("GRADER_PORT", "8080");

        let environment =
            parse_environment(env_optional("GRADER_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config = env_flag("GRADER_STRICT_CONFIG", false) || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "LMS Autograder");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let backend_url = env_optional("LMS_BACKEND_URL");
        let base_url_explicit = backend_url.is_some();
        let base_url = backend_url
            .unwrap_or_else(|| "http://localhost:5000".to_string())
            .trim_end_matches('/')
            .to_string();
        let connect_timeout_seconds: u64 = env_number("LMS_CONNECT_TIMEOUT_SECONDS", 10)?;
        let request_timeout_seconds: u64 = env_number("LMS_REQUEST_TIMEOUT_SECONDS", 60)?;

        let poll_interval_ms: u64 = env_number("GRADING_POLL_INTERVAL_MS", 2000)?;
        let max_poll_interval_ms: u64 = env_number("GRADING_MAX_POLL_INTERVAL_MS", 30_000)?;
        let backoff_jitter = env_flag("GRADING_BACKOFF_JITTER", true);
        let max_dispatch_attempts: u32 = env_number("GRADING_MAX_DISPATCH_ATTEMPTS", 3)?;
        let max_poll_attempts: u32 = env_number("GRADING_MAX_POLL_ATTEMPTS", 120)?;
        let max_fetch_attempts: u32 = env_number("GRADING_MAX_FETCH_ATTEMPTS", 5)?;

        let log_level = env_or_default("GRADER_LOG_LEVEL", "info");
        let json = env_flag("GRADER_LOG_JSON", false);
        let prometheus_enabled = env_flag("PROMETHEUS_ENABLED", false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            cors: CorsSettings { origins: cors_origins },
            backend: BackendSettings {
                base_url,
                base_url_explicit,
                connect_timeout_seconds,
                request_timeout_seconds,
            },
            grading: GradingSettings {
                poll_interval_ms,
                max_poll_interval_ms,
                backoff_jitter,
                max_dispatch_attempts,
                max_poll_attempts,
                max_fetch_attempts,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn backend(&self) -> &BackendSettings {
        &self.backend
    }

    pub(crate) fn grading(&self) -> &GradingSettings {
        &self.grading
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !is_http_url(&self.backend.base_url) {
            return Err(ConfigError::InvalidValue {
                field: "LMS_BACKEND_URL",
                value: self.backend.base_url.clone(),
            });
        }

        if self.backend.request_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "LMS_REQUEST_TIMEOUT_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.grading.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "GRADING_POLL_INTERVAL_MS",
                value: "0".to_string(),
            });
        }

        if self.grading.max_poll_interval_ms < self.grading.poll_interval_ms {
            return Err(ConfigError::InvalidValue {
                field: "GRADING_MAX_POLL_INTERVAL_MS",
                value: self.grading.max_poll_interval_ms.to_string(),
            });
        }

        let budgets = [
            ("GRADING_MAX_DISPATCH_ATTEMPTS", self.grading.max_dispatch_attempts),
            ("GRADING_MAX_POLL_ATTEMPTS", self.grading.max_poll_attempts),
            ("GRADING_MAX_FETCH_ATTEMPTS", self.grading.max_fetch_attempts),
        ];
        for (field, value) in budgets {
            if value == 0 {
                return Err(ConfigError::InvalidValue { field, value: "0".to_string() });
            }
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if !self.backend.base_url_explicit {
            return Err(ConfigError::MissingSecret("LMS_BACKEND_URL"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::core::config::{ConfigError, Settings};
    use crate::test_support;

    const GRADING_VARS: &[&str] = &[
        "GRADER_ENV",
        "GRADER_STRICT_CONFIG",
        "LMS_BACKEND_URL",
        "GRADING_POLL_INTERVAL_MS",
        "GRADING_MAX_POLL_INTERVAL_MS",
        "GRADING_BACKOFF_JITTER",
        "GRADING_MAX_DISPATCH_ATTEMPTS",
        "GRADING_MAX_POLL_ATTEMPTS",
        "GRADING_MAX_FETCH_ATTEMPTS",
    ];

    fn clear_grading_env() {
        for var in GRADING_VARS {
            std::env::remove_var(var);
        }
    }

    #[tokio::test]
    async fn defaults_load_in_development() {
        let _guard = test_support::env_lock().await;
        clear_grading_env();

        let settings = Settings::load().expect("settings");
        assert_eq!(settings.backend().base_url, "http://localhost:5000");
        assert_eq!(settings.grading().poll_interval_ms, 2000);
        assert_eq!(settings.grading().max_dispatch_attempts, 3);
        assert_eq!(settings.grading().max_fetch_attempts, 5);
        assert!(settings.grading().backoff_jitter);
    }

    #[tokio::test]
    async fn trailing_slash_is_trimmed_from_backend_url() {
        let _guard = test_support::env_lock().await;
        clear_grading_env();
        std::env::set_var("LMS_BACKEND_URL", "https://grader.example.edu/");

        let settings = Settings::load().expect("settings");
        assert_eq!(settings.backend().base_url, "https://grader.example.edu");
        clear_grading_env();
    }

    #[tokio::test]
    async fn zero_poll_budget_is_rejected() {
        let _guard = test_support::env_lock().await;
        clear_grading_env();
        std::env::set_var("GRADING_MAX_POLL_ATTEMPTS", "0");

        let err = Settings::load().expect_err("zero budget");
        assert!(matches!(
            err,
            ConfigError::InvalidValue { field: "GRADING_MAX_POLL_ATTEMPTS", .. }
        ));
        clear_grading_env();
    }

    #[tokio::test]
    async fn cap_below_base_interval_is_rejected() {
        let _guard = test_support::env_lock().await;
        clear_grading_env();
        std::env::set_var("GRADING_POLL_INTERVAL_MS", "5000");
        std::env::set_var("GRADING_MAX_POLL_INTERVAL_MS", "1000");

        let err = Settings::load().expect_err("cap below base");
        assert!(matches!(
            err,
            ConfigError::InvalidValue { field: "GRADING_MAX_POLL_INTERVAL_MS", .. }
        ));
        clear_grading_env();
    }

    #[tokio::test]
    async fn production_requires_explicit_backend_url() {
        let _guard = test_support::env_lock().await;
        clear_grading_env();
        std::env::set_var("GRADER_ENV", "production");

        let err = Settings::load().expect_err("missing backend url");
        assert!(matches!(err, ConfigError::MissingSecret("LMS_BACKEND_URL")));

        std::env::set_var("LMS_BACKEND_URL", "https://grader.example.edu");
        Settings::load().expect("explicit url accepted");
        clear_grading_env();
    }
}
