use crate::core::app_state::EngineSettings;
use crate::core::session_guard::RefreshPolicy;
use crate::domain::model::{Account, AccountId, Session};
use crate::utils::error::{Result, SignupError};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_range, validate_url, Validate,
};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub submit: SubmitConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub base_url: String,
    pub anon_key: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// 已儲存的 refresh token；空值表示尚未登入
    pub refresh_token: Option<String>,
    pub account_id: Option<String>,
    #[serde(default = "default_refresh_attempts")]
    pub refresh_attempts: u32,
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitConfig {
    #[serde(default = "default_safety_timeout")]
    pub safety_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub verbose: bool,
}

fn default_request_timeout() -> u64 {
    15
}

fn default_refresh_attempts() -> u32 {
    2
}

fn default_attempt_timeout() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    60
}

fn default_safety_timeout() -> u64 {
    60
}

fn default_state_dir() -> String {
    "./.signup-state".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_token: None,
            account_id: None,
            refresh_attempts: default_refresh_attempts(),
            attempt_timeout_seconds: default_attempt_timeout(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_poll_interval(),
        }
    }
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            safety_timeout_seconds: default_safety_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

impl SignupConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(SignupError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // 處理環境變數替換
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| SignupError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${SUPABASE_ANON_KEY})，未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| SignupError::ConfigError {
            message: format!("Invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 轉換為引擎的時間設定
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            refresh_policy: RefreshPolicy {
                max_attempts: self.session.refresh_attempts,
                attempt_timeout: Duration::from_secs(self.session.attempt_timeout_seconds),
            },
            poll_interval: Duration::from_secs(self.polling.interval_seconds),
            safety_timeout: Duration::from_secs(self.submit.safety_timeout_seconds),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.service.request_timeout_seconds)
    }

    /// 由 refresh token 組出待驗證的 session；啟動時會先刷新一次才會被信任
    pub fn stored_session(&self) -> Option<Session> {
        let token = self
            .session
            .refresh_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty() && !t.starts_with("${"))?;

        Some(Session {
            access_token: String::new(),
            refresh_token: token.to_string(),
            expires_at: Utc::now(),
            account: Account {
                id: AccountId::from(self.session.account_id.clone().unwrap_or_default()),
                email: None,
            },
        })
    }
}

impl Validate for SignupConfig {
    fn validate(&self) -> Result<()> {
        validate_url("service.base_url", &self.service.base_url)?;
        validate_non_empty_string("service.anon_key", &self.service.anon_key)?;
        if self.service.anon_key.starts_with("${") {
            return Err(SignupError::MissingConfigError {
                field: "service.anon_key".to_string(),
            });
        }
        validate_range(
            "service.request_timeout_seconds",
            self.service.request_timeout_seconds,
            1,
            300,
        )?;
        validate_range("session.refresh_attempts", self.session.refresh_attempts, 1, 10)?;
        validate_range(
            "session.attempt_timeout_seconds",
            self.session.attempt_timeout_seconds,
            1,
            120,
        )?;
        validate_range("polling.interval_seconds", self.polling.interval_seconds, 5, 3600)?;
        validate_range(
            "submit.safety_timeout_seconds",
            self.submit.safety_timeout_seconds,
            1,
            600,
        )?;
        validate_path("storage.state_dir", &self.storage.state_dir)?;
        Ok(())
    }
}
