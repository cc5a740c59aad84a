// Environment configuration for the monitor daemon
// Read once at startup; a missing or malformed required value is fatal before the loop starts.

use scraper::Selector;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::monitor::error::ConfigError;
use crate::monitor::portal::Credentials;
use crate::monitor::runner::{CommitPolicy, LoopSettings};
use crate::monitor::session::SessionSettings;

const DEFAULT_BASE_URL: &str = "https://tpo.vierp.in";
const DEFAULT_LOGIN_PATH: &str = "/";
const DEFAULT_LISTING_PATH: &str = "/company-dashboard";
const DEFAULT_TABLE_SELECTOR: &str = "table";
const DEFAULT_ROW_SELECTOR: &str = "table tbody tr";
const DEFAULT_CELL_SELECTOR: &str = "td";
const DEFAULT_MAX_ITEMS: usize = 10;
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_LOGIN_ATTEMPTS: u32 = 3;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30 * 60;
const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
const DEFAULT_SMTP_PORT: u16 = 465;

/// Where and how to reach the portal
#[derive(Debug, Clone)]
pub struct PortalSettings {
    pub base_url: String,
    pub login_path: String,
    pub listing_path: String,
    pub username_field: String,
    pub password_field: String,
    /// Listing container; its absence means the page is not the listing
    pub table_selector: String,
    pub row_selector: String,
    pub cell_selector: String,
    pub max_items: usize,
    pub credentials: Credentials,
}

/// Sender, recipients and relay for alert emails
#[derive(Clone)]
pub struct MailSettings {
    pub from: String,
    pub to: Vec<String>,
    pub password: String,
    pub smtp_host: String,
    pub smtp_port: u16,
}

impl std::fmt::Debug for MailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailSettings")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("password", &"[REDACTED]")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .finish()
    }
}

/// How alerts leave the process
#[derive(Debug, Clone)]
pub enum AlertChannel {
    Email(MailSettings),
    Terminal,
}

/// Full daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for runtime files (PID, status)
    pub state_dir: PathBuf,
    /// Path to the daemon PID file
    pub pid_file: PathBuf,
    /// Path to the status file rewritten after every cycle
    pub status_file: PathBuf,
    pub portal: PortalSettings,
    pub alerts: AlertChannel,
    pub session: SessionSettings,
    pub monitor: LoopSettings,
}

impl Config {
    /// Build configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup: &lookup };

        let state_dir = Self::state_dir_from(&env);

        let credentials = Credentials::new(
            env.required("PORTAL_USERNAME")?,
            env.required("PORTAL_PASSWORD")?,
        );

        let table_selector = env.or("PORTAL_TABLE_SELECTOR", DEFAULT_TABLE_SELECTOR);
        validate_selector("PORTAL_TABLE_SELECTOR", &table_selector)?;
        let row_selector = env.or("PORTAL_ROW_SELECTOR", DEFAULT_ROW_SELECTOR);
        validate_selector("PORTAL_ROW_SELECTOR", &row_selector)?;
        let cell_selector = env.or("PORTAL_CELL_SELECTOR", DEFAULT_CELL_SELECTOR);
        validate_selector("PORTAL_CELL_SELECTOR", &cell_selector)?;

        let base_url = env.or("PORTAL_BASE_URL", DEFAULT_BASE_URL);
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                var: "PORTAL_BASE_URL",
                reason: format!("'{}' is not an http(s) URL", base_url),
            });
        }

        let portal = PortalSettings {
            base_url: base_url.trim_end_matches('/').to_string(),
            login_path: env.or("PORTAL_LOGIN_PATH", DEFAULT_LOGIN_PATH),
            listing_path: env.or("PORTAL_LISTING_PATH", DEFAULT_LISTING_PATH),
            username_field: env.or("PORTAL_USERNAME_FIELD", "username"),
            password_field: env.or("PORTAL_PASSWORD_FIELD", "password"),
            table_selector,
            row_selector,
            cell_selector,
            max_items: env.positive("PORTAL_MAX_ITEMS", DEFAULT_MAX_ITEMS)?,
            credentials,
        };

        let alerts = match env.or("ALERT_CHANNEL", "email").to_lowercase().as_str() {
            "email" => AlertChannel::Email(Self::mail_from(&env)?),
            "terminal" => AlertChannel::Terminal,
            other => {
                return Err(ConfigError::Invalid {
                    var: "ALERT_CHANNEL",
                    reason: format!("expected 'email' or 'terminal', got '{}'", other),
                })
            }
        };

        let session = SessionSettings {
            op_timeout: Duration::from_secs(
                env.positive("PORTAL_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?,
            ),
            login_attempts: env.positive("PORTAL_LOGIN_ATTEMPTS", DEFAULT_LOGIN_ATTEMPTS)?,
            ..SessionSettings::default()
        };

        let commit_policy = match env.or("COMMIT_POLICY", "always").to_lowercase().as_str() {
            "always" => CommitPolicy::AlwaysAdvance,
            "on-delivery" => CommitPolicy::HoldUntilDelivered,
            other => {
                return Err(ConfigError::Invalid {
                    var: "COMMIT_POLICY",
                    reason: format!("expected 'always' or 'on-delivery', got '{}'", other),
                })
            }
        };

        let monitor = LoopSettings {
            interval: Duration::from_secs(
                env.positive("POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?,
            ),
            commit_policy,
        };

        Ok(Self {
            pid_file: state_dir.join("daemon.pid"),
            status_file: state_dir.join("status.json"),
            state_dir,
            portal,
            alerts,
            session,
            monitor,
        })
    }

    fn state_dir_from(env: &Env<'_>) -> PathBuf {
        // PORTAL_WATCH_DIR overrides the default location
        if let Some(dir) = env.get("PORTAL_WATCH_DIR") {
            return PathBuf::from(dir);
        }
        Self::default_state_dir()
    }

    fn mail_from(env: &Env<'_>) -> Result<MailSettings, ConfigError> {
        let to: Vec<String> = env
            .required("EMAIL_TO")?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if to.is_empty() {
            return Err(ConfigError::Invalid {
                var: "EMAIL_TO",
                reason: "no recipient addresses".to_string(),
            });
        }

        Ok(MailSettings {
            from: env.required("EMAIL_FROM")?,
            to,
            password: env.required("EMAIL_PASSWORD")?,
            smtp_host: env.or("SMTP_HOST", DEFAULT_SMTP_HOST),
            smtp_port: env.positive("SMTP_PORT", DEFAULT_SMTP_PORT)?,
        })
    }

    /// Default state directory: ~/.portal-watch (or /tmp/portal-watch if home unavailable)
    fn default_state_dir() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".portal-watch"))
            .unwrap_or_else(|| PathBuf::from("/tmp/portal-watch"))
    }

    /// Ensure the state directory exists, owner-only on Unix
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.state_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.state_dir, std::fs::Permissions::from_mode(0o700))?;
        }

        Ok(())
    }
}

/// Paths only, for the CLI: it must work without portal or mail credentials.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    pub state_dir: PathBuf,
    pub pid_file: PathBuf,
    pub status_file: PathBuf,
}

impl RuntimePaths {
    pub fn from_env() -> Self {
        let lookup = |key: &str| std::env::var(key).ok();
        let state_dir = Config::state_dir_from(&Env { lookup: &lookup });
        Self {
            pid_file: state_dir.join("daemon.pid"),
            status_file: state_dir.join("status.json"),
            state_dir,
        }
    }

    pub fn read_pid(&self) -> Option<u32> {
        read_pid_file(&self.pid_file)
    }

    pub fn is_daemon_running(&self) -> bool {
        self.read_pid().map(pid_is_alive).unwrap_or(false)
    }
}

/// PIDs outside 1..=i32::MAX would address process groups in `kill`.
fn read_pid_file(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .filter(|&pid| pid != 0 && i32::try_from(pid).is_ok())
}

#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
    // Signal 0 only checks that the process exists
    match i32::try_from(pid) {
        Ok(pid) if pid > 0 => unsafe { libc::kill(pid, 0) == 0 },
        _ => false,
    }
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: u32) -> bool {
    false
}

fn validate_selector(var: &'static str, selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::Invalid {
            var,
            reason: format!("'{}' is not a CSS selector: {}", selector, e),
        })
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing { var: key })
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn positive<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr + PartialOrd + Default,
    {
        let Some(raw) = self.get(key) else {
            return Ok(default);
        };
        match raw.trim().parse::<T>() {
            Ok(value) if value > T::default() => Ok(value),
            _ => Err(ConfigError::Invalid {
                var: key,
                reason: format!("expected a positive integer, got '{}'", raw),
            }),
        }
    }
}
