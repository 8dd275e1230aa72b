use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{domain::UserId, errors::Error, Result};

/// One selectable time-to-live, e.g. `1h` → 3600s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TtlChoice {
    pub label: String,
    pub duration: Duration,
}

impl TtlChoice {
    /// Parse `15m`, `1h`, `2d` (also bare seconds like `900`).
    pub fn parse(raw: &str) -> Option<Self> {
        let label = raw.trim();
        if label.is_empty() {
            return None;
        }
        let (num, mult) = match label.chars().last()? {
            's' => (&label[..label.len() - 1], 1u64),
            'm' => (&label[..label.len() - 1], 60),
            'h' => (&label[..label.len() - 1], 3600),
            'd' => (&label[..label.len() - 1], 86_400),
            c if c.is_ascii_digit() => (label, 1),
            _ => return None,
        };
        let n = num.parse::<u64>().ok().filter(|n| *n > 0)?;
        let secs = n.checked_mul(mult)?;
        Some(Self {
            label: label.to_string(),
            duration: Duration::from_secs(secs),
        })
    }
}

/// Typed configuration for the bot.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    /// Without `@`. Filled from the platform at startup when unset.
    pub bot_username: Option<String>,
    pub admin_ids: Vec<i64>,

    // Composition
    pub max_draft_len: usize,
    pub allowed_ttls: Vec<TtlChoice>,
    pub session_idle_timeout: Duration,
    /// How long «Send later» holds a draft before publishing it.
    pub send_delay: Duration,
    /// Extend buttons offered under channel posts; empty disables them.
    pub extend_options: Vec<TtlChoice>,

    // Resilience
    pub resilience_enabled: bool,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown: Duration,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
    pub mailbox_lock_timeout: Duration,
    pub transport_timeout: Duration,

    // Relay
    pub relay_ttl: Duration,

    // Persistence / audit
    pub data_file: Option<PathBuf>,
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,

    /// Offset applied when rendering expiry times for humans.
    pub timezone_offset_minutes: i32,
}

pub const DEFAULT_TTLS: &str = "15m,30m,1h,6h,12h,24h";

pub const DEFAULT_EXTEND_OPTIONS: &str = "30m,1h,6h";

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        let bot_username = env_str("BOT_USERNAME")
            .map(|s| s.trim().trim_start_matches('@').to_string())
            .filter(|s| !s.is_empty());
        let admin_ids = parse_csv_i64(env_str("ADMIN_IDS"));

        let max_draft_len = env_usize("MAX_DRAFT_LENGTH").unwrap_or(3500);
        if max_draft_len == 0 {
            return Err(Error::Config("MAX_DRAFT_LENGTH must be positive".to_string()));
        }
        let allowed_ttls =
            parse_ttls(&env_str("ALLOWED_TTLS").unwrap_or_else(|| DEFAULT_TTLS.to_string()))?;
        let session_idle_timeout =
            Duration::from_secs(env_u64("SESSION_IDLE_TIMEOUT_SECS").unwrap_or(600));
        let send_delay = Duration::from_secs(env_u64("SEND_DELAY_SECS").unwrap_or(120).max(1));
        let extend_options = match env_str("EXTEND_OPTIONS") {
            Some(s) if s.trim().is_empty() => Vec::new(),
            Some(s) => parse_ttls(&s)?,
            None => parse_ttls(DEFAULT_EXTEND_OPTIONS)?,
        };

        let resilience_enabled = env_bool("RESILIENCE_ENABLED").unwrap_or(true);
        let breaker_failure_threshold = env_u32("BREAKER_FAILURE_THRESHOLD").unwrap_or(5).max(1);
        let breaker_cooldown = Duration::from_secs(env_u64("BREAKER_COOLDOWN_SECS").unwrap_or(60));
        let rate_limit_requests = env_u32("RATE_LIMIT_REQUESTS").unwrap_or(10);
        let rate_limit_window = Duration::from_secs(env_u64("RATE_LIMIT_WINDOW").unwrap_or(60));
        let mailbox_lock_timeout =
            Duration::from_millis(env_u64("MAILBOX_LOCK_TIMEOUT_MS").unwrap_or(5_000));
        let transport_timeout =
            Duration::from_millis(env_u64("TRANSPORT_TIMEOUT_MS").unwrap_or(10_000));

        let relay_ttl = Duration::from_secs(env_u64("RELAY_TTL_SECS").unwrap_or(1_800));

        let data_file = match env_str("DATA_FILE") {
            Some(s) if s.trim().is_empty() => None,
            Some(s) => Some(PathBuf::from(s)),
            None => Some(PathBuf::from("/tmp/amr-data.json")),
        };
        let audit_log_path =
            PathBuf::from(env_str("AUDIT_LOG_PATH").unwrap_or("/tmp/amr-audit.log".to_string()));
        let audit_log_json = env_bool("AUDIT_LOG_JSON").unwrap_or(true);
        let timezone_offset_minutes = env_str("TIMEZONE_OFFSET_MINUTES")
            .and_then(|s| s.trim().parse::<i32>().ok())
            .unwrap_or(0);

        Ok(Self {
            telegram_bot_token,
            bot_username,
            admin_ids,
            max_draft_len,
            allowed_ttls,
            session_idle_timeout,
            send_delay,
            extend_options,
            resilience_enabled,
            breaker_failure_threshold,
            breaker_cooldown,
            rate_limit_requests,
            rate_limit_window,
            mailbox_lock_timeout,
            transport_timeout,
            relay_ttl,
            data_file,
            audit_log_path,
            audit_log_json,
            timezone_offset_minutes,
        })
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admin_ids.contains(&user_id.0)
    }

    /// Look up an allowed TTL by its label. Unlisted values are rejected even
    /// when they parse as a duration.
    pub fn ttl_by_label(&self, label: &str) -> Option<&TtlChoice> {
        let label = label.trim();
        self.allowed_ttls.iter().find(|t| t.label == label)
    }

    pub fn extend_by_label(&self, label: &str) -> Option<&TtlChoice> {
        self.extend_options.iter().find(|t| t.label == label)
    }
}

fn parse_ttls(raw: &str) -> Result<Vec<TtlChoice>> {
    let mut out = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let choice = TtlChoice::parse(part)
            .ok_or_else(|| Error::Config(format!("invalid duration: {part}")))?;
        if out.iter().any(|t: &TtlChoice| t.label == choice.label) {
            continue;
        }
        out.push(choice);
    }
    if out.is_empty() {
        return Err(Error::Config("at least one duration is required".to_string()));
    }
    Ok(out)
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        telegram_bot_token: "test-token".to_string(),
        bot_username: Some("amr_test_bot".to_string()),
        admin_ids: vec![1],
        max_draft_len: 50,
        allowed_ttls: parse_ttls(DEFAULT_TTLS).unwrap(),
        session_idle_timeout: Duration::from_secs(600),
        send_delay: Duration::from_secs(120),
        extend_options: parse_ttls(DEFAULT_EXTEND_OPTIONS).unwrap(),
        resilience_enabled: true,
        breaker_failure_threshold: 3,
        breaker_cooldown: Duration::from_secs(60),
        rate_limit_requests: 100,
        rate_limit_window: Duration::from_secs(60),
        mailbox_lock_timeout: Duration::from_millis(200),
        transport_timeout: Duration::from_secs(10),
        relay_ttl: Duration::from_secs(1_800),
        data_file: None,
        audit_log_path: PathBuf::from(format!("/tmp/amr-audit-test-{}.log", std::process::id())),
        audit_log_json: true,
        timezone_offset_minutes: 0,
    }
}
