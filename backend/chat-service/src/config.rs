use dotenvy::dotenv;
use std::env;
use std::time::Duration;

use crate::error::AppError;

/// FCM provider settings; absent means push delivery is disabled.
#[derive(Debug, Clone)]
pub struct FcmSettings {
    /// Path to the service-account JSON key file.
    pub credentials_path: String,
}

/// Tunables for batched push delivery.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Hard per-request token ceiling imposed by the provider.
    pub max_batch_size: usize,
    /// Pause between sequential sub-batches to respect provider rate limits.
    pub inter_batch_delay: Duration,
    /// Bounded timeout applied to each sub-batch.
    pub batch_timeout: Duration,
    /// Extra delivery attempts for transient failures.
    pub retry_attempts: u32,
    /// Pause before each retry round.
    pub retry_backoff: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_batch_size: 500,
            inter_batch_delay: Duration::from_millis(100),
            batch_timeout: Duration::from_secs(10),
            retry_attempts: 2,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub port: u16,
    /// PEM-encoded RS256 public key used to verify inbound bearer tokens.
    pub jwt_public_key_pem: String,
    pub fcm: Option<FcmSettings>,
    pub dispatch: DispatchSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL missing".into()))?;
        let redis_url = env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty());
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);

        let jwt_public_key_pem = match env::var("JWT_PUBLIC_KEY_PEM") {
            Ok(pem) => pem,
            Err(_) => {
                let path = env::var("JWT_PUBLIC_KEY_FILE")
                    .map_err(|_| AppError::Config("JWT_PUBLIC_KEY_PEM missing".into()))?;
                std::fs::read_to_string(&path)
                    .map_err(|e| AppError::Config(format!("read jwt pubkey file: {e}")))?
            }
        };

        let fcm = match env::var("FCM_CREDENTIALS_PATH") {
            Ok(path) if !path.trim().is_empty() => Some(FcmSettings {
                credentials_path: path,
            }),
            _ => None,
        };

        let mut dispatch = DispatchSettings::default();
        if let Some(size) = env_usize("PUSH_MAX_BATCH_SIZE") {
            dispatch.max_batch_size = size.max(1);
        }
        if let Some(ms) = env_u64("PUSH_INTER_BATCH_DELAY_MS") {
            dispatch.inter_batch_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("PUSH_BATCH_TIMEOUT_MS") {
            dispatch.batch_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = env_u64("PUSH_RETRY_ATTEMPTS") {
            dispatch.retry_attempts = attempts as u32;
        }
        if let Some(ms) = env_u64("PUSH_RETRY_BACKOFF_MS") {
            dispatch.retry_backoff = Duration::from_millis(ms);
        }

        Ok(Self {
            database_url,
            redis_url,
            port,
            jwt_public_key_pem,
            fcm,
            dispatch,
        })
    }

    #[cfg(test)]
    pub fn test_defaults() -> Self {
        Self {
            database_url: "postgres://localhost/test".into(),
            redis_url: None,
            port: 3000,
            jwt_public_key_pem: String::new(),
            fcm: None,
            dispatch: DispatchSettings::default(),
        }
    }
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
