use crate::{
    api::{self, ServerConfig},
    auth::AuthConfig,
};
use anyhow::Result;
use secrecy::SecretString;
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub jwt_secret: SecretString,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub captcha_enabled: bool,
    pub captcha_ttl_seconds: u64,
    pub cache_prefix: String,
    pub cors_origin: Option<String>,
    pub admin_password: Option<SecretString>,
}

impl Args {
    #[must_use]
    pub fn into_config(self) -> ServerConfig {
        let auth = AuthConfig::new(self.jwt_secret)
            .with_access_token_ttl_seconds(self.access_token_ttl_seconds)
            .with_refresh_token_ttl_seconds(self.refresh_token_ttl_seconds)
            .with_captcha_enabled(self.captcha_enabled)
            .with_captcha_ttl_seconds(self.captcha_ttl_seconds);

        ServerConfig {
            port: self.port,
            dsn: self.dsn,
            auth,
            cache_prefix: self.cache_prefix,
            cors_origin: self.cors_origin,
            admin_password: self.admin_password,
        }
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the store is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);
    api::new(args.into_config()).await
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(&args.dsn)),
        ("cache_prefix", args.cache_prefix.clone()),
        (
            "cors_origin",
            args.cors_origin.clone().unwrap_or_else(|| "*".to_string()),
        ),
        (
            "access_token_ttl",
            format!("{}s", args.access_token_ttl_seconds),
        ),
        (
            "refresh_token_ttl",
            format!("{}s", args.refresh_token_ttl_seconds),
        ),
        ("captcha", args.captcha_enabled.to_string()),
        ("admin_password_set", args.admin_password.is_some().to_string()),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\nStartup configuration:", banner());
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn banner() -> String {
    let hash = crate::GIT_COMMIT_HASH.trim();
    let short_hash = hash.get(..7).unwrap_or(hash);
    format!(
        "adminkit - {} - {short_hash}",
        env!("CARGO_PKG_VERSION")
    )
}
