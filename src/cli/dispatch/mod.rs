use crate::cli::actions::{Action, server::Args};
use anyhow::{Context, Result, bail};
use secrecy::SecretString;

const MIN_SECRET_LEN: usize = 16;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;
    let jwt_secret = matches
        .get_one::<String>("jwt-secret")
        .cloned()
        .context("missing required argument: --jwt-secret")?;
    if jwt_secret.len() < MIN_SECRET_LEN {
        bail!("--jwt-secret must be at least {MIN_SECRET_LEN} bytes");
    }

    let access_token_ttl_seconds = matches
        .get_one::<i64>("access-token-ttl-seconds")
        .copied()
        .unwrap_or(1800);
    let refresh_token_ttl_seconds = matches
        .get_one::<i64>("refresh-token-ttl-seconds")
        .copied()
        .unwrap_or(604_800);
    if refresh_token_ttl_seconds <= access_token_ttl_seconds {
        bail!("--refresh-token-ttl-seconds must be longer than --access-token-ttl-seconds");
    }

    Ok(Action::Server(Args {
        port,
        dsn,
        jwt_secret: SecretString::from(jwt_secret),
        access_token_ttl_seconds,
        refresh_token_ttl_seconds,
        captcha_enabled: matches.get_flag("captcha-enabled"),
        captcha_ttl_seconds: matches
            .get_one::<u64>("captcha-ttl-seconds")
            .copied()
            .unwrap_or(120),
        cache_prefix: matches
            .get_one::<String>("cache-prefix")
            .cloned()
            .unwrap_or_else(|| "adminkit".to_string()),
        cors_origin: matches.get_one::<String>("cors-origin").cloned(),
        admin_password: matches
            .get_one::<String>("admin-password")
            .cloned()
            .map(SecretString::from),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn dispatch(extra: &[&str]) -> Result<Action> {
        temp_env::with_vars_unset(
            [
                "ADMINKIT_JWT_SECRET",
                "ADMINKIT_DSN",
                "ADMINKIT_ACCESS_TOKEN_TTL_SECONDS",
                "ADMINKIT_REFRESH_TOKEN_TTL_SECONDS",
                "ADMINKIT_ADMIN_PASSWORD",
            ],
            || {
                let mut args = vec!["adminkit", "--dsn", "memory://"];
                args.extend_from_slice(extra);
                let matches = commands::new().try_get_matches_from(args)?;
                handler(&matches)
            },
        )
    }

    #[test]
    fn builds_server_action() -> Result<()> {
        let Action::Server(args) = dispatch(&["--jwt-secret", SECRET, "--admin-password", "pw"])?;
        assert_eq!(args.port, 8080);
        assert_eq!(args.dsn, "memory://");
        assert!(args.admin_password.is_some());
        assert!(!args.captcha_enabled);
        Ok(())
    }

    #[test]
    fn short_secret_is_rejected() {
        assert!(dispatch(&["--jwt-secret", "short"]).is_err());
    }

    #[test]
    fn refresh_must_outlive_access() {
        assert!(
            dispatch(&[
                "--jwt-secret",
                SECRET,
                "--access-token-ttl-seconds",
                "600",
                "--refresh-token-ttl-seconds",
                "600",
            ])
            .is_err()
        );
    }
}
