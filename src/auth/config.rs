use secrecy::{ExposeSecret, SecretString};

/// Token, captcha and session settings shared by the auth components.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    jwt_secret: SecretString,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    captcha_enabled: bool,
    captcha_ttl_seconds: u64,
}

impl AuthConfig {
    /// Defaults: 30 minute access tokens, 7 day refresh tokens, captcha off.
    #[must_use]
    pub fn new(jwt_secret: SecretString) -> Self {
        Self {
            jwt_secret,
            access_token_ttl_seconds: 1800,
            refresh_token_ttl_seconds: 604_800,
            captcha_enabled: false,
            captcha_ttl_seconds: 120,
        }
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_captcha_enabled(mut self, enabled: bool) -> Self {
        self.captcha_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_captcha_ttl_seconds(mut self, seconds: u64) -> Self {
        self.captcha_ttl_seconds = seconds;
        self
    }

    pub(crate) fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.expose_secret().as_bytes()
    }

    #[must_use]
    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }

    #[must_use]
    pub fn captcha_enabled(&self) -> bool {
        self.captcha_enabled
    }

    #[must_use]
    pub fn captcha_ttl_seconds(&self) -> u64 {
        self.captcha_ttl_seconds
    }
}
