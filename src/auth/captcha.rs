//! Login captcha.
//!
//! Codes are rendered as a small SVG data URL and kept in the cache under a
//! random key until used or expired. Verification consumes the entry whether
//! or not the answer matches.

use crate::cache::{Cache, CacheKey};
use anyhow::Result;
use base64ct::{Base64, Encoding};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use std::{fmt::Write as _, sync::Arc, time::Duration};
use tracing::debug;
use ulid::Ulid;
use utoipa::ToSchema;

const CODE_LEN: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Captcha {
    pub captcha_key: String,
    /// `data:image/svg+xml;base64,...`, empty when captcha is disabled.
    pub captcha_image: String,
    pub enabled: bool,
}

pub struct CaptchaService {
    cache: Arc<dyn Cache>,
    enabled: bool,
    ttl: Duration,
}

impl CaptchaService {
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>, enabled: bool, ttl: Duration) -> Self {
        Self {
            cache,
            enabled,
            ttl,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Issue a new challenge.
    ///
    /// # Errors
    /// Returns an error if the cache write fails.
    pub async fn issue(&self) -> Result<Captcha> {
        if !self.enabled {
            return Ok(Captcha {
                captcha_key: String::new(),
                captcha_image: String::new(),
                enabled: false,
            });
        }

        let (key, code) = (Ulid::new().to_string(), random_code());
        self.cache
            .set(&CacheKey::Captcha(key.clone()), code.clone(), self.ttl)
            .await?;
        debug!(captcha_key = %key, "captcha issued");

        Ok(Captcha {
            captcha_key: key,
            captcha_image: render(&code),
            enabled: true,
        })
    }

    /// Check an answer. Case-insensitive; the challenge cannot be reused.
    ///
    /// # Errors
    /// Returns an error if the cache read fails.
    pub async fn verify(&self, key: &str, answer: &str) -> Result<bool> {
        if key.is_empty() {
            return Ok(false);
        }
        let stored = self.cache.take(&CacheKey::Captcha(key.to_string())).await?;
        Ok(stored.is_some_and(|code| code.eq_ignore_ascii_case(answer.trim())))
    }

    #[cfg(test)]
    pub(crate) async fn peek(&self, key: &str) -> Result<Option<String>> {
        self.cache.get(&CacheKey::Captcha(key.to_string())).await
    }
}

fn random_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .filter(|c| !matches!(c, '0' | 'O' | 'o' | '1' | 'l' | 'I'))
        .take(CODE_LEN)
        .collect()
}

fn render(code: &str) -> String {
    let mut rng = rand::thread_rng();
    let mut svg = String::from(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="120" height="40"><rect width="100%" height="100%" fill="#f4f4f5"/>"##,
    );
    for _ in 0..4 {
        let _ = write!(
            svg,
            r##"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="#a1a1aa"/>"##,
            rng.gen_range(0..120),
            rng.gen_range(0..40),
            rng.gen_range(0..120),
            rng.gen_range(0..40),
        );
    }
    for (idx, ch) in code.chars().enumerate() {
        let x = 14 + idx * 26;
        let y: u32 = rng.gen_range(26..32);
        let rotate: i32 = rng.gen_range(-20..20);
        let _ = write!(
            svg,
            r##"<text x="{x}" y="{y}" font-family="monospace" font-size="24" fill="#27272a" transform="rotate({rotate} {x} {y})">{ch}</text>"##,
        );
    }
    svg.push_str("</svg>");
    format!("data:image/svg+xml;base64,{}", Base64::encode_string(svg.as_bytes()))
}
