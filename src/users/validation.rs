use anyhow::Context;
use regex::Regex;

use crate::config::PasswordPolicyConfig;
use crate::error::AppError;

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";
const MAX_PASSWORD_LEN: usize = 128;
const MAX_FULL_NAME_LEN: usize = 100;
const MAX_BIO_LEN: usize = 1024;
const MAX_AVATAR_URL_LEN: usize = 2048;

/// Input rules for account requests. Built once at startup and handed to the service.
#[derive(Debug, Clone)]
pub struct Validator {
    email_re: Regex,
    min_password_len: usize,
}

impl Validator {
    pub fn new(policy: &PasswordPolicyConfig) -> anyhow::Result<Self> {
        let email_re = Regex::new(EMAIL_PATTERN).context("compile email pattern")?;
        Ok(Self {
            email_re,
            min_password_len: policy.min_length,
        })
    }

    /// Trim and lowercase, then check the shape.
    pub fn email(&self, raw: &str) -> Result<String, AppError> {
        let email = raw.trim().to_lowercase();
        if !self.email_re.is_match(&email) {
            return Err(AppError::bad_request("invalid email"));
        }
        Ok(email)
    }

    pub fn password(&self, plain: &str) -> Result<(), AppError> {
        let len = plain.chars().count();
        if len < self.min_password_len {
            return Err(AppError::bad_request(format!(
                "password must be at least {} characters",
                self.min_password_len
            )));
        }
        if len > MAX_PASSWORD_LEN {
            return Err(AppError::bad_request(format!(
                "password must be at most {MAX_PASSWORD_LEN} characters"
            )));
        }
        Ok(())
    }

    /// `normalized` and `slug` come from [`super::names`].
    pub fn full_name(&self, normalized: &str, slug: &str) -> Result<(), AppError> {
        if slug.is_empty() || normalized.chars().count() > MAX_FULL_NAME_LEN {
            return Err(AppError::bad_request("invalid full name"));
        }
        Ok(())
    }

    pub fn bio(&self, bio: &str) -> Result<(), AppError> {
        if bio.chars().count() > MAX_BIO_LEN {
            return Err(AppError::bad_request(format!(
                "bio must be at most {MAX_BIO_LEN} characters"
            )));
        }
        Ok(())
    }

    pub fn avatar_url(&self, url: &str) -> Result<(), AppError> {
        let has_scheme = url.starts_with("https://") || url.starts_with("http://");
        if !has_scheme || url.len() > MAX_AVATAR_URL_LEN {
            return Err(AppError::bad_request("invalid avatar url"));
        }
        Ok(())
    }
}
