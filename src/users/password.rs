use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use tracing::{error, warn};

use crate::config::HashingConfig;

use super::repo_types::PasswordHistoryEntry;

/// Candidate password matched an entry of the user's password history.
#[derive(Debug, thiserror::Error)]
#[error("password matches a previously used password")]
pub struct PasswordReused;

/// Argon2id hashing with process-wide fixed cost parameters.
#[derive(Clone)]
pub struct CredentialManager {
    argon2: Argon2<'static>,
}

impl CredentialManager {
    pub fn new(cfg: &HashingConfig) -> anyhow::Result<Self> {
        let params = Params::new(cfg.memory_kib, cfg.iterations, cfg.parallelism, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 parameters: {e}"))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    pub fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// `false` on mismatch and on a hash that does not parse.
    pub fn verify(&self, hash: &str, plain: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "argon2 parse hash error");
                return false;
            }
        };
        self.argon2
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok()
    }

    /// Checks `candidate` against every history entry, stopping at the first match.
    pub fn ensure_not_reused(
        &self,
        candidate: &str,
        history: &[PasswordHistoryEntry],
    ) -> Result<(), PasswordReused> {
        if history
            .iter()
            .any(|entry| self.verify(&entry.password_hash, candidate))
        {
            return Err(PasswordReused);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_manager() -> CredentialManager {
    // Cheapest parameters argon2 accepts; keeps the test suite fast.
    CredentialManager::new(&HashingConfig {
        memory_kib: Params::MIN_M_COST,
        iterations: Params::MIN_T_COST,
        parallelism: Params::MIN_P_COST,
    })
    .expect("test argon2 params")
}
