use std::sync::Arc;

use argon2::{
    Algorithm, Argon2, ParamsBuilder, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::SaltString,
};
use rand::RngCore;

use crate::auth::{AuthError, AuthResult};

const SALT_LEN: usize = 16;

#[derive(Clone)]
pub struct PasswordService {
    argon2: Argon2<'static>,
}

impl PasswordService {
    pub fn new() -> AuthResult<Self> {
        let mut builder = ParamsBuilder::new();
        builder.m_cost(19 * 1024); // 19 MiB
        builder.t_cost(2);
        builder.p_cost(1);
        let params = builder.build().map_err(AuthError::from)?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        Ok(Self { argon2 })
    }

    pub fn hash_password(&self, password: &str) -> AuthResult<String> {
        if password.is_empty() {
            return Err(AuthError::PasswordHash(
                "cannot hash an empty password".into(),
            ));
        }

        let mut salt_bytes = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes).map_err(AuthError::from)?;
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(AuthError::from)?
            .to_string();
        Ok(hash)
    }

    /// Verify a candidate against a stored PHC string. Mismatch is `Ok(false)`,
    /// never an error; argon2 recomputes the full digest before comparing, so
    /// timing does not reveal where a mismatch occurred.
    pub fn verify_password(&self, password: &str, encoded: &str) -> AuthResult<bool> {
        let parsed = PasswordHash::new(encoded)?;
        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(err) => Err(AuthError::from(err)),
        }
    }
}

/// Run the deliberately expensive hash on the blocking pool so it cannot
/// stall unrelated requests on the async workers.
pub async fn hash_on_worker(service: Arc<PasswordService>, password: String) -> AuthResult<String> {
    tokio::task::spawn_blocking(move || service.hash_password(&password))
        .await
        .map_err(|err| AuthError::Other(format!("hashing task failed: {err}")))?
}

/// Off-thread counterpart of [`PasswordService::verify_password`].
pub async fn verify_on_worker(
    service: Arc<PasswordService>,
    password: String,
    encoded: String,
) -> AuthResult<bool> {
    tokio::task::spawn_blocking(move || service.verify_password(&password, &encoded))
        .await
        .map_err(|err| AuthError::Other(format!("verification task failed: {err}")))?
}
