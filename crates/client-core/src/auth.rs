use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

// Internal Result type alias
type Result<T> = crate::ClientResult<T>;
use russh::{
    client::{self, AuthResult},
    keys::{self, HashAlg, PrivateKeyWithHashAlg},
};
use secrecy::{ExposeSecret, SecretString};
use ssh_core::session::SessionHandle;
use tokio::fs;
use tracing::{debug, info, warn};

/// One way of proving our identity, tried in the order configured.
#[derive(Clone)]
pub(crate) enum AuthMethod {
    Password(SecretString),
    Identity {
        path: PathBuf,
        passphrase: Option<SecretString>,
    },
}

impl AuthMethod {
    fn label(&self) -> &'static str {
        match self {
            AuthMethod::Password(_) => "password",
            AuthMethod::Identity { .. } => "publickey",
        }
    }

    async fn authenticate<H>(&self, session: &mut SessionHandle<H>, username: &str, rsa_hint: Option<HashAlg>) -> Result<AuthResult>
    where
        H: client::Handler + Send,
    {
        match self {
            AuthMethod::Password(password) => session
                .authenticate_password(username.to_string(), password.expose_secret().to_string())
                .await
                .map_err(Into::into),
            AuthMethod::Identity { path, passphrase } => {
                let key = Arc::new(load_private_key(path, passphrase.as_ref()).await?);
                debug!(key = ?key.algorithm(), path = %path.display(), "attempting public-key auth");
                let hash_alg = if key.algorithm().is_rsa() { rsa_hint } else { None };
                session
                    .authenticate_publickey(username.to_string(), PrivateKeyWithHashAlg::new(key, hash_alg))
                    .await
                    .map_err(Into::into)
            }
        }
    }
}

/// Authenticate as `username` with each method in turn; `none` when there are none.
pub(crate) async fn authenticate<H>(session: &mut SessionHandle<H>, username: &str, methods: &[AuthMethod]) -> Result<()>
where
    H: client::Handler + Send,
{
    if methods.is_empty() {
        return match session.authenticate_none(username.to_string()).await? {
            AuthResult::Success => {
                info!(method = "none", "authentication succeeded");
                Ok(())
            }
            AuthResult::Failure { .. } => Err(crate::ClientError::AuthFailed(
                "server requires authentication; supply a password or identity".to_string(),
            )),
        };
    }

    let rsa_hash_hint = session.best_supported_rsa_hash().await.unwrap_or(None).flatten();

    for method in methods {
        let label = method.label();
        match method.authenticate(session, username, rsa_hash_hint).await {
            Ok(AuthResult::Success) => {
                info!(method = label, "authentication succeeded");
                return Ok(());
            }
            Ok(AuthResult::Failure { .. }) => {
                warn!(method = label, "authentication rejected by server");
            }
            Err(err) => {
                warn!(method = label, error = %err, "authentication attempt failed");
            }
        }
    }

    Err(crate::ClientError::AuthFailed(
        "all authentication methods were rejected by the server".to_string(),
    ))
}

async fn load_private_key(path: &Path, passphrase: Option<&SecretString>) -> Result<keys::PrivateKey> {
    let data = fs::read_to_string(path).await?;
    keys::decode_secret_key(&data, passphrase.map(|secret| secret.expose_secret())).map_err(|err| match err {
        keys::Error::KeyIsEncrypted => crate::ClientError::Crypto(format!(
            "{} is encrypted; supply its passphrase",
            path.display()
        )),
        other => crate::ClientError::Crypto(format!("failed to load {}: {other}", path.display())),
    })
}
