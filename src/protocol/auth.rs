//! # Challenge-Response Authentication
//!
//! Nonce-based handshake for one connection. The server sends a one-time
//! nonce; the client answers with its username and a digest computed over
//! the *stored secret hash* and the nonce:
//!
//! ```text
//! stored hash = hex(sha256(password))
//! digest      = hex(sha256(stored_hash ++ nonce))
//! ```
//!
//! The raw secret never crosses the wire, and nonce uniqueness defeats
//! replay. The handshake runs exactly once per connection; on failure the
//! session is abandoned without retries.

use crate::backend::{CredentialStore, LogOutcome, SessionLabel, SessionLog};
use crate::core::wire;
use crate::error::{constants, Result};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Frame-size bound for usernames.
const MAX_USERNAME_LEN: usize = 256;

/// Frame-size bound for digests (hex sha256 is 64 bytes).
const MAX_DIGEST_LEN: usize = 128;

/// Hash a raw secret for storage. Credential stores hold this value, never
/// the password itself.
pub fn hash_secret(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Compute the handshake digest a client must answer with.
pub fn credential_digest(secret_hash: &str, nonce: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret_hash.as_bytes());
    hasher.update(nonce.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a connection-unique nonce as decimal digits.
fn generate_nonce() -> String {
    rand::random::<u64>().to_string()
}

/// Performs the handshake for one connection.
pub struct Authenticator<'a, C: CredentialStore + ?Sized> {
    store: &'a C,
}

impl<'a, C: CredentialStore + ?Sized> Authenticator<'a, C> {
    pub fn new(store: &'a C) -> Self {
        Self { store }
    }

    /// Run the challenge-response exchange.
    ///
    /// Returns the authenticated username, or `None` when the credentials
    /// were rejected (the status byte has already been sent either way).
    /// Transport failures surface as errors.
    pub async fn authenticate<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        log: &dyn SessionLog,
        label: &SessionLabel,
    ) -> Result<Option<String>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let nonce = generate_nonce();
        wire::write_nul_string(writer, &nonce).await?;
        writer.flush().await?;

        let username = wire::read_nul_string(reader, MAX_USERNAME_LEN).await?;
        let digest = wire::read_nul_string(reader, MAX_DIGEST_LEN).await?;

        let ok = self
            .store
            .secret_hash(&username)
            .map(|hash| credential_digest(&hash, &nonce) == digest)
            .unwrap_or(false);

        wire::write_status(writer, ok).await?;
        writer.flush().await?;

        if ok {
            Ok(Some(username))
        } else {
            if !username.is_empty() {
                log.event(
                    label,
                    &format!("LOGIN {username}"),
                    LogOutcome::Failed(constants::ERR_ACCESS_DENIED),
                );
            }
            Ok(None)
        }
    }
}

/// Client side of the handshake, for in-process clients and tests.
///
/// Reads the nonce frame, sends credentials, and returns whether the server
/// accepted them.
pub async fn client_handshake<R, W>(
    reader: &mut R,
    writer: &mut W,
    username: &str,
    password: &str,
) -> Result<bool>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let nonce = wire::read_nul_string(reader, 64).await?;
    let digest = credential_digest(&hash_secret(password), &nonce);

    wire::write_nul_string(writer, username).await?;
    wire::write_nul_string(writer, &digest).await?;
    writer.flush().await?;

    let mut status = [0u8; 1];
    tokio::io::AsyncReadExt::read_exact(reader, &mut status).await?;
    Ok(status[0] == wire::STATUS_OK)
}
