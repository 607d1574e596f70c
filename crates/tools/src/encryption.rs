//! Credential and secret-parameter encryption.
//!
//! Stored provider credentials and secret-typed tool parameters are kept
//! as `base64(nonce || ciphertext)` under AES-256-GCM. Keys are derived
//! from the tenant plus a scope string, so secrets encrypted for one
//! tool configuration cannot be decrypted under another even when the
//! parameter names collide.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::ToolError;

/// Scope for secret-parameter encryption: which configuration a secret
/// belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigIdentity {
    /// An agent app's tool configuration.
    Agent { tenant_id: String, app_id: String },
    /// A workflow node's tool configuration.
    Workflow {
        tenant_id: String,
        app_id: String,
        node_id: String,
    },
}

impl ConfigIdentity {
    /// The scope string fed into key derivation.
    pub fn scope(&self) -> String {
        match self {
            Self::Agent { tenant_id, app_id } => format!("agent:{tenant_id}:{app_id}"),
            Self::Workflow {
                tenant_id,
                app_id,
                node_id,
            } => format!("workflow:{tenant_id}:{app_id}:{node_id}"),
        }
    }
}

fn derive_key(tenant_id: &str, scope: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"skein-tool-secrets-v1");
    hasher.update(tenant_id.as_bytes());
    hasher.update(b":");
    hasher.update(scope.as_bytes());
    hasher.finalize().into()
}

fn cipher(tenant_id: &str, scope: &str) -> Aes256Gcm {
    let key = derive_key(tenant_id, scope);
    // 32-byte key is always valid for AES-256.
    Aes256Gcm::new_from_slice(&key).unwrap_or_else(|_| unreachable!())
}

/// Encrypt a secret. Returns `base64(nonce || ciphertext)`.
pub fn encrypt_secret(tenant_id: &str, scope: &str, plaintext: &str) -> Result<String, ToolError> {
    let nonce_bytes: [u8; 12] = rand::random();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher(tenant_id, scope)
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| ToolError::CredentialValidation(format!("encryption failed: {e}")))?;

    let mut combined = Vec::with_capacity(12 + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
}

/// Decrypt a `base64(nonce || ciphertext)` secret.
pub fn decrypt_secret(tenant_id: &str, scope: &str, encoded: &str) -> Result<String, ToolError> {
    let combined = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| ToolError::CredentialValidation(format!("base64 decode failed: {e}")))?;

    if combined.len() < 13 {
        return Err(ToolError::CredentialValidation(
            "encrypted value too short".into(),
        ));
    }

    let (nonce_bytes, ciphertext) = combined.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher(tenant_id, scope)
        .decrypt(nonce, ciphertext)
        .map_err(|_| ToolError::CredentialValidation("decryption failed".into()))?;

    String::from_utf8(plaintext)
        .map_err(|e| ToolError::CredentialValidation(format!("utf-8 decode failed: {e}")))
}

/// Mask a credential for anything that leaves the tool layer. Short
/// values are fully masked; longer ones keep two characters at each end.
pub fn mask_credential(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 6 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - 4))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_under_same_scope() {
        let encrypted = encrypt_secret("t1", "agent:t1:app1", "sk-secret").unwrap();
        assert_ne!(encrypted, "sk-secret");
        let decrypted = decrypt_secret("t1", "agent:t1:app1", &encrypted).unwrap();
        assert_eq!(decrypted, "sk-secret");
    }

    #[test]
    fn different_scope_cannot_decrypt() {
        let encrypted = encrypt_secret("t1", "agent:t1:app1", "sk-secret").unwrap();
        assert!(decrypt_secret("t1", "agent:t1:app2", &encrypted).is_err());
        assert!(decrypt_secret("t2", "agent:t1:app1", &encrypted).is_err());
    }

    #[test]
    fn identity_scopes_are_distinct() {
        let agent = ConfigIdentity::Agent {
            tenant_id: "t".into(),
            app_id: "a".into(),
        };
        let node = ConfigIdentity::Workflow {
            tenant_id: "t".into(),
            app_id: "a".into(),
            node_id: "n".into(),
        };
        assert_ne!(agent.scope(), node.scope());
    }

    #[test]
    fn masking_reveals_only_edges() {
        assert_eq!(mask_credential("short"), "*****");
        assert_eq!(mask_credential("sk-abcdef123"), "sk********23");
    }
}
