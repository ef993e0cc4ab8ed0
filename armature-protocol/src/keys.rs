//! Activation key handling: at-rest wrapping of server private keys and
//! derivation of the per-activation master secret and transport key.

use armature_crypto::{
    decrypt, derive_subkey, derive_subkey_with_context, encrypt, DerivedKey, EcKeyPair,
    EncryptedData, SharedSecret, NONCE_SIZE,
};
use armature_model::{Activation, KeyEncryptionMode};
use armature_types::{ActivationId, UserId};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::config::ProtocolConfig;
use crate::error::{ProtocolError, ProtocolResult};

const AT_REST_LABEL: &str = "server-key-at-rest";
const TRANSPORT_LABEL: &str = "transport";
const VAULT_LABEL: &str = "vault";

/// Wraps and unwraps server private keys and derives activation-scoped
/// keys. Stateless apart from the configured master storage key.
pub(crate) struct KeyProvider {
    storage_key: Option<DerivedKey>,
}

impl KeyProvider {
    pub fn from_config(config: &ProtocolConfig) -> ProtocolResult<Self> {
        let storage_key = match &config.master_storage_key {
            None => None,
            Some(encoded) => {
                let bytes = BASE64.decode(encoded).map_err(|e| {
                    ProtocolError::Configuration(format!("invalid master storage key: {e}"))
                })?;
                let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
                    ProtocolError::Configuration(
                        "master storage key must be 32 bytes".to_string(),
                    )
                })?;
                Some(DerivedKey::from_bytes(bytes))
            }
        };
        Ok(Self { storage_key })
    }

    /// Per-record wrap key, personalized by owner and activation so a
    /// leaked row cannot be unwrapped against another record.
    fn record_key(&self, user_id: &UserId, activation_id: &ActivationId) -> Option<DerivedKey> {
        self.storage_key.as_ref().map(|key| {
            let mut context = Vec::new();
            context.extend_from_slice(user_id.as_str().as_bytes());
            context.push(0x00);
            context.extend_from_slice(activation_id.to_string().as_bytes());
            derive_subkey_with_context(key.as_bytes(), AT_REST_LABEL, &context)
        })
    }

    /// Wraps a freshly generated server private key for storage.
    pub fn wrap_server_private(
        &self,
        secret: &[u8; 32],
        user_id: &UserId,
        activation_id: &ActivationId,
    ) -> ProtocolResult<(Vec<u8>, KeyEncryptionMode)> {
        match self.record_key(user_id, activation_id) {
            None => Ok((secret.to_vec(), KeyEncryptionMode::Plain)),
            Some(key) => {
                let sealed = encrypt(&key, secret)?;
                let mut bytes = Vec::with_capacity(sealed.len());
                bytes.extend_from_slice(&sealed.nonce);
                bytes.extend_from_slice(&sealed.ciphertext);
                Ok((bytes, KeyEncryptionMode::Encrypted))
            }
        }
    }

    /// Recovers the server key pair from an activation row.
    pub fn unwrap_server_private(&self, activation: &Activation) -> ProtocolResult<EcKeyPair> {
        let secret = match activation.server_key_encryption {
            KeyEncryptionMode::Plain => activation.server_private_key.clone(),
            KeyEncryptionMode::Encrypted => {
                let key = self
                    .record_key(&activation.user_id, &activation.id)
                    .ok_or_else(|| {
                        ProtocolError::Configuration(
                            "activation requires a master storage key".to_string(),
                        )
                    })?;
                let stored = &activation.server_private_key;
                if stored.len() <= NONCE_SIZE {
                    return Err(ProtocolError::Crypto(
                        armature_crypto::CryptoError::Decryption(
                            "stored key too short".to_string(),
                        ),
                    ));
                }
                let mut nonce = [0u8; NONCE_SIZE];
                nonce.copy_from_slice(&stored[..NONCE_SIZE]);
                let sealed = EncryptedData {
                    nonce,
                    ciphertext: stored[NONCE_SIZE..].to_vec(),
                };
                decrypt(&key, &sealed)?
            }
        };
        Ok(EcKeyPair::from_secret_bytes(&secret)?)
    }

    /// ECDH master secret of the activation.
    pub fn master_secret(&self, activation: &Activation) -> ProtocolResult<SharedSecret> {
        let device_public = activation.device_public_key.as_deref().ok_or_else(|| {
            ProtocolError::InvalidState("activation has no device public key".to_string())
        })?;
        let server = self.unwrap_server_private(activation)?;
        Ok(server.ecdh(device_public)?)
    }

    /// Transport key for status blobs and sealed payloads.
    pub fn transport_key(&self, activation: &Activation) -> ProtocolResult<DerivedKey> {
        let master = self.master_secret(activation)?;
        Ok(derive_subkey(master.as_bytes(), TRANSPORT_LABEL))
    }

    /// Vault subkey released on a successful vault unlock.
    pub fn vault_key(&self, master: &SharedSecret) -> DerivedKey {
        derive_subkey(master.as_bytes(), VAULT_LABEL)
    }
}
