//! Shared fixture: an engine over the in-memory store plus a simulated
//! client device that runs the real provisioning exchange and signs
//! requests exactly the way a production client would.

#![allow(dead_code)]

use armature_crypto::{
    compute_signature, derive_factor_keys, derive_subkey, next_ctr_data, DerivedKey, EcKeyPair,
    KdfParams, SharedSecret, CTR_DATA_SIZE,
};
use armature_model::Application;
use armature_protocol::{
    CallbackMessage, CallbackSender, DeviceProvisioningPayload, Engine, InitActivationRequest,
    PrepareActivationRequest, ProtocolConfig, ServerProvisioningPayload, Stores,
};
use armature_store::MemoryStore;
use armature_types::{ActivationId, SignatureFactor};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

pub struct TestEnv {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
    pub application: Application,
    pub callbacks: UnboundedReceiver<CallbackMessage>,
}

pub fn test_config() -> ProtocolConfig {
    ProtocolConfig {
        signature_lookahead: 5,
        puk_kdf: KdfParams::fast(),
        ..ProtocolConfig::default()
    }
}

pub async fn setup() -> TestEnv {
    setup_with_config(test_config()).await
}

pub async fn setup_with_config(config: ProtocolConfig) -> TestEnv {
    let (stores, store) = Stores::in_memory();
    let (callbacks, rx) = CallbackSender::channel();
    let engine = Engine::new(config, stores, callbacks).expect("engine config is valid");
    let application = engine
        .register_application("test-app")
        .await
        .expect("application registration");
    TestEnv {
        engine,
        store,
        application,
        callbacks: rx,
    }
}

/// Drains all currently queued callback messages.
pub fn drain_callbacks(env: &mut TestEnv) -> Vec<CallbackMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = env.callbacks.try_recv() {
        messages.push(message);
    }
    messages
}

/// A simulated client device holding the key material and counter state
/// a real client would keep after provisioning.
pub struct Device {
    pub activation_id: ActivationId,
    master: SharedSecret,
    ctr_data: [u8; CTR_DATA_SIZE],
}

impl Device {
    /// Runs init → prepare → commit and returns the provisioned device.
    pub async fn activate(env: &TestEnv, user_id: &str) -> Device {
        let device = Self::provision(env, user_id).await;
        env.engine
            .activations
            .commit_activation(&device.activation_id)
            .await
            .expect("commit");
        device
    }

    /// Runs init → prepare, leaving the activation in OTP_USED.
    pub async fn provision(env: &TestEnv, user_id: &str) -> Device {
        let init = env
            .engine
            .activations
            .init_activation(InitActivationRequest {
                application_id: env.application.id,
                user_id: user_id.into(),
                max_failed_attempts: None,
                expires_at: None,
            })
            .await
            .expect("init");

        let keypair = EcKeyPair::generate();
        let payload = DeviceProvisioningPayload {
            device_public_key: BASE64.encode(keypair.public_bytes()),
            device_name: Some("test device".to_string()),
            platform: Some("linux".to_string()),
        };
        let (envelope, response_key) = armature_crypto::seal(
            &env.application.master_encryption_public_key,
            env.application.application_secret.as_bytes(),
            &serde_json::to_vec(&payload).expect("payload serializes"),
        )
        .expect("seal");

        let prepared = env
            .engine
            .activations
            .prepare_activation(PrepareActivationRequest {
                application_key: env.application.application_key.clone(),
                activation_code: init.activation_code.clone(),
                envelope,
            })
            .await
            .expect("prepare");

        let plaintext = armature_crypto::decrypt(&response_key, &prepared.encrypted_payload)
            .expect("response decrypts");
        let server: ServerProvisioningPayload =
            serde_json::from_slice(&plaintext).expect("response parses");
        let server_public = BASE64.decode(server.server_public_key).expect("key decodes");
        let ctr_data: [u8; CTR_DATA_SIZE] = BASE64
            .decode(server.ctr_data)
            .expect("seed decodes")
            .try_into()
            .expect("seed is 16 bytes");

        let master = keypair.ecdh(&server_public).expect("agreement");
        Device {
            activation_id: init.activation_id,
            master,
            ctr_data,
        }
    }

    /// Signs data at the current counter position and advances the
    /// local hash chain, like a client that believes the request will
    /// arrive.
    pub fn sign(&mut self, data: &[u8], factor: SignatureFactor) -> String {
        let keys = derive_factor_keys(&self.master, factor);
        let signature = compute_signature(&keys, data, &self.ctr_data);
        self.advance(1);
        signature
    }

    /// Advances the local hash chain without signing (simulates
    /// requests lost on the way to the server).
    pub fn advance(&mut self, steps: u32) {
        for _ in 0..steps {
            self.ctr_data = next_ctr_data(&self.ctr_data);
        }
    }

    /// Transport key as the client derives it.
    pub fn transport_key(&self) -> DerivedKey {
        derive_subkey(self.master.as_bytes(), "transport")
    }

    /// Vault key as the client derives it after a vault unlock.
    pub fn vault_key(&self) -> DerivedKey {
        derive_subkey(self.master.as_bytes(), "vault")
    }
}
