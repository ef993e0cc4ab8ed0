use armature_crypto::{
    compute_signature, compute_token_digest, counter_material_v2, derive_factor_keys,
    normalize_signature_data, signatures_match, EcKeyPair, OFFLINE_APPLICATION_SECRET,
};
use armature_types::SignatureFactor;

fn shared_secret() -> armature_crypto::SharedSecret {
    let device = EcKeyPair::generate();
    let server = EcKeyPair::generate();
    server.ecdh(&device.public_bytes()).unwrap()
}

#[test]
fn signature_has_one_component_per_factor() {
    let master = shared_secret();
    let material = counter_material_v2(0);

    for (factor, components) in [
        (SignatureFactor::Possession, 1),
        (SignatureFactor::PossessionKnowledge, 2),
        (SignatureFactor::PossessionKnowledgeBiometry, 3),
    ] {
        let keys = derive_factor_keys(&master, factor);
        let signature = compute_signature(&keys, b"data", &material);
        let groups: Vec<&str> = signature.split('-').collect();
        assert_eq!(groups.len(), components);
        for group in groups {
            assert_eq!(group.len(), 8);
            assert!(group.bytes().all(|b| b.is_ascii_digit()));
        }
    }
}

#[test]
fn signature_is_deterministic() {
    let master = shared_secret();
    let keys = derive_factor_keys(&master, SignatureFactor::PossessionKnowledge);
    let material = counter_material_v2(7);
    assert_eq!(
        compute_signature(&keys, b"data", &material),
        compute_signature(&keys, b"data", &material)
    );
}

#[test]
fn signature_depends_on_counter_data_and_factor() {
    let master = shared_secret();
    let keys = derive_factor_keys(&master, SignatureFactor::PossessionKnowledge);
    let baseline = compute_signature(&keys, b"data", &counter_material_v2(0));

    assert_ne!(
        baseline,
        compute_signature(&keys, b"data", &counter_material_v2(1))
    );
    assert_ne!(
        baseline,
        compute_signature(&keys, b"other", &counter_material_v2(0))
    );

    let other_keys = derive_factor_keys(&master, SignatureFactor::PossessionBiometry);
    assert_ne!(
        baseline,
        compute_signature(&other_keys, b"data", &counter_material_v2(0))
    );
}

#[test]
fn both_key_agreement_directions_sign_identically() {
    let device = EcKeyPair::generate();
    let server = EcKeyPair::generate();
    let device_side = device.ecdh(&server.public_bytes()).unwrap();
    let server_side = server.ecdh(&device.public_bytes()).unwrap();

    let material = counter_material_v2(3);
    let device_keys = derive_factor_keys(&device_side, SignatureFactor::PossessionKnowledge);
    let server_keys = derive_factor_keys(&server_side, SignatureFactor::PossessionKnowledge);
    assert_eq!(
        compute_signature(&device_keys, b"data", &material),
        compute_signature(&server_keys, b"data", &material)
    );
}

#[test]
fn signatures_match_rejects_length_mismatch() {
    assert!(signatures_match("12345678", "12345678"));
    assert!(!signatures_match("12345678", "12345679"));
    assert!(!signatures_match("12345678", "1234567"));
}

#[test]
fn normalized_data_separates_parts() {
    let data = normalize_signature_data("POST", "/pa/signature", b"nonce", b"{}", "secret");
    let text = String::from_utf8(data).unwrap();
    assert_eq!(text.split('&').count(), 5);
    assert!(text.starts_with("POST&"));
    assert!(text.ends_with("&secret"));

    let offline = normalize_signature_data(
        "POST",
        "/pa/signature",
        b"nonce",
        b"{}",
        OFFLINE_APPLICATION_SECRET,
    );
    assert!(String::from_utf8(offline).unwrap().ends_with("&offline"));
}

#[test]
fn token_digest_is_deterministic_and_keyed() {
    let digest = compute_token_digest(b"secret", b"nonce", 1_700_000_000);
    assert_eq!(digest, compute_token_digest(b"secret", b"nonce", 1_700_000_000));
    assert_ne!(digest, compute_token_digest(b"secret", b"nonce", 1_700_000_001));
    assert_ne!(digest, compute_token_digest(b"other", b"nonce", 1_700_000_000));
}
