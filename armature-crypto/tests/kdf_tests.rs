use armature_crypto::{
    derive_subkey, derive_subkey_with_context, hash_password, verify_password, KdfParams,
};

#[test]
fn subkeys_are_deterministic() {
    let a = derive_subkey(b"master", "transport");
    let b = derive_subkey(b"master", "transport");
    assert_eq!(a.as_bytes(), b.as_bytes());
}

#[test]
fn labels_partition_the_key_space() {
    let transport = derive_subkey(b"master", "transport");
    let vault = derive_subkey(b"master", "vault");
    assert_ne!(transport.as_bytes(), vault.as_bytes());
}

#[test]
fn context_partitions_the_key_space() {
    let a = derive_subkey_with_context(b"master", "server-key-at-rest", b"user-1");
    let b = derive_subkey_with_context(b"master", "server-key-at-rest", b"user-2");
    assert_ne!(a.as_bytes(), b.as_bytes());
}

#[test]
fn context_is_not_confusable_with_the_label() {
    // "ab" + "c" must not derive the same key as "a" + "bc".
    let a = derive_subkey_with_context(b"master", "ab", b"c");
    let b = derive_subkey_with_context(b"master", "a", b"bc");
    assert_ne!(a.as_bytes(), b.as_bytes());
}

#[test]
fn password_hash_verifies_the_original_only() {
    let params = KdfParams::fast();
    let hash = hash_password(b"0123456789", &params).unwrap();
    assert!(hash.starts_with("$argon2id$"));
    assert!(verify_password(b"0123456789", &hash).unwrap());
    assert!(!verify_password(b"0123456780", &hash).unwrap());
}

#[test]
fn password_hashes_are_salted() {
    let params = KdfParams::fast();
    let one = hash_password(b"0123456789", &params).unwrap();
    let two = hash_password(b"0123456789", &params).unwrap();
    assert_ne!(one, two);
}

#[test]
fn malformed_stored_hash_is_an_error() {
    assert!(verify_password(b"puk", "not a phc string").is_err());
}
