//! EC key import against fixed PEM fixtures.

use std::sync::{Arc, OnceLock};

use sealkit_crypto::{Curve, Drbg, EcError, EcKeyContext, EntropyPool, ErrorKind};
use sha2::{Digest, Sha256};

const P256_SEC1: &str = include_str!("fixtures/p256_sec1.pem");
const P256_PKCS8: &str = include_str!("fixtures/p256_pkcs8.pem");
const P384_SEC1: &str = include_str!("fixtures/p384_sec1.pem");
const K256_SEC1: &str = include_str!("fixtures/k256_sec1.pem");
const SERVER_CERT: &str = include_str!("fixtures/server.pem");

const P256_PUBLIC: &str = "035A26E9E1E08D0C0C504C8E967D99911DDF914237F4E63ABE13365DDE3BE22C11";
const P256_PRIVATE: &str = "75F052E302C30D3C23426E6331EC7280D1B3A275BD9F7E33FDD0DA955C89784A";

fn drbg() -> Arc<Drbg> {
    static POOL: OnceLock<Arc<EntropyPool>> = OnceLock::new();
    let pool = POOL.get_or_init(|| Arc::new(EntropyPool::new()));
    Arc::new(Drbg::new(pool, Some(b"ec-fixtures".as_slice())).unwrap())
}

#[test]
fn test_load_p256_sec1() {
    let mut ctx = EcKeyContext::new();
    ctx.load_pem(P256_SEC1).unwrap();
    assert_eq!(ctx.curve(), Some(Curve::Secp256r1));
    assert_eq!(ctx.public_key().unwrap(), P256_PUBLIC);
    assert_eq!(ctx.private_key().unwrap(), P256_PRIVATE);
}

#[test]
fn test_sec1_and_pkcs8_agree() {
    let mut sec1 = EcKeyContext::new();
    let mut pkcs8 = EcKeyContext::new();
    sec1.load_pem(P256_SEC1).unwrap();
    pkcs8.load_pem(P256_PKCS8).unwrap();
    assert_eq!(sec1.public_key().unwrap(), pkcs8.public_key().unwrap());
    assert_eq!(sec1.private_key().unwrap(), pkcs8.private_key().unwrap());
}

#[test]
fn test_load_detects_curve() {
    let mut ctx = EcKeyContext::new();

    ctx.load_pem(P384_SEC1).unwrap();
    assert_eq!(ctx.curve(), Some(Curve::Secp384r1));
    assert_eq!(
        ctx.public_key().unwrap(),
        "02BDEBF437A71504F42BDE0FD872EEC3013720A1716F46060B8E6681B6A759DC48A0F008AC328D5D6EF899F2A9B269409C"
    );

    ctx.load_pem(K256_SEC1).unwrap();
    assert_eq!(ctx.curve(), Some(Curve::Secp256k1));
    assert_eq!(
        ctx.public_key().unwrap(),
        "02707FC70023781D8B2A8D189328159A7DAEEC6F71C47BDC9C2F2DFA03708CC0B2"
    );
    assert_eq!(
        ctx.private_key().unwrap(),
        "7A254D804DA0067A8938867F6DA7C3D627C7A54DA3CDE4976DC0FC4F279AC66E"
    );
}

#[test]
fn test_certificate_is_not_a_key() {
    let mut ctx = EcKeyContext::new();
    let err = ctx.load_pem(SERVER_CERT).unwrap_err();
    assert!(matches!(err, EcError::KeyParse(_)));
    assert_eq!(sealkit_crypto::Error::from(err).kind(), ErrorKind::KeyParseFailure);
    assert!(!ctx.is_populated());
}

#[test]
fn test_sign_with_loaded_key_and_drbg() {
    let rng = drbg();
    let mut ctx = EcKeyContext::new();
    ctx.load_pem(P256_SEC1).unwrap();

    let digest = Sha256::digest(b"sealkit fixture");
    let a = ctx.sign(&digest, rng.as_ref()).unwrap();
    let b = ctx.sign(&digest, rng.as_ref()).unwrap();
    assert!(ctx.verify(&digest, &a).unwrap());
    assert!(ctx.verify(&digest, &b).unwrap());
    // Hedged signatures differ between calls.
    assert_ne!(a, b);
}

#[test]
fn test_verify_external_signature() {
    // Produced by OpenSSL over SHA-256("sealkit fixture") with the P-256 fixture key.
    let signature = "30440220364FDE9B463749DE1CE3FFB9EBBAF4B0049964DCBFD852043B45A93E09CA1174\
                     022074074E9B19055F22CF6725237A02A6264295709FB7F4A5DF1CBDA56DB629BC2F";
    let mut ctx = EcKeyContext::new();
    ctx.load_pem(P256_SEC1).unwrap();

    let digest = Sha256::digest(b"sealkit fixture");
    assert!(ctx.verify(&digest, signature).unwrap());
    assert!(!ctx.verify(&Sha256::digest(b"tampered"), signature).unwrap());
}

#[test]
fn test_generated_key_round_trips_through_export() {
    let rng = drbg();
    for curve in Curve::ALL {
        let mut ctx = EcKeyContext::new();
        ctx.generate_key(curve, rng.as_ref()).unwrap();
        let public = ctx.public_key().unwrap();
        let private = ctx.private_key().unwrap();

        assert_eq!(private.len(), curve.field_size() * 2);
        assert!(public.starts_with("02") || public.starts_with("03"));
        assert!(public.chars().chain(private.chars()).all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }
}
