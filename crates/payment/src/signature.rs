//! Callback signature verification.

use sha2::{Digest, Sha256};

use crate::CallbackRequest;

/// Checks that a callback really came from the channel.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, callback: &CallbackRequest) -> bool;
}

/// Trusts every callback. Sandbox only.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllVerifier;

impl SignatureVerifier for AcceptAllVerifier {
    fn verify(&self, _callback: &CallbackRequest) -> bool {
        true
    }
}

/// Shared-secret signature: `hex(sha256(canonical || key))`, where the
/// canonical form is every field as `k=v`, sorted by key, joined by `&`.
#[derive(Debug, Clone)]
pub struct Sha256Verifier {
    key: String,
}

impl Sha256Verifier {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn sign(&self, callback: &CallbackRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(canonical(callback).as_bytes());
        hasher.update(self.key.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl SignatureVerifier for Sha256Verifier {
    fn verify(&self, callback: &CallbackRequest) -> bool {
        !callback.signature.is_empty() && self.sign(callback).eq_ignore_ascii_case(&callback.signature)
    }
}

fn canonical(callback: &CallbackRequest) -> String {
    let mut pairs: Vec<(&str, &str)> = vec![
        ("amount", callback.amount.as_str()),
        ("channel", callback.channel.as_str()),
        ("payment_no", callback.payment_no.as_str()),
        ("status", callback.status.as_str()),
        ("trade_no", callback.trade_no.as_str()),
    ];
    pairs.extend(
        callback
            .extras
            .iter()
            .filter(|(k, _)| k.as_str() != "sign" && k.as_str() != "signature")
            .map(|(k, v)| (k.as_str(), v.as_str())),
    );
    pairs.sort_unstable();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}
