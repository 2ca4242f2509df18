use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Shared HMAC secret. Wiped from memory on drop; never printed.
#[derive(Clone)]
pub struct SigningSecret(Arc<Zeroizing<Vec<u8>>>);

impl SigningSecret {
    pub fn new(secret: &str) -> Self {
        Self(Arc::new(Zeroizing::new(secret.as_bytes().to_vec())))
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningSecret").finish_non_exhaustive()
    }
}

/// Verify a webhook signature (`X-Signature: sha256=<hex>`).
///
/// The MAC covers `timestamp + "." + payload`, so a replayed body cannot be
/// re-stamped with a fresh timestamp. Comparison is constant-time.
pub fn verify(
    secret: &SigningSecret,
    timestamp: &str,
    payload: &[u8],
    signature_header: &str,
) -> bool {
    let Some(provided) = signature_header.strip_prefix(SIGNATURE_PREFIX) else {
        tracing::warn!(
            signature = %preview(signature_header),
            "signature header missing sha256= prefix"
        );
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    let matches = bool::from(expected.as_bytes().ct_eq(provided.as_bytes()));
    if !matches {
        // Truncated previews only — the full signature never reaches the log.
        tracing::warn!(
            provided = %preview(provided),
            expected = %preview(&expected),
            "webhook signature mismatch"
        );
    }
    matches
}

fn preview(signature: &str) -> String {
    if signature.len() <= 10 {
        return "<short>".into();
    }
    format!("{}..{}", &signature[..6], &signature[signature.len() - 4..])
}
