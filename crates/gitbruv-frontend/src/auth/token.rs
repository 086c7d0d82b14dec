use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

const PAT_PREFIX: &str = "gbv_";
const TOKEN_BYTES: usize = 32;

/// Returns a fresh personal access token and the hash to store for it.
pub fn generate_pat() -> (String, String) {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);

    let token = format!("{}{}", PAT_PREFIX, URL_SAFE_NO_PAD.encode(bytes));
    let hash = hash_token(&token);

    (token, hash)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn is_valid_pat_format(token: &str) -> bool {
    let Some(encoded) = token.strip_prefix(PAT_PREFIX) else {
        return false;
    };
    URL_SAFE_NO_PAD
        .decode(encoded)
        .map(|decoded| decoded.len() == TOKEN_BYTES)
        .unwrap_or(false)
}
