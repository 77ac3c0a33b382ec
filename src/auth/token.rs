use chrono::{DateTime, Duration, Utc};
use data_encoding::BASE32_NOPAD;
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Random bytes behind each plaintext token.
const TOKEN_ENTROPY_BYTES: usize = 26;

/// Length of the base-32 (no padding) encoding of `TOKEN_ENTROPY_BYTES`.
pub const PLAINTEXT_LEN: usize = 42;

/// What a token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Activation,
    Authentication,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Activation => "activation",
            Scope::Authentication => "authentication",
        }
    }
}

/// A freshly minted token. The plaintext only ever leaves the process in a response or a mail.
#[derive(Debug, Clone, Serialize)]
pub struct AuthToken {
    #[serde(rename = "token")]
    pub plaintext: String,
    #[serde(skip)]
    pub hash: Vec<u8>,
    #[serde(skip)]
    pub user_id: i64,
    pub expiry: DateTime<Utc>,
    #[serde(skip)]
    pub scope: Scope,
}

impl AuthToken {
    pub fn generate(user_id: i64, ttl: Duration, scope: Scope) -> Self {
        let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let plaintext = BASE32_NOPAD.encode(&bytes);
        let hash = hash_plaintext(&plaintext);

        Self {
            plaintext,
            hash,
            user_id,
            expiry: Utc::now() + ttl,
            scope,
        }
    }
}

pub fn hash_plaintext(plaintext: &str) -> Vec<u8> {
    Sha256::digest(plaintext.as_bytes()).to_vec()
}

/// Fixed length, RFC 4648 base-32 alphabet only.
pub fn is_well_formed(plaintext: &str) -> bool {
    plaintext.len() == PLAINTEXT_LEN
        && plaintext
            .bytes()
            .all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b))
}
