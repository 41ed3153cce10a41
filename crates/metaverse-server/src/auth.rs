use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use metaverse_core::UserId;

use crate::oracle::IdentityOracle;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("token is not a three-part JWT")]
    Malformed,
    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("token signature does not match")]
    BadSignature,
    #[error("token carries no userId claim")]
    MissingUserId,
    #[error("token expired")]
    Expired,
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

/// Claims the user service puts into its tokens. Unknown claims (role, iat)
/// are ignored.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Claims {
    #[serde(default)]
    user_id: Option<String>,
    /// Expiry in seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<u64>,
}

/// Resolves HS256 JSON Web Tokens signed with a shared secret.
#[derive(Clone)]
pub struct JwtIdentity {
    secret: Vec<u8>,
}

impl JwtIdentity {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, IdentityError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| IdentityError::BadSignature)
    }

    /// Sign a token for `user_id`, optionally expiring at `exp` (Unix seconds).
    pub fn issue(&self, user_id: &str, exp: Option<u64>) -> Result<String, IdentityError> {
        let header = Header {
            alg: "HS256".to_string(),
            typ: Some("JWT".to_string()),
        };
        let claims = Claims {
            user_id: Some(user_id.to_string()),
            exp,
        };
        let header_json = serde_json::to_vec(&header).map_err(|_| IdentityError::Malformed)?;
        let claims_json = serde_json::to_vec(&claims).map_err(|_| IdentityError::Malformed)?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(claims_json)
        );
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        Ok(format!(
            "{signing_input}.{}",
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    fn verify(&self, token: &str, now_secs: u64) -> Result<UserId, IdentityError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(IdentityError::Malformed);
        };

        let header: Header = decode_segment(header_b64)?;
        if header.alg != "HS256" {
            return Err(IdentityError::UnsupportedAlgorithm(header.alg));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| IdentityError::Malformed)?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| IdentityError::BadSignature)?;

        let claims: Claims = decode_segment(claims_b64)?;
        if let Some(exp) = claims.exp
            && now_secs >= exp
        {
            return Err(IdentityError::Expired);
        }

        match claims.user_id {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(IdentityError::MissingUserId),
        }
    }
}

impl IdentityOracle for JwtIdentity {
    fn resolve_identity(&self, token: &str) -> Result<UserId, IdentityError> {
        self.verify(token, unix_now())
    }
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, IdentityError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| IdentityError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| IdentityError::Malformed)
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
