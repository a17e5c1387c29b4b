//! HTTP Digest authentication (RFC 2617, MD5).
//!
//! Terminals answer an unauthenticated request with `401` and a
//! `WWW-Authenticate: Digest ...` challenge. The client answers once with
//!
//! ```text
//! HA1      = MD5(username:realm:password)
//! HA2      = MD5(method:uri)
//! response = MD5(HA1:nonce:nc:cnonce:qop:HA2)    qop = auth
//! response = MD5(HA1:nonce:HA2)                  no qop offered (RFC 2069)
//! ```

use crate::error::{ProtocolError, Result};
use acsync_core::Credentials;
use acsync_core::constants::{DIGEST_CNONCE_LEN, DIGEST_NONCE_COUNT};
use md5::{Digest, Md5};
use uuid::Uuid;

/// Parsed `WWW-Authenticate: Digest` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    /// Selected quality of protection; only `auth` is supported.
    pub qop: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

impl DigestChallenge {
    /// Parse a `WWW-Authenticate` header value.
    ///
    /// # Errors
    /// - `MalformedChallenge` if the scheme is not Digest or realm/nonce is missing
    /// - `UnsupportedChallenge` for non-MD5 algorithms or qop without `auth`
    pub fn parse(header: &str) -> Result<Self> {
        let start = find_scheme(header)
            .ok_or_else(|| ProtocolError::MalformedChallenge(format!("not a Digest challenge: {header}")))?;
        let params = parse_params(&header[start..]);
        let param = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };

        let realm = param("realm")
            .ok_or_else(|| ProtocolError::MalformedChallenge("missing realm".to_string()))?;
        let nonce = param("nonce")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ProtocolError::MalformedChallenge("missing nonce".to_string()))?;

        let algorithm = param("algorithm");
        if let Some(alg) = &algorithm
            && !alg.eq_ignore_ascii_case("MD5")
        {
            return Err(ProtocolError::UnsupportedChallenge(format!("algorithm {alg}")));
        }

        let qop = match param("qop") {
            None => None,
            Some(options) => {
                if options.split(',').any(|o| o.trim().eq_ignore_ascii_case("auth")) {
                    Some("auth".to_string())
                } else {
                    return Err(ProtocolError::UnsupportedChallenge(format!("qop {options}")));
                }
            }
        };

        Ok(Self {
            realm,
            nonce,
            qop,
            opaque: param("opaque"),
            algorithm,
        })
    }

    /// Compute the `response` hash for one request.
    #[must_use]
    pub fn response(&self, credentials: &Credentials, method: &str, uri: &str, cnonce: &str) -> String {
        let ha1 = md5_hex(&format!(
            "{}:{}:{}",
            credentials.username, self.realm, credentials.password
        ));
        let ha2 = md5_hex(&format!("{method}:{uri}"));

        match &self.qop {
            Some(qop) => md5_hex(&format!(
                "{ha1}:{}:{DIGEST_NONCE_COUNT}:{cnonce}:{qop}:{ha2}",
                self.nonce
            )),
            None => md5_hex(&format!("{ha1}:{}:{ha2}", self.nonce)),
        }
    }

    /// Build the `Authorization` header value for one request.
    #[must_use]
    pub fn authorization(
        &self,
        credentials: &Credentials,
        method: &str,
        uri: &str,
        cnonce: &str,
    ) -> String {
        let response = self.response(credentials, method, uri, cnonce);
        let mut header = format!(
            r#"Digest username="{}", realm="{}", nonce="{}", uri="{uri}""#,
            credentials.username, self.realm, self.nonce
        );
        if let Some(alg) = &self.algorithm {
            header.push_str(&format!(", algorithm={alg}"));
        }
        if let Some(qop) = &self.qop {
            header.push_str(&format!(
                r#", qop={qop}, nc={DIGEST_NONCE_COUNT}, cnonce="{cnonce}""#
            ));
        }
        header.push_str(&format!(r#", response="{response}""#));
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(r#", opaque="{opaque}""#));
        }
        header
    }
}

/// Fresh random client nonce.
#[must_use]
pub fn generate_cnonce() -> String {
    let mut nonce = Uuid::new_v4().simple().to_string();
    nonce.truncate(DIGEST_CNONCE_LEN);
    nonce
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Byte offset just past the `Digest` scheme token.
fn find_scheme(header: &str) -> Option<usize> {
    let lower = header.to_ascii_lowercase();
    let pos = lower.find("digest")?;
    let before_ok = pos == 0 || lower[..pos].ends_with([' ', ',']);
    let end = pos + "digest".len();
    let after_ok = lower[end..].starts_with(' ');
    (before_ok && after_ok).then_some(end)
}

/// Split `k=v, k="quoted, value"` pairs.
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == ',').is_some() {}

        let key: String = std::iter::from_fn(|| chars.next_if(|c| *c != '=' && *c != ',')).collect();
        let key = key.trim().to_string();
        if key.is_empty() {
            break;
        }
        if chars.next_if_eq(&'=').is_none() {
            // Bare token, e.g. the next scheme name.
            continue;
        }

        let mut value = String::new();
        if chars.next_if_eq(&'"').is_some() {
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    other => value.push(other),
                }
            }
        } else {
            value = std::iter::from_fn(|| chars.next_if(|c| *c != ',')).collect();
            value = value.trim().to_string();
        }
        params.push((key, value));
    }
    params
}
