//! SOAP envelope construction
//!
//! Envelopes are plain text templates. Authentication uses WS-Security
//! UsernameToken with password digest:
//! `Base64(SHA1(nonce || created || password))` over a 16-byte random nonce
//! and a UTC ISO-8601 created timestamp.

use base64::prelude::*;
use sha1::{Digest, Sha1};

/// Build the complete SOAP 1.2 envelope around `body_content`, with a
/// WS-Security header when credentials are present.
pub fn build_envelope(user: &str, pass: &str, body_content: &str) -> String {
    let security_header = if user.is_empty() {
        String::new()
    } else {
        security_header(user, pass)
    };

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
  <s:Header>
    {security_header}
  </s:Header>
  <s:Body xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:xsd="http://www.w3.org/2001/XMLSchema">
    {body_content}
  </s:Body>
</s:Envelope>"#
    )
}

/// WS-Security UsernameToken header with a fresh nonce and timestamp.
pub fn security_header(user: &str, pass: &str) -> String {
    let nonce: [u8; 16] = rand::random();
    let created = chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string();
    security_header_with(user, pass, &nonce, &created)
}

fn security_header_with(user: &str, pass: &str, nonce: &[u8; 16], created: &str) -> String {
    let nonce_b64 = BASE64_STANDARD.encode(nonce);
    let digest = password_digest(nonce, created, pass);

    format!(
        r#"<wsse:Security xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd" xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">
      <wsse:UsernameToken wsu:Id="UsernameToken-1">
        <wsse:Username>{user}</wsse:Username>
        <wsse:Password Type="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest">{digest}</wsse:Password>
        <wsse:Nonce EncodingType="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary">{nonce_b64}</wsse:Nonce>
        <wsu:Created>{created}</wsu:Created>
      </wsse:UsernameToken>
    </wsse:Security>"#
    )
}

/// `Base64(SHA1(nonce || created || password))`
pub fn password_digest(nonce: &[u8], created: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    BASE64_STANDARD.encode(hasher.finalize())
}
