//! OAuth 1.0 PLAINTEXT authorisation for the MAAS API.

use std::fmt;

use thiserror::Error;

/// Raised when an API key does not have the `consumer:token:secret` shape.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("MAAS API key must have the form consumer:token:secret")]
pub struct ApiKeyFormatError;

/// The three parts of a MAAS API key.
#[derive(Clone, Eq, PartialEq)]
pub struct ApiKey {
    consumer_key: String,
    token_key: String,
    token_secret: String,
}

impl ApiKey {
    /// Splits a key of the form `consumer:token:secret`.
    ///
    /// Only the shape is checked; the key is not tried against the server.
    ///
    /// # Errors
    ///
    /// Returns [`ApiKeyFormatError`] unless the key has exactly three
    /// non-empty parts.
    pub fn parse(raw: &str) -> Result<Self, ApiKeyFormatError> {
        let mut parts = raw.trim().split(':');
        let (Some(consumer), Some(token), Some(secret), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ApiKeyFormatError);
        };
        if [consumer, token, secret].iter().any(|part| part.is_empty()) {
            return Err(ApiKeyFormatError);
        }
        Ok(Self {
            consumer_key: consumer.to_owned(),
            token_key: token.to_owned(),
            token_secret: secret.to_owned(),
        })
    }

    /// Returns the consumer key part.
    #[must_use]
    pub fn consumer_key(&self) -> &str {
        &self.consumer_key
    }

    /// Builds the `Authorization` header value for one request.
    ///
    /// MAAS keys carry no consumer secret, so the PLAINTEXT signature is
    /// `&` followed by the token secret.
    #[must_use]
    pub fn authorization_header(&self, nonce: &str, timestamp: u64) -> String {
        let signature = format!("&{}", self.token_secret);
        let params = [
            ("oauth_version", "1.0"),
            ("oauth_signature_method", "PLAINTEXT"),
            ("oauth_consumer_key", self.consumer_key.as_str()),
            ("oauth_token", self.token_key.as_str()),
            ("oauth_signature", signature.as_str()),
            ("oauth_nonce", nonce),
        ];
        let mut header = String::from("OAuth realm=\"\"");
        for (name, value) in params {
            header.push_str(&format!(", {name}=\"{}\"", percent_encode(value)));
        }
        header.push_str(&format!(", oauth_timestamp=\"{timestamp}\""));
        header
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("consumer_key", &self.consumer_key)
            .field("token_key", &"<redacted>")
            .field("token_secret", &"<redacted>")
            .finish()
    }
}

/// RFC 5849 percent-encoding: everything but unreserved characters.
pub(super) fn percent_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("")]
    #[case("consumer:token")]
    #[case("consumer:token:secret:extra")]
    #[case("consumer::secret")]
    fn malformed_keys_are_rejected(#[case] raw: &str) {
        assert_eq!(ApiKey::parse(raw), Err(ApiKeyFormatError));
    }

    #[rstest]
    fn header_carries_plaintext_signature() {
        let key = ApiKey::parse("ck:tk:sec")
            .unwrap_or_else(|err| panic!("key should parse: {err}"));

        let header = key.authorization_header("n1", 1_700_000_000);

        assert!(header.starts_with("OAuth "), "unexpected header: {header}");
        assert!(header.contains("oauth_signature_method=\"PLAINTEXT\""));
        assert!(header.contains("oauth_consumer_key=\"ck\""));
        assert!(header.contains("oauth_token=\"tk\""));
        assert!(header.contains("oauth_signature=\"%26sec\""));
        assert!(header.contains("oauth_nonce=\"n1\""));
        assert!(header.contains("oauth_timestamp=\"1700000000\""));
    }

    #[rstest]
    fn debug_output_hides_secrets() {
        let key = ApiKey::parse("ck:tk:sec")
            .unwrap_or_else(|err| panic!("key should parse: {err}"));

        let rendered = format!("{key:?}");

        assert!(!rendered.contains("sec\""), "secret leaked: {rendered}");
        assert!(!rendered.contains("tk"), "token leaked: {rendered}");
    }
}
