//! Cover-traffic profile.
//!
//! Everything about a gatepost exchange that is visible to a network
//! observer — verb, content type, user agent — plus the two integrity
//! controls (PKE key charset, circuit-test literal) lives here. The
//! defaults compose the most common form-POST traffic on the wire;
//! callers embedding the channel somewhere unusual can override any
//! field before building the channel.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// On-wire cover and integrity settings for both ends of a circuit.
///
/// Both sides must share `post_key_charset` and `test_stream`; the
/// HTTP fields only matter on the client, which originates every
/// request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverProfile {
    /// HTTP verb for every request
    #[serde(default = "default_http_verb")]
    pub http_verb: String,

    /// Content-Type header value
    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// User-Agent header value (a realistic desktop browser string)
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Alphabet the handshake request key is drawn from; every
    /// character must be unique
    #[serde(default = "default_post_key_charset")]
    pub post_key_charset: String,

    /// Literal echoed by the server during the circuit self-test
    #[serde(default = "default_test_stream")]
    pub test_stream: String,
}

fn default_http_verb() -> String {
    "POST".to_string()
}

fn default_content_type() -> String {
    "application/x-www-form-urlencoded".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
        .to_string()
}

fn default_post_key_charset() -> String {
    "abcdefghijklmnopqrstuvwxyz0123456789".to_string()
}

fn default_test_stream() -> String {
    "eKZjrbGfow4738cTnI7TVZGl".to_string()
}

impl Default for CoverProfile {
    fn default() -> Self {
        Self {
            http_verb: default_http_verb(),
            content_type: default_content_type(),
            user_agent: default_user_agent(),
            post_key_charset: default_post_key_charset(),
            test_stream: default_test_stream(),
        }
    }
}

impl CoverProfile {
    /// Validate the profile.
    ///
    /// Refuses a charset with duplicate characters: the handshake key
    /// marker is drawn from it, and a non-unique alphabet would skew
    /// the marker distribution.
    pub fn validate(&self) -> Result<()> {
        if self.http_verb.is_empty()
            || reqwest::Method::from_bytes(self.http_verb.as_bytes()).is_err()
        {
            return Err(Error::config(format!(
                "invalid HTTP verb {:?}",
                self.http_verb
            )));
        }
        if self.content_type.is_empty() {
            return Err(Error::config("content_type cannot be empty"));
        }
        if self.user_agent.is_empty() {
            return Err(Error::config("user_agent cannot be empty"));
        }
        if self.post_key_charset.is_empty() {
            return Err(Error::config("post_key_charset cannot be empty"));
        }
        let mut seen = HashSet::new();
        for c in self.post_key_charset.chars() {
            if !seen.insert(c) {
                return Err(Error::config(
                    "post_key_charset contains non-unique characters",
                ));
            }
        }
        if self.test_stream.is_empty() || !self.test_stream.is_ascii() {
            return Err(Error::config(
                "test_stream must be a non-empty ASCII literal",
            ));
        }
        Ok(())
    }
}
