//! HTTP-upgrade authentication (spec.md §6: "optional `Authorization: Token
//! <token>` header must match the server's configured token (if set), else
//! 403"). Generalizes the constant-time comparison idiom from
//! `examples/AnalyseDeCircuit-oxideterm/src-tauri/src/bridge/server.rs`'s
//! `validate_token`, dropping its expiry window — this spec's token is a
//! static shared secret, not a per-session time-bound one.

use subtle::ConstantTimeEq;
use tokio_tungstenite::tungstenite::handshake::server::{Callback, ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

use crate::config::ServerConfig;

fn reject(code: StatusCode, body: &str) -> ErrorResponse {
    Response::builder()
        .status(code)
        .body(Some(body.to_string()))
        .expect("status/body are always valid for an error response")
}

fn tokens_match(received: &str, expected: &str) -> bool {
    received.len() == expected.len() && bool::from(received.as_bytes().ct_eq(expected.as_bytes()))
}

/// Implements tungstenite's handshake `Callback`, checking the upgrade
/// path and, if a token is configured, the `Authorization` header.
#[derive(Clone)]
pub struct AuthCallback {
    pub ws_path: String,
    pub bearer_token: Option<String>,
}

impl Callback for AuthCallback {
    fn on_request(self, request: &Request, response: Response) -> Result<Response, ErrorResponse> {
        if request.uri().path() != self.ws_path {
            return Err(reject(StatusCode::NOT_FOUND, "unknown path"));
        }

        let Some(expected) = &self.bearer_token else {
            return Ok(response);
        };

        let header = request
            .headers()
            .get("Authorization")
            .and_then(|v| v.to_str().ok());

        let presented = header.and_then(|h| h.strip_prefix("Token "));
        match presented {
            Some(token) if tokens_match(token, expected) => Ok(response),
            _ => Err(reject(StatusCode::FORBIDDEN, "invalid or missing token")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_compare_rejects_length_mismatch_and_content_mismatch() {
        assert!(tokens_match("abc123", "abc123"));
        assert!(!tokens_match("abc124", "abc123"));
        assert!(!tokens_match("abc12", "abc123"));
    }
}
