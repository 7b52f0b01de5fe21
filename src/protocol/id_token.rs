//! Identity token payload decoding
//!
//! Only the claims segment of a compact JWS is decoded here. Signature and
//! audience validation belong to the [`AuthorizationServer`] collaborator;
//! the default implementation relies on the token having been received
//! directly from the token endpoint over TLS.
//!
//! [`AuthorizationServer`]: super::AuthorizationServer

use base64::Engine as _;
use serde_json::{Map, Value};

use crate::error::{FrontdoorError, Result};

/// Decodes the payload segment of a compact JWT into a JSON object.
///
/// # Errors
///
/// Returns [`FrontdoorError::TokenExchangeFailure`] when the token does not
/// have three segments, the payload is not base64url, or it is not a JSON
/// object.
///
/// # Examples
///
/// ```
/// use base64::Engine as _;
/// use frontdoor::protocol::id_token::decode_payload;
///
/// let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
///     .encode(br#"{"sub":"42","given_name":"Frank"}"#);
/// let token = format!("eyJhbGciOiJub25lIn0.{payload}.");
///
/// let claims = decode_payload(&token).unwrap();
/// assert_eq!(claims["given_name"], "Frank");
/// ```
pub fn decode_payload(token: &str) -> Result<Map<String, Value>> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(FrontdoorError::TokenExchangeFailure(
            "id_token is not a compact JWT".to_string(),
        )
        .into());
    };

    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| {
            FrontdoorError::TokenExchangeFailure(format!("id_token payload is not base64url: {e}"))
        })?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(FrontdoorError::TokenExchangeFailure(
            "id_token payload is not a JSON object".to_string(),
        )
        .into()),
        Err(e) => Err(FrontdoorError::TokenExchangeFailure(format!(
            "id_token payload is not valid JSON: {e}"
        ))
        .into()),
    }
}
