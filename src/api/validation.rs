//! Webhook payload validation and signature verification (spec §4.3).

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use super::models::WebhookPayload;

#[derive(Debug, Error)]
pub enum PayloadValidationError {
    #[error("sku: must be 1-100 characters of [A-Za-z0-9_-]")]
    InvalidSku,
    #[error("imageUrl: must be an http or https URL")]
    InvalidImageUrl,
    #[error("sha256: must be 64 lowercase hex characters")]
    InvalidSha256,
    #[error("takenAt: must be ISO-8601")]
    InvalidTakenAt,
}

impl PayloadValidationError {
    pub fn field(&self) -> &'static str {
        match self {
            PayloadValidationError::InvalidSku => "sku",
            PayloadValidationError::InvalidImageUrl => "imageUrl",
            PayloadValidationError::InvalidSha256 => "sha256",
            PayloadValidationError::InvalidTakenAt => "takenAt",
        }
    }
}

/// Validates every field of a webhook payload, collecting all violations
/// rather than stopping at the first (§4.3 "Validation failures -> VALIDATION
/// with per-field reasons").
pub fn validate_payload(payload: &WebhookPayload) -> Result<(), Vec<PayloadValidationError>> {
    let mut errors = Vec::new();

    let sku_ok = !payload.sku.is_empty()
        && payload.sku.len() <= 100
        && payload
            .sku
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !sku_ok {
        errors.push(PayloadValidationError::InvalidSku);
    }

    let url_ok = payload.image_url.starts_with("http://") || payload.image_url.starts_with("https://");
    if !url_ok {
        errors.push(PayloadValidationError::InvalidImageUrl);
    }

    let sha_ok = payload.sha256.len() == 64
        && payload.sha256.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
    if !sha_ok {
        errors.push(PayloadValidationError::InvalidSha256);
    }

    if let Some(taken_at) = &payload.taken_at {
        if chrono::DateTime::parse_from_rfc3339(taken_at).is_err() {
            errors.push(PayloadValidationError::InvalidTakenAt);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// `hex(HMAC-SHA256(secret, raw_body))`, compared in constant time via
/// `hmac`'s `verify_slice` (§4.3, §8 property 5 "Signature constant-time").
pub fn verify_signature(secret: &str, raw_body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> WebhookPayload {
        WebhookPayload {
            event: None,
            sku: "SKU-1".to_string(),
            image_url: "http://img/a.jpg".to_string(),
            sha256: "a".repeat(64),
            taken_at: None,
        }
    }

    #[test]
    fn accepts_well_formed_payload() {
        assert!(validate_payload(&payload()).is_ok());
    }

    #[test]
    fn rejects_empty_sku() {
        let mut p = payload();
        p.sku = String::new();
        let errors = validate_payload(&p).unwrap_err();
        assert!(errors.iter().any(|e| e.field() == "sku"));
    }

    #[test]
    fn rejects_short_sha256() {
        let mut p = payload();
        p.sha256 = "too-short".to_string();
        let errors = validate_payload(&p).unwrap_err();
        assert!(errors.iter().any(|e| e.field() == "sha256"));
    }

    #[test]
    fn rejects_non_http_url() {
        let mut p = payload();
        p.image_url = "ftp://img/a.jpg".to_string();
        let errors = validate_payload(&p).unwrap_err();
        assert!(errors.iter().any(|e| e.field() == "imageUrl"));
    }

    #[test]
    fn signature_round_trips() {
        let secret = "test-secret";
        let body = b"{\"sku\":\"SKU-1\"}";
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        assert!(verify_signature(secret, body, &sig));
        assert!(!verify_signature(secret, body, "00"));
        assert!(!verify_signature("wrong-secret", body, &sig));
    }
}
