use sha2::{Digest, Sha256};

use crate::error::AppError;

/// Stateless tenant tokens: `{tenant_id}.{hex sha256(secret "." tenant_id)}`.
///
/// Both the HTTP facade and the realtime gateway validate with the same
/// secret, so tenant identity is always derived from the credential itself.

pub fn issue_token(secret: &str, tenant_id: &str) -> String {
    format!("{tenant_id}.{}", signature(secret, tenant_id))
}

/// The tenant portion of a token, if present and non-empty.
pub fn token_tenant(token: &str) -> Option<&str> {
    match token.rsplit_once('.') {
        Some((tenant, _)) if !tenant.is_empty() => Some(tenant),
        _ => None,
    }
}

/// Validate a token and return the tenant it belongs to.
pub fn verify_token(secret: &str, token: &str) -> Result<String, AppError> {
    let (tenant, sig) = token
        .rsplit_once('.')
        .ok_or_else(|| AppError::Auth("malformed token".to_string()))?;

    if tenant.is_empty() {
        return Err(AppError::Auth("token carries no tenant".to_string()));
    }

    if !constant_time_eq(sig.as_bytes(), signature(secret, tenant).as_bytes()) {
        return Err(AppError::Auth("invalid token signature".to_string()));
    }

    Ok(tenant.to_string())
}

fn signature(secret: &str, tenant_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b".");
    hasher.update(tenant_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_verify() {
        let token = issue_token("secret", "tenant-a");
        let tenant = verify_token("secret", &token).expect("valid token");
        assert_eq!(tenant, "tenant-a");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token("secret", "tenant-a");
        assert!(matches!(
            verify_token("other", &token),
            Err(AppError::Auth(_))
        ));
    }

    #[test]
    fn tampered_tenant_is_rejected() {
        let token = issue_token("secret", "tenant-a");
        let sig = token.rsplit_once('.').expect("has signature").1;
        let forged = format!("tenant-b.{sig}");
        assert!(matches!(
            verify_token("secret", &forged),
            Err(AppError::Auth(_))
        ));
    }

    #[test]
    fn token_tenant_extracts_prefix() {
        let token = issue_token("secret", "acme");
        assert_eq!(token_tenant(&token), Some("acme"));
        assert_eq!(token_tenant("nodot"), None);
        assert_eq!(token_tenant(".justsig"), None);
    }
}
