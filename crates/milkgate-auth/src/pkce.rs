use base64::Engine;
use milkgate_core::util::random_alphanumeric;
use sha2::Digest;

/// PKCE parameters for OAuth 2.1
#[derive(Debug, Clone)]
pub struct PkceParams {
    pub code_verifier: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

/// Generate PKCE (Proof Key for Code Exchange) parameters
pub fn generate_pkce_params() -> PkceParams {
    // Code verifier (43-128 characters)
    let code_verifier = random_alphanumeric(128);
    let code_challenge = compute_challenge(&code_verifier);

    PkceParams {
        code_verifier,
        code_challenge,
        code_challenge_method: "S256".to_string(),
    }
}

/// `BASE64URL_NOPAD(SHA-256(verifier))`
pub fn compute_challenge(code_verifier: &str) -> String {
    let digest = sha2::Sha256::digest(code_verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

/// Check a token-endpoint verifier against the challenge committed at
/// the authorization endpoint. Only S256 is supported.
pub fn verify_challenge(code_verifier: &str, code_challenge: &str) -> bool {
    compute_challenge(code_verifier) == code_challenge
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 appendix B vector
    const RFC_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const RFC_CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_generate_pkce_params() {
        let params = generate_pkce_params();
        assert_eq!(params.code_verifier.len(), 128);
        assert!(!params.code_challenge.is_empty());
        assert_eq!(params.code_challenge_method, "S256");
        assert!(verify_challenge(&params.code_verifier, &params.code_challenge));
    }

    #[test]
    fn test_rfc7636_vector() {
        assert_eq!(compute_challenge(RFC_VERIFIER), RFC_CHALLENGE);
        assert!(verify_challenge(RFC_VERIFIER, RFC_CHALLENGE));
    }

    #[test]
    fn test_wrong_verifier_rejected() {
        assert!(!verify_challenge("wrong", RFC_CHALLENGE));
        assert!(!verify_challenge("", RFC_CHALLENGE));
    }

    #[test]
    fn test_params_uniqueness() {
        let a = generate_pkce_params();
        let b = generate_pkce_params();
        assert_ne!(a.code_verifier, b.code_verifier);
        assert_ne!(a.code_challenge, b.code_challenge);
    }
}
