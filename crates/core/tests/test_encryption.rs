#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use core_lib::encryption::{CryptoError, TokenCipher};
    use hex_literal::hex;

    const TEST_KEY: [u8; 32] = hex!(
        "000102030405060708090a0b0c0d0e0f"
        "101112131415161718191a1b1c1d1e1f"
    );

    fn create_cipher() -> TokenCipher {
        TokenCipher::new(&TEST_KEY).expect("valid key")
    }

    #[test]
    fn test_seal_hides_token_and_opens_for_owner() -> Result<(), CryptoError> {
        let cipher = create_cipher();
        let sealed = cipher.seal(555, "gho_provider_access_token")?;

        assert!(sealed.starts_with("v1."));
        assert!(!sealed.contains("gho_provider_access_token"));
        assert_eq!(cipher.open(555, &sealed)?, "gho_provider_access_token");
        Ok(())
    }

    #[test]
    fn test_fresh_nonce_per_seal() -> Result<(), CryptoError> {
        let cipher = create_cipher();
        let first = cipher.seal(1, "same token")?;
        let second = cipher.seal(1, "same token")?;

        assert_ne!(first, second);
        assert_eq!(cipher.open(1, &first)?, cipher.open(1, &second)?);
        Ok(())
    }

    #[test]
    fn test_sealed_token_is_bound_to_owner() -> Result<(), CryptoError> {
        let cipher = create_cipher();
        let sealed = cipher.seal(555, "alice-token")?;
        assert_eq!(cipher.open(777, &sealed), Err(CryptoError::Open));
        Ok(())
    }

    #[test]
    fn test_tampered_value_fails_to_open() -> Result<(), CryptoError> {
        let cipher = create_cipher();
        let sealed = cipher.seal(1, "token")?;

        let mut blob = STANDARD.decode(sealed.trim_start_matches("v1.")).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        let tampered = format!("v1.{}", STANDARD.encode(blob));

        assert_eq!(cipher.open(1, &tampered), Err(CryptoError::Open));
        Ok(())
    }

    #[test]
    fn test_other_key_cannot_open() -> Result<(), CryptoError> {
        let sealed = create_cipher().seal(1, "secret")?;
        assert_eq!(
            TokenCipher::ephemeral().open(1, &sealed),
            Err(CryptoError::Open)
        );
        Ok(())
    }

    #[test]
    fn test_key_validation() {
        assert_eq!(
            TokenCipher::new(b"too-short-key").err(),
            Some(CryptoError::InvalidKeyLength(13))
        );
        assert_eq!(
            TokenCipher::from_base64("***").err(),
            Some(CryptoError::InvalidKeyEncoding)
        );
        assert_eq!(
            TokenCipher::from_base64(&STANDARD.encode([1u8; 16])).err(),
            Some(CryptoError::InvalidKeyLength(16))
        );
    }

    #[test]
    fn test_base64_key_matches_raw_key() -> Result<(), CryptoError> {
        let configured = TokenCipher::from_base64(&format!(" {} ", STANDARD.encode(TEST_KEY)))?;
        let sealed = create_cipher().seal(9, "shared")?;
        assert_eq!(configured.open(9, &sealed)?, "shared");
        Ok(())
    }

    #[test]
    fn test_malformed_values() {
        let cipher = create_cipher();
        for value in ["", "plain-token", "v1.", "v1.***", "v1.AAAA", "v2.AAAAAAAAAAAAAAAAAAAAAAAA"] {
            assert_eq!(cipher.open(1, value), Err(CryptoError::Malformed), "{value}");
        }
    }

    #[test]
    fn test_empty_token() -> Result<(), CryptoError> {
        let cipher = create_cipher();
        let sealed = cipher.seal(1, "")?;
        assert_eq!(cipher.open(1, &sealed)?, "");
        Ok(())
    }
}
