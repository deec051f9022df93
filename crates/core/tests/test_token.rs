#[cfg(test)]
mod tests {
    use core_lib::token::{generate_api_key, has_key_shape, TokenSet, DEFAULT_KEY_PREFIX};

    #[test]
    fn test_api_key_format() {
        let key = generate_api_key("gust");

        assert!(key.starts_with("gust_"));
        // prefix + '_' + hyphenated uuid
        assert_eq!(key.len(), "gust_".len() + 36);
        assert!(has_key_shape(&key, "gust"));
    }

    #[test]
    fn test_api_keys_are_unique() {
        let first = generate_api_key(DEFAULT_KEY_PREFIX);
        let second = generate_api_key(DEFAULT_KEY_PREFIX);
        assert_ne!(first, second);
    }

    #[test]
    fn test_key_shape_rejects_foreign_values() {
        assert!(!has_key_shape("bogus_token", DEFAULT_KEY_PREFIX));
        assert!(!has_key_shape("", DEFAULT_KEY_PREFIX));
        assert!(!has_key_shape(&generate_api_key("other"), DEFAULT_KEY_PREFIX));
        assert!(!has_key_shape("breeze-not-a-uuid", DEFAULT_KEY_PREFIX));
    }

    #[test]
    fn test_token_set_new() {
        let token = TokenSet::new("tok123");
        assert_eq!(token.access_token, "tok123");
        assert!(token.token_type.is_none());
        assert!(token.scope.is_none());
    }
}
