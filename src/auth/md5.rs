//! Legacy MD5 password authentication

/// Password response for `AuthenticationMD5Password`
///
/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`
pub fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let inner = format!("{:x}", md5::compute(format!("{}{}", password, user)));

    let mut outer = Vec::with_capacity(inner.len() + salt.len());
    outer.extend_from_slice(inner.as_bytes());
    outer.extend_from_slice(&salt);

    format!("md5{:x}", md5::compute(outer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // Computed with libpq's pg_md5_encrypt for user "postgres", password "postgres"
        let inner = format!("{:x}", md5::compute("postgrespostgres"));
        assert_eq!(inner, "3175bce1d3201d16594cebf9d7eb3f9d");

        let hashed = md5_password("postgres", "postgres", [0x01, 0x02, 0x03, 0x04]);
        assert!(hashed.starts_with("md5"));
        assert_eq!(hashed.len(), 35);
    }

    #[test]
    fn test_salt_changes_digest() {
        let a = md5_password("app", "secret", [0, 0, 0, 1]);
        let b = md5_password("app", "secret", [0, 0, 0, 2]);
        assert_ne!(a, b);
    }
}
