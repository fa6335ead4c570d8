//! Ephemeral credentials.

use rand::Rng;
use rand::distributions::Alphanumeric;

/// Generate a fresh alphanumeric root password.
///
/// The thread-local generator is not `Send`; never hold it across an await.
pub fn generate_password(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_and_charset() {
        let password = generate_password(24);
        assert_eq!(password.len(), 24);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_fresh_each_time() {
        assert_ne!(generate_password(32), generate_password(32));
    }
}
