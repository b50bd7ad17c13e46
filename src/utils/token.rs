use rand::{distributions::Alphanumeric, thread_rng, Rng};

pub const SESSION_TOKEN_LEN: usize = 48;

pub fn generate_access_token(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Opaque bearer token identifying one attempt session.
pub fn generate_session_token() -> String {
    generate_access_token(SESSION_TOKEN_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_tokens_are_alphanumeric_and_distinct() {
        let a = generate_session_token();
        let b = generate_session_token();
        assert_eq!(a.len(), SESSION_TOKEN_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }
}
