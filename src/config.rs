use std::env;

/// Number of feed entries per profile page.
pub fn posts_per_page() -> i64 {
    env_i64("POSTS_PER_PAGE", 10)
}

/// Cap on the number of posts a search may return.
pub fn max_search_results() -> i64 {
    env_i64("MAX_SEARCH_RESULTS", 50)
}

/// Sender address for outgoing notifications.
pub fn mail_sender() -> String {
    env::var("MAIL_SENDER").unwrap_or_else(|_| "microblog@localhost".to_string())
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// SMTP endpoint for outgoing mail. Mail is disabled entirely when
/// MAIL_SERVER is not set.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub server: String,
    pub username: String,
    pub password: String,
}

impl MailConfig {
    pub fn from_env() -> Option<MailConfig> {
        let server = env::var("MAIL_SERVER").ok()?;
        Some(MailConfig {
            server,
            username: env::var("MAIL_USERNAME").unwrap_or_default(),
            password: env::var("MAIL_PASSWORD").unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_defaults_when_unset() {
        env::remove_var("POSTS_PER_PAGE");
        assert_eq!(posts_per_page(), 10);
    }

    #[test]
    fn garbage_env_value_falls_back_to_default() {
        env::set_var("MAX_SEARCH_RESULTS", "not-a-number");
        assert_eq!(max_search_results(), 50);
        env::remove_var("MAX_SEARCH_RESULTS");
    }
}
