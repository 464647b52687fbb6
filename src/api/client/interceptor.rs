//! 401 handling rules for outbound requests.
//!
//! Kept apart from dispatch so the retry decision is easy to test without
//! touching transport logic.

/// Endpoints whose own 401s must never trigger a refresh.
///
/// A bad password on login or a dead cookie on refresh would otherwise loop.
const NO_REFRESH_PATHS: &[&str] = &["/auth/login", "/auth/register", "/auth/refresh", "/auth/logout"];

/// Auth endpoints that may set or clear the refresh cookie.
pub(super) fn is_auth_endpoint(path: &str) -> bool {
    let path = normalize(path);
    NO_REFRESH_PATHS.iter().any(|candidate| path == *candidate)
}

/// Decide whether a failed request should refresh and resubmit.
pub(super) fn should_refresh_and_retry(path: &str, status: u16, already_retried: bool) -> bool {
    status == 401 && !already_retried && !is_auth_endpoint(path)
}

fn normalize(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_endpoints_never_refresh() {
        for path in ["/auth/login", "/auth/refresh", "/auth/refresh/", "/auth/login?next=/"] {
            assert!(!should_refresh_and_retry(path, 401, false), "{path}");
        }
    }

    #[test]
    fn other_401s_refresh_once() {
        assert!(should_refresh_and_retry("/auth/credits", 401, false));
        assert!(!should_refresh_and_retry("/auth/credits", 401, true));
        assert!(should_refresh_and_retry("/learning-paths", 401, false));
    }

    #[test]
    fn non_401_statuses_pass_through() {
        assert!(!should_refresh_and_retry("/auth/credits", 403, false));
        assert!(!should_refresh_and_retry("/auth/credits", 500, false));
    }
}
