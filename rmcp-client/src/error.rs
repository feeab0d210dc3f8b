use thiserror::Error;

/// Broad classification of a connect/transport failure. This module is the
/// single place that inspects error text; everything else branches on the
/// returned kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The server demanded authorization (HTTP 401).
    Auth,
    /// The server could not be reached at all.
    Offline,
    /// Any other HTTP status we could extract.
    Http(u16),
    Other,
}

#[derive(Debug, Clone)]
pub struct Classification {
    pub kind: ErrorKind,
    pub status_code: Option<u16>,
    pub raw_message: String,
}

impl Classification {
    pub fn is_auth(&self) -> bool {
        self.kind == ErrorKind::Auth
    }
}

/// Raised when the interactive authorization wait outlives its deadline.
#[derive(Debug, Error)]
#[error("timed out waiting for OAuth authorization for `{server_name}` after {timeout_ms} ms")]
pub struct OAuthTimeoutError {
    pub server_name: String,
    pub timeout_ms: u64,
}

/// Raised when a tool enumeration or invocation outlives its deadline. The
/// runtime closes the underlying context forcibly when it sees one.
#[derive(Debug, Error)]
#[error("{operation} request timed out after {timeout_ms} ms")]
pub struct OperationTimeoutError {
    pub operation: String,
    pub timeout_ms: u64,
}

const AUTH_MARKERS: &[&str] = &[
    "Non-200 status code (401)",
    "HTTP 401",
    "401 Unauthorized",
    "Unauthorized",
    "Auth required",
    "auth required",
];

const OFFLINE_MARKERS: &[&str] = &[
    "ECONNREFUSED",
    "ENOTFOUND",
    "EAI_AGAIN",
    "fetch failed",
    "Connection refused",
    "dns error",
];

pub fn classify_error(error: &anyhow::Error) -> Classification {
    let mut status_code: Option<u16> = None;
    let mut offline = false;
    let mut message = error.to_string();

    for cause in error.chain() {
        let text = cause.to_string();
        if let Some(reqwest_err) = cause.downcast_ref::<reqwest::Error>() {
            if let Some(status) = reqwest_err.status() {
                status_code.get_or_insert(status.as_u16());
            }
            if reqwest_err.is_connect() || reqwest_err.is_timeout() {
                offline = true;
            }
        }
        if status_code.is_none() {
            status_code = extract_status(&text);
        }
        if OFFLINE_MARKERS.iter().any(|marker| text.contains(marker)) {
            offline = true;
        }
        if AUTH_MARKERS.iter().any(|marker| text.contains(marker)) {
            status_code.get_or_insert(401);
        }
    }

    if message.is_empty() {
        message = "unknown error".to_string();
    }

    let kind = if status_code == Some(401) {
        ErrorKind::Auth
    } else if offline {
        ErrorKind::Offline
    } else if let Some(status) = status_code {
        ErrorKind::Http(status)
    } else {
        ErrorKind::Other
    };

    Classification {
        kind,
        status_code,
        raw_message: message,
    }
}

/// Pull the first plausible 3-digit HTTP status out of an error message.
fn extract_status(text: &str) -> Option<u16> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i - start == 3 {
                let bounded_left = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
                let bounded_right = i == bytes.len() || !bytes[i].is_ascii_alphanumeric();
                if bounded_left && bounded_right {
                    if let Ok(status) = text[start..i].parse::<u16>() {
                        if (100..600).contains(&status) {
                            // Ports and years also look like numbers; require an
                            // HTTP-ish context for anything but the well-known codes.
                            if status == 401 || looks_like_status_context(text, start) {
                                return Some(status);
                            }
                        }
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    None
}

fn looks_like_status_context(text: &str, digit_start: usize) -> bool {
    let prefix = text[..digit_start].to_ascii_lowercase();
    prefix.ends_with("status code (")
        || prefix.ends_with("http ")
        || prefix.ends_with("status ")
        || prefix.ends_with("status: ")
        || prefix.ends_with("error (")
        || prefix.ends_with("code ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;

    #[test]
    fn classifies_explicit_401_markers_as_auth() {
        for message in [
            "Non-200 status code (401)",
            "HTTP 401 returned by server",
            "Unauthorized",
            "server said 401 Unauthorized",
        ] {
            let classified = classify_error(&anyhow!("{message}"));
            assert_eq!(classified.kind, ErrorKind::Auth, "message: {message}");
        }
    }

    #[test]
    fn classifies_network_failures_as_offline() {
        for message in [
            "connect ECONNREFUSED 127.0.0.1:9",
            "getaddrinfo ENOTFOUND nope.invalid",
            "fetch failed",
        ] {
            let classified = classify_error(&anyhow!("{message}"));
            assert_eq!(classified.kind, ErrorKind::Offline, "message: {message}");
        }
    }

    #[test]
    fn extracts_non_401_statuses_as_http() {
        let classified = classify_error(&anyhow!("Non-200 status code (503)"));
        assert_eq!(classified.kind, ErrorKind::Http(503));
        assert_eq!(classified.status_code, Some(503));
    }

    #[test]
    fn auth_wins_over_offline_phrasing() {
        let classified = classify_error(&anyhow!("fetch failed: HTTP 401"));
        assert_eq!(classified.kind, ErrorKind::Auth);
    }

    #[test]
    fn falls_back_to_other() {
        let classified = classify_error(&anyhow!("something exploded"));
        assert_eq!(classified.kind, ErrorKind::Other);
        assert_eq!(classified.status_code, None);
        assert_eq!(classified.raw_message, "something exploded");
    }

    #[test]
    fn ignores_ports_that_look_like_statuses() {
        let classified = classify_error(&anyhow!("could not reach host on port 443"));
        assert_eq!(classified.kind, ErrorKind::Other);
    }

    #[test]
    fn oauth_timeout_error_carries_fields() {
        let err = OAuthTimeoutError {
            server_name: "x".to_string(),
            timeout_ms: 1000,
        };
        let wrapped: anyhow::Error = err.into();
        let downcast = wrapped
            .downcast_ref::<OAuthTimeoutError>()
            .expect("downcast succeeds");
        assert_eq!(downcast.server_name, "x");
        assert_eq!(downcast.timeout_ms, 1000);
    }
}
