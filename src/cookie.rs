//! Incoming cookie parsing and outgoing `Set-Cookie` serialization.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// An outgoing cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Absolute expiry; `None` makes a session cookie
    pub expires: Option<SystemTime>,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
}

impl Cookie {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expires: None,
            path: None,
            domain: None,
            secure: false,
            http_only: false,
        }
    }

    /// Expiry as seconds since the epoch; 0 leaves the cookie without `Expires`
    #[must_use]
    pub fn expires_at_secs(mut self, secs: u64) -> Self {
        self.expires = (secs != 0).then(|| UNIX_EPOCH + Duration::from_secs(secs));
        self
    }

    #[must_use]
    pub fn expires(mut self, at: SystemTime) -> Self {
        self.expires = Some(at);
        self
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Removal cookie: empty value, expiry in the past
    #[must_use]
    pub fn removal(name: impl Into<String>) -> Self {
        Cookie::new(name, "").expires(UNIX_EPOCH + Duration::from_secs(1))
    }

    /// Name, value and attributes cannot break out of their `Set-Cookie`
    /// line or attribute slot.
    #[must_use]
    pub fn is_wire_safe(&self) -> bool {
        fn clean(s: &str) -> bool {
            !s.bytes().any(|b| b.is_ascii_control() || b == b';')
        }
        let name_ok = !self.name.is_empty()
            && self
                .name
                .bytes()
                .all(|b| b.is_ascii_graphic() && !matches!(b, b'=' | b';' | b','));
        name_ok
            && clean(&self.value)
            && !self.value.contains(',')
            && self.path.as_deref().map_or(true, clean)
            && self.domain.as_deref().map_or(true, clean)
    }

    /// `Set-Cookie` header value
    #[must_use]
    pub fn to_header_value(&self) -> String {
        let mut parts = vec![format!("{}={}", self.name, self.value)];
        if let Some(at) = self.expires {
            if at > UNIX_EPOCH {
                parts.push(format!("Expires={}", httpdate::fmt_http_date(at)));
            }
        }
        if let Some(path) = &self.path {
            parts.push(format!("Path={path}"));
        }
        if let Some(domain) = &self.domain {
            parts.push(format!("Domain={domain}"));
        }
        if self.secure {
            parts.push("Secure".to_string());
        }
        if self.http_only {
            parts.push("HttpOnly".to_string());
        }
        parts.join("; ")
    }
}

/// Parse a raw `Cookie` header. Entries without `=` or with an empty name
/// are skipped.
#[must_use]
pub fn parse_cookie_header(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|entry| {
            let (name, value) = entry.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}
