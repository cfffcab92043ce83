use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Request correlation id backed by a ULID.
///
/// Taken from the proxy's `X-Request-Id` when it forwards a valid ULID, so
/// proxy and worker logs line up; generated otherwise.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct RequestId(pub ulid::Ulid);

impl RequestId {
    #[must_use]
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    #[must_use]
    pub fn from_header_or_new(header_value: Option<&str>) -> Self {
        header_value
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or_default()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl FromStr for RequestId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(RequestId)
    }
}
