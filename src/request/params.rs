use smallvec::SmallVec;

/// Typical form or query string fits without spilling
pub const MAX_INLINE_PARAMS: usize = 8;

/// URL-decoded parameter multimap.
///
/// A key may carry several values; values keep arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: SmallVec<[(String, Vec<String>); MAX_INLINE_PARAMS]>,
}

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `key`
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key, vec![value])),
        }
    }

    /// Append every pair of an `application/x-www-form-urlencoded` string
    pub fn extend_urlencoded(&mut self, input: &[u8]) {
        for (k, v) in url::form_urlencoded::parse(input) {
            self.push(k, v);
        }
    }

    /// First value for `key`
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().map(String::as_str)
    }

    #[must_use]
    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Number of distinct keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_keys_accumulate() {
        let mut p = Params::new();
        p.extend_urlencoded(b"a=1&b=x%20y&a=2");
        assert_eq!(p.get_all("a"), ["1", "2"]);
        assert_eq!(p.get("b"), Some("x y"));
        assert_eq!(p.len(), 2);
        assert!(p.get_all("zzz").is_empty());
    }

    #[test]
    fn plus_decodes_to_space() {
        let mut p = Params::new();
        p.extend_urlencoded(b"q=hello+world");
        assert_eq!(p.get("q"), Some("hello world"));
    }
}
