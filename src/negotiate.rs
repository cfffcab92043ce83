//! Content-Type parsing and Accept-Language resolution.

/// Charset assumed when a Content-Type carries none
pub const DEFAULT_CHARSET: &str = "utf-8";

/// Locale returned when the request has no Accept-Language header
pub const DEFAULT_LOCALE: &str = "en";

/// Locale returned when Accept-Language is present but nothing matches
pub const NO_MATCH_LOCALE: &str = "C";

/// Form-encoded body media type
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Parsed `Content-Type`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Lowercased media type without parameters
    pub mime: String,
    /// Lowercased charset, [`DEFAULT_CHARSET`] when absent
    pub charset: String,
}

impl ContentType {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split(';');
        let mime = parts.next().unwrap_or("").trim().to_ascii_lowercase();
        let charset = parts
            .filter_map(|p| p.split_once('='))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case("charset"))
            .map(|(_, v)| v.trim().trim_matches('"').to_ascii_lowercase())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_CHARSET.to_string());
        Self { mime, charset }
    }

    #[must_use]
    pub fn is_form(&self) -> bool {
        self.mime == FORM_URLENCODED
    }

    #[must_use]
    pub fn matches(&self, mime: &str) -> bool {
        self.mime.eq_ignore_ascii_case(mime)
    }
}

struct LangEntry {
    tag: String,
    /// Quality scaled to thousandths so equal weights group exactly
    q: u16,
}

fn parse_quality(raw: &str) -> Option<u16> {
    let q: f32 = raw.trim().parse().ok()?;
    if !(0.0..=1.0).contains(&q) {
        return None;
    }
    Some((q * 1000.0).round() as u16)
}

fn parse_accept_language(header: &str) -> Vec<LangEntry> {
    let mut entries: Vec<LangEntry> = Vec::new();
    for item in header.split(',') {
        let mut fields = item.split(';');
        let tag = fields.next().unwrap_or("").trim();
        if tag.is_empty() {
            continue;
        }
        let mut q = Some(1000);
        for param in fields {
            if let Some((k, v)) = param.split_once('=') {
                if k.trim().eq_ignore_ascii_case("q") {
                    q = parse_quality(v);
                }
            }
        }
        // q=0 means "not acceptable"; unparsable weights are dropped too
        match q {
            Some(q) if q > 0 => entries.push(LangEntry {
                tag: tag.to_string(),
                q,
            }),
            _ => {}
        }
    }

    let mut synthesized = Vec::new();
    for entry in &entries {
        let mut prefix = entry.tag.as_str();
        while let Some(cut) = prefix.rfind('-') {
            prefix = &prefix[..cut];
            let known = entries
                .iter()
                .chain(synthesized.iter())
                .any(|e: &LangEntry| e.tag.eq_ignore_ascii_case(prefix));
            if !known {
                synthesized.push(LangEntry {
                    tag: prefix.to_string(),
                    q: entry.q,
                });
            }
        }
    }
    entries.extend(synthesized);
    entries
}

/// Pick the best locale from `available` for an `Accept-Language` header.
///
/// Quality buckets are scanned from highest to lowest; inside a bucket tags
/// keep header order, synthesized prefixes (`en` for `en-us`) coming after
/// the tags that were actually sent. The returned string is the matching
/// entry of `available`.
#[must_use]
pub fn resolve_locale(header: Option<&str>, available: &[&str]) -> String {
    let Some(header) = header else {
        return DEFAULT_LOCALE.to_string();
    };
    let entries = parse_accept_language(header);

    let mut buckets: Vec<u16> = entries.iter().map(|e| e.q).collect();
    buckets.sort_unstable_by(|a, b| b.cmp(a));
    buckets.dedup();

    for q in buckets {
        for entry in entries.iter().filter(|e| e.q == q) {
            if let Some(found) = available
                .iter()
                .find(|a| a.eq_ignore_ascii_case(&entry.tag))
            {
                return (*found).to_string();
            }
        }
    }
    NO_MATCH_LOCALE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_with_charset() {
        let ct = ContentType::parse("Text/HTML; charset=\"ISO-8859-1\"");
        assert_eq!(ct.mime, "text/html");
        assert_eq!(ct.charset, "iso-8859-1");
    }

    #[test]
    fn content_type_default_charset() {
        let ct = ContentType::parse("application/x-www-form-urlencoded");
        assert!(ct.is_form());
        assert_eq!(ct.charset, DEFAULT_CHARSET);
    }

    #[test]
    fn higher_quality_wins() {
        let got = resolve_locale(Some("en-us;q=0.8, fr;q=0.9"), &["fr", "en"]);
        assert_eq!(got, "fr");
    }

    #[test]
    fn prefix_inherits_quality() {
        let got = resolve_locale(Some("en-US, de;q=0.5"), &["de", "en"]);
        assert_eq!(got, "en");
    }

    #[test]
    fn explicit_tag_precedes_synthesized_prefix() {
        // "fr" is synthesized from "fr-ca" but "de" was sent in the same bucket
        let got = resolve_locale(Some("fr-ca, de"), &["fr", "de"]);
        assert_eq!(got, "de");
    }

    #[test]
    fn missing_header_and_no_match() {
        assert_eq!(resolve_locale(None, &["fr"]), DEFAULT_LOCALE);
        assert_eq!(resolve_locale(Some("ja"), &["fr"]), NO_MATCH_LOCALE);
        assert_ne!(DEFAULT_LOCALE, NO_MATCH_LOCALE);
    }

    #[test]
    fn zero_quality_is_ignored() {
        assert_eq!(resolve_locale(Some("fr;q=0"), &["fr"]), NO_MATCH_LOCALE);
    }

    #[test]
    fn returns_available_spelling() {
        assert_eq!(resolve_locale(Some("EN"), &["en"]), "en");
    }
}
