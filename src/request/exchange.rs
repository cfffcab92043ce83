use super::params::Params;
use crate::codec::{header_safe, is_valid_header_name, HeaderMap};
use crate::config::DebugCriteria;
use crate::cookie::Cookie;
use crate::dispatcher::{raise, HandlerError};
use crate::ids::RequestId;
use crate::negotiate::{resolve_locale, ContentType, DEFAULT_CHARSET};
use serde::de::DeserializeOwned;
use tracing::warn;

/// Media type used when the handler never sets one
pub const DEFAULT_CONTENT_TYPE: &str = "text/html";

/// Non-form request body, kept with the media type it arrived under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedBody {
    pub mime: String,
    pub data: Vec<u8>,
}

/// Everything the proxy sent for one request
#[derive(Debug, Clone, Default)]
pub struct Incoming {
    pub(crate) request_id: RequestId,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Vec<u8>,
    pub(crate) content_type: Option<ContentType>,
    pub(crate) typed_body: Option<TypedBody>,
    pub(crate) cookies: Vec<(String, String)>,
    pub(crate) params: Params,
    pub(crate) path: String,
    pub(crate) method: String,
    pub(crate) debug: DebugCriteria,
}

impl Incoming {
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Raw protocol variable, e.g. `HTTP_HOST` or `REMOTE_ADDR`
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn cookies(&self) -> &[(String, String)] {
        &self.cookies
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_ref().map(|ct| ct.mime.as_str())
    }

    #[must_use]
    pub fn charset(&self) -> &str {
        self.content_type
            .as_ref()
            .map_or(DEFAULT_CHARSET, |ct| ct.charset.as_str())
    }

    /// Body bytes as received, whatever the content type
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn debug_enabled(&self, tag: &str) -> bool {
        self.debug.is_enabled(tag)
    }

    /// Non-form body of the expected media type.
    ///
    /// # Errors
    ///
    /// Raises a 404 when no body arrived or it carries another media type.
    pub fn body_as(&self, expected: &str) -> Result<&[u8], HandlerError> {
        match &self.typed_body {
            Some(tb) if tb.mime.eq_ignore_ascii_case(expected) => Ok(&tb.data),
            Some(tb) => Err(raise(
                404,
                format!("Expected {expected} body, received {}", tb.mime),
            )),
            None => Err(raise(404, format!("Expected {expected} body, received none"))),
        }
    }

    /// Deserialize an `application/json` body.
    ///
    /// # Errors
    ///
    /// 404 on a content type mismatch, 400 when the JSON does not parse.
    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        let data = self.body_as("application/json")?;
        serde_json::from_slice(data).map_err(|e| raise(400, format!("Invalid JSON body: {e}")))
    }

    /// Resolve `Accept-Language` against the locales the application offers
    #[must_use]
    pub fn locale(&self, available: &[&str]) -> String {
        resolve_locale(self.headers.get("HTTP_ACCEPT_LANGUAGE"), available)
    }
}

/// Response body; the variant is the binary flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Text(String),
    Binary(Vec<u8>),
}

impl Default for Body {
    fn default() -> Self {
        Body::Text(String::new())
    }
}

/// Response under construction
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) cookies: Vec<Cookie>,
    pub(crate) mime: String,
    pub(crate) charset: String,
    pub(crate) body: Body,
}

impl Default for Outgoing {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            cookies: Vec::new(),
            mime: DEFAULT_CONTENT_TYPE.to_string(),
            charset: DEFAULT_CHARSET.to_string(),
            body: Body::default(),
        }
    }
}

fn is_reserved(name: &str) -> bool {
    ["Status", "Content-Length", "Set-Cookie"]
        .iter()
        .any(|r| r.eq_ignore_ascii_case(name))
}

fn accepts_header(name: &str) -> bool {
    if !is_valid_header_name(name) {
        warn!(header = %name.escape_debug(), "Ignoring malformed response header name");
        return false;
    }
    if is_reserved(name) {
        warn!(header = %name, "Ignoring reserved response header");
        return false;
    }
    true
}

impl Outgoing {
    /// Replace every header named `name`.
    ///
    /// CR and LF in the value become spaces; an invalid name is ignored.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        if name.eq_ignore_ascii_case("Content-Type") {
            let ct = ContentType::parse(&header_safe(&value.into()));
            self.set_content_type(&ct.mime, &ct.charset);
            return;
        }
        if !accepts_header(name) {
            return;
        }
        let value = header_safe(&value.into()).into_owned();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value));
    }

    /// Append a header, keeping earlier ones with the same name
    pub fn add_header(&mut self, name: &str, value: impl Into<String>) {
        if name.eq_ignore_ascii_case("Content-Type") || !accepts_header(name) {
            warn!(header = %name.escape_debug(), "Ignoring response header");
            return;
        }
        let value = header_safe(&value.into()).into_owned();
        self.headers.push((name.to_string(), value));
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_content_type(&mut self, mime: &str, charset: &str) {
        self.mime = header_safe(mime).into_owned();
        self.charset = if charset.is_empty() {
            DEFAULT_CHARSET.to_string()
        } else {
            charset.to_ascii_lowercase()
        };
    }

    pub fn set_body(&mut self, text: impl Into<String>) {
        self.body = Body::Text(text.into());
    }

    /// Append text; a binary body is replaced
    pub fn append_body(&mut self, text: &str) {
        match &mut self.body {
            Body::Text(s) => s.push_str(text),
            Body::Binary(_) => self.body = Body::Text(text.to_string()),
        }
    }

    pub fn set_binary_body(&mut self, data: impl Into<Vec<u8>>) {
        self.body = Body::Binary(data.into());
    }

    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self.body, Body::Binary(_))
    }

    /// Queue a cookie; each one becomes its own `Set-Cookie` header.
    ///
    /// Cookies that could split the header line are dropped.
    pub fn set_cookie(&mut self, cookie: Cookie) {
        if !cookie.is_wire_safe() {
            warn!(cookie = %cookie.name.escape_debug(), "Dropping cookie with unsafe characters");
            return;
        }
        self.cookies.push(cookie);
    }

    pub fn delete_cookie(&mut self, name: &str, path: Option<&str>, domain: Option<&str>) {
        let mut cookie = Cookie::removal(name);
        cookie.path = path.map(str::to_string);
        cookie.domain = domain.map(str::to_string);
        self.set_cookie(cookie);
    }

    /// `Content-Type` header value
    #[must_use]
    pub fn content_type_header(&self) -> String {
        if self.is_binary() || is_json(&self.mime) {
            self.mime.clone()
        } else {
            format!("{}; charset={}", self.mime, text_charset(&self.charset))
        }
    }

    /// Body as wire bytes, text encoded with the response charset
    #[must_use]
    pub fn body_bytes(&self) -> Vec<u8> {
        match &self.body {
            Body::Binary(data) => data.clone(),
            Body::Text(text) if is_json(&self.mime) => text.as_bytes().to_vec(),
            Body::Text(text) => encode_text(text, &self.charset),
        }
    }
}

/// JSON is always UTF-8 and takes no charset parameter
fn is_json(mime: &str) -> bool {
    mime == "application/json" || mime.ends_with("+json")
}

/// Charset label actually used on the wire
fn text_charset(charset: &str) -> &str {
    match charset {
        "iso-8859-1" | "latin1" | "us-ascii" | "ascii" => charset,
        _ => DEFAULT_CHARSET,
    }
}

fn encode_text(text: &str, charset: &str) -> Vec<u8> {
    let limit = match charset {
        "iso-8859-1" | "latin1" => 0xFF,
        "us-ascii" | "ascii" => 0x7F,
        _ => return text.as_bytes().to_vec(),
    };
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).ok().filter(|b| u32::from(*b) <= limit).unwrap_or(b'?'))
        .collect()
}

/// Handler view of one request: read-only incoming side, mutable response
pub struct Exchange<'a> {
    pub incoming: &'a Incoming,
    pub outgoing: &'a mut Outgoing,
}

impl<'a> std::ops::Deref for Exchange<'a> {
    type Target = Incoming;

    fn deref(&self) -> &Incoming {
        self.incoming
    }
}

impl<'a> Exchange<'a> {
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.outgoing.set_header(name, value);
    }

    pub fn add_header(&mut self, name: &str, value: impl Into<String>) {
        self.outgoing.add_header(name, value);
    }

    pub fn set_content_type(&mut self, mime: &str, charset: &str) {
        self.outgoing.set_content_type(mime, charset);
    }

    pub fn set_body(&mut self, text: impl Into<String>) {
        self.outgoing.set_body(text);
    }

    pub fn append_body(&mut self, text: &str) {
        self.outgoing.append_body(text);
    }

    pub fn set_binary_body(&mut self, data: impl Into<Vec<u8>>) {
        self.outgoing.set_binary_body(data);
    }

    pub fn set_cookie(&mut self, cookie: Cookie) {
        self.outgoing.set_cookie(cookie);
    }

    pub fn delete_cookie(&mut self, name: &str, path: Option<&str>, domain: Option<&str>) {
        self.outgoing.delete_cookie(name, path, domain);
    }

    /// Serialize `value` as the JSON response body
    ///
    /// # Errors
    ///
    /// Serialization failures surface as internal faults.
    pub fn set_json<T: serde::Serialize>(&mut self, value: &T) -> Result<(), HandlerError> {
        let text = serde_json::to_string(value)?;
        self.outgoing.set_content_type("application/json", DEFAULT_CHARSET);
        self.outgoing.set_body(text);
        Ok(())
    }
}
