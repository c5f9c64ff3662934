//! Inbox capability carried in the page address fragment.
//!
//! The fragment has the shape `#/<email>` or `#/<email>?key=<urlencoded>`,
//! where `key` is the base64 PKCS#8 private key of the inbox. Fragments are
//! not sent to servers, so the key stays on the client.
//!
//! # Trust boundary
//!
//! The key is a bearer capability: anything that can read the address bar
//! or the browsing history can decrypt the inbox. Share the full address
//! only with whoever should read the mail.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;
use url::form_urlencoded;

// Characters that `Url::set_fragment` escapes, or that split the fragment,
// cannot be part of an address that has to read back unchanged.
static EMAIL_SHAPE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"^[^\s@"<>`?#%]+@[^\s@"<>`?#%]+\.[^\s@"<>`?#%]+$"#).ok()
});

/// The `(email, key)` pair decoded from an address fragment.
///
/// Each half is independently absent when missing or malformed. A missing
/// key means the inbox is viewed without decryption.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlCapability {
    /// Inbox address, present only if it has a `local@domain.tld` shape.
    pub email: Option<String>,
    /// Base64 private key, already percent-decoded.
    pub key: Option<String>,
}

/// Returns `true` if `email` has a basic `local@domain.tld` shape and no
/// character that the fragment would escape or split on.
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_SHAPE.as_ref().is_some_and(|re| re.is_match(email))
}

/// Parses a fragment (without the leading `#`).
#[must_use]
pub fn parse_fragment(fragment: &str) -> UrlCapability {
    let mut parts = fragment.split('?');
    let path = parts.next().unwrap_or_default();
    let query = parts.next().unwrap_or_default();

    let candidate = path.strip_prefix('/').unwrap_or(path);
    let email = is_valid_email(candidate).then(|| candidate.to_string());

    let key = form_urlencoded::parse(query.as_bytes())
        .find(|(name, _)| name == "key")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty());

    UrlCapability { email, key }
}

/// Formats a fragment (without the leading `#`) for `email` and an
/// optional key. An empty key is treated as absent.
#[must_use]
pub fn format_fragment(email: &str, key: Option<&str>) -> String {
    match key.filter(|k| !k.is_empty()) {
        Some(key) => {
            let encoded: String = form_urlencoded::byte_serialize(key.as_bytes()).collect();
            format!("/{email}?key={encoded}")
        }
        None => format!("/{email}"),
    }
}

/// Access to the page address.
///
/// `replace` swaps the current address in place: no navigation, no reload
/// and no new history entry.
pub trait AddressBar {
    /// Returns the current address.
    fn current(&self) -> Url;

    /// Replaces the current address without navigating.
    fn replace(&mut self, url: Url);
}

/// In-memory [`AddressBar`], used by the CLI and tests.
#[derive(Debug, Clone)]
pub struct MemoryAddressBar {
    url: Url,
    replacements: usize,
}

impl MemoryAddressBar {
    /// Creates an address bar showing `url`.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            replacements: 0,
        }
    }

    /// Number of in-place replacements performed so far.
    #[must_use]
    pub fn replacements(&self) -> usize {
        self.replacements
    }
}

impl AddressBar for MemoryAddressBar {
    fn current(&self) -> Url {
        self.url.clone()
    }

    fn replace(&mut self, url: Url) {
        self.url = url;
        self.replacements += 1;
    }
}

/// Reads and writes the inbox capability on an [`AddressBar`].
#[derive(Debug)]
pub struct CapabilityTransport<A> {
    address: A,
}

impl<A: AddressBar> CapabilityTransport<A> {
    /// Wraps an address bar.
    pub fn new(address: A) -> Self {
        Self { address }
    }

    /// Decodes the capability from the current fragment.
    #[must_use]
    pub fn read_capability(&self) -> UrlCapability {
        self.address
            .current()
            .fragment()
            .map(parse_fragment)
            .unwrap_or_default()
    }

    /// Returns only the inbox address, ignoring any key query.
    #[must_use]
    pub fn read_email(&self) -> Option<String> {
        self.read_capability().email
    }

    /// Rewrites the fragment to carry `email` and, if given, `key`.
    ///
    /// Origin, path and query of the page are preserved.
    pub fn write_capability(&mut self, email: &str, key: Option<&str>) {
        let mut url = self.address.current();
        url.set_fragment(Some(&format_fragment(email, key)));
        tracing::debug!(with_key = key.is_some_and(|k| !k.is_empty()), "capability rewritten");
        self.address.replace(url);
    }

    /// Returns the wrapped address bar.
    pub fn address(&self) -> &A {
        &self.address
    }
}
