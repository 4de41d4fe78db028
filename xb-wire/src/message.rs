/// The atomic payload exchanged end to end (§3).
///
/// `key` and `qos` are opaque XML documents as far as this crate is
/// concerned — we only ever read the handful of client-property names
/// listed in §6.3 out of `qos`, never parse it as XML.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageUnit {
    /// Opaque string identifying the topic and metadata.
    pub key: String,
    /// Byte sequence of known length; may be empty.
    pub content: Vec<u8>,
    /// Opaque string carrying quality-of-service attributes.
    pub qos: String,
}

impl MessageUnit {
    pub fn new(key: impl Into<String>, content: impl Into<Vec<u8>>, qos: impl Into<String>) -> Self {
        MessageUnit {
            key: key.into(),
            content: content.into(),
            qos: qos.into(),
        }
    }

    /// Look up a `<clientProperty name='X'>value</clientProperty>` style
    /// client property embedded in `qos` (§6.3). This is a narrow,
    /// line-oriented scan — not an XML parser — matching the "opaque except
    /// for a few property names" contract.
    pub fn qos_property(&self, name: &str) -> Option<&str> {
        find_client_property(&self.qos, name)
    }

    /// Look up an `attr='value'` style XML attribute on `key`, e.g. `oid`
    /// on `<key oid='HelloWorld'/>`. Same narrow-scan contract as
    /// [`Self::qos_property`] — not a real XML parser.
    pub fn key_attribute(&self, name: &str) -> Option<&str> {
        find_property(&self.key, name)
    }
}

/// Finds `<clientProperty name='NAME'>...</clientProperty>` and returns the
/// text between the tags.
fn find_client_property<'a>(qos: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("<clientProperty name='{}'>", name);
    let start = qos.find(&needle)? + needle.len();
    let rest = &qos[start..];
    let end = rest.find("</clientProperty>")?;
    Some(&rest[..end])
}

/// Simple `attr='value'` style attribute lookup, for key/qos elements that
/// encode data as XML attributes rather than client properties (e.g. `<key
/// oid='HelloWorld'/>`).
fn find_property<'a>(qos: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("{}='", name);
    let start = qos.find(&needle)? + needle.len();
    let rest = &qos[start..];
    let end = rest.find('\'')?;
    Some(&rest[..end])
}
