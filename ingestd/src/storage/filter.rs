/// Accepts files by their client-declared content type.
///
/// This is a metadata check only: the file body is never sniffed, so a client can lie. It
/// exists to refuse obviously wrong submissions before any bytes are read.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    allowed_prefix: String,
}

impl ContentFilter {
    pub fn new(allowed_prefix: impl Into<String>) -> Self {
        Self {
            allowed_prefix: allowed_prefix.into(),
        }
    }

    /// Case-sensitive prefix match on the declared type. A missing type is refused.
    pub fn accept(&self, declared_content_type: Option<&str>) -> bool {
        declared_content_type.is_some_and(|ct| ct.starts_with(&self.allowed_prefix))
    }
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::new("image/")
    }
}
