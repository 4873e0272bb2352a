/// Opaque pagination token returned by the search API
///
/// A cursor is only meaningful to the API that issued it, and only for the
/// query that produced it. It deliberately has no ordering or equality; the
/// only supported operation is handing it back on the next page request.
#[derive(Debug, Clone)]
pub struct Cursor(String);

impl Cursor {
    /// Wraps a raw token received from the API
    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token for sending back to the API
    pub fn as_token(&self) -> &str {
        &self.0
    }
}
