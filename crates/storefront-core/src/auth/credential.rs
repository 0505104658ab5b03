use std::fmt;

/// An opaque bearer token.
///
/// `Debug` is redacted so a credential can sit inside structs that get logged.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}
