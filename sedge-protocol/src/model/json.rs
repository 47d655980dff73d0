/// A string that is known to contain valid JSON.
///
/// Produced by the JSON codec after validation; the only way to construct
/// one from user data is through `serde_json` serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Json(String);

impl Json {
    /// Wrap a string that is already known to be valid JSON, e.g. one the
    /// server produced.
    #[doc(hidden)]
    pub fn new_unchecked(value: String) -> Json {
        Json(value)
    }

    pub fn from_serialize<T: serde::Serialize>(value: &T) -> Result<Json, serde_json::Error> {
        Ok(Json(serde_json::to_string(value)?))
    }
}

impl std::ops::Deref for Json {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Json {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<Json> for String {
    fn from(value: Json) -> String {
        value.0
    }
}

impl std::fmt::Display for Json {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
