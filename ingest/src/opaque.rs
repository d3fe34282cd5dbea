use serde_json::Value;

/// A vendor sub-structure whose shape is not modeled, kept as its JSON encoding.
///
/// `serde_json` maps keep their keys sorted, so the same structure always encodes to
/// the same text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpaqueValue(String);

impl OpaqueValue {
    /// A missing field encodes the same way as an explicit `null`.
    pub fn encode(value: Option<&Value>) -> Self {
        OpaqueValue(value.unwrap_or(&Value::Null).to_string())
    }

    pub fn decode(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for OpaqueValue {
    fn from(encoded: String) -> Self {
        OpaqueValue(encoded)
    }
}
