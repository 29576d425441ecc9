use serde::{Deserialize, Serialize};

/// Identifier of the logical object a stream of versioned events belongs to.
///
/// All versions sharing an object id are published strictly in ascending
/// order; different object ids are independent of each other.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// Creates an object id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the id is empty or only whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

impl AsRef<str> for ObjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_preserves_value() {
        let id = ObjectId::new("ABC124");
        assert_eq!(id.as_str(), "ABC124");
        assert_eq!(id.to_string(), "ABC124");
    }

    #[test]
    fn test_object_id_blank_detection() {
        assert!(ObjectId::new("").is_blank());
        assert!(ObjectId::new("  ").is_blank());
        assert!(!ObjectId::new("A").is_blank());
    }

    #[test]
    fn test_object_id_serializes_as_plain_string() {
        let id = ObjectId::from("parcel-7");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"parcel-7\"");
        let deserialized: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }
}
