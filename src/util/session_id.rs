//! Identifiers for bridge sessions.

use std::fmt;
use uuid::Uuid;

/// Identifies one relayed connection pair in logs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// A fresh random id (UUID v4).
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_unique() {
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            assert!(ids.insert(SessionId::new()), "duplicate id generated");
        }
    }

    #[test]
    fn test_id_is_uuid() {
        let id = SessionId::new();
        assert_eq!(id.as_str().len(), 36);
        assert!(Uuid::parse_str(id.as_str()).is_ok());
        assert_eq!(id.to_string(), id.as_str());
    }
}
