//! Node identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identity of one elevator node.
///
/// Membership is a closed, statically configured set; ids are small positive
/// integers. On the wire (and towards the assigner) an id is its decimal
/// string, because snapshot `states` maps are keyed by it in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>().map(NodeId)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        NodeId(id)
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_node_id_is_a_string_on_the_wire() {
        let json = serde_json::to_string(&NodeId(3)).unwrap();
        assert_eq!(json, "\"3\"");

        let id: NodeId = serde_json::from_str("\"17\"").unwrap();
        assert_eq!(id, NodeId(17));
    }

    #[test]
    fn test_node_id_keys_maps_as_strings() {
        let mut map = BTreeMap::new();
        map.insert(NodeId(1), true);
        map.insert(NodeId(2), false);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"1":true,"2":false}"#);
    }
}
