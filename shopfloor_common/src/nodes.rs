//! OPC UA node schema types.
//!
//! Each machine publishes a fixed node set; the descriptors here are the
//! external contract and are reproduced verbatim on the observer REST surface
//! as `ns=<i>;s=<Folder>.<NodeName>` ids.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Primitive OPC UA data types used by the simulator node sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Double,
    Float,
    Int32,
    Int64,
    String,
    Bool,
    DateTime,
}

impl DataType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Double => "Double",
            Self::Float => "Float",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::String => "String",
            Self::Bool => "Bool",
            Self::DateTime => "DateTime",
        }
    }
}

/// A published node value.
///
/// Serialized untagged so observable maps render as plain JSON scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int32(i32),
    Double(f64),
    Text(String),
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int32(v as i32)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// A full named observable set for one machine at one instant.
pub type ValueMap = BTreeMap<String, Value>;

/// Describes one OPC UA node of a machine namespace.
#[derive(Debug, Clone)]
pub struct NodeDefinition {
    /// Node name, e.g. `WeldingCurrent`.
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub data_type: DataType,
    /// Engineering unit (`A`, `V`, `mm`, ...); empty when dimensionless.
    pub unit: &'static str,
    pub initial_value: Value,
}

impl NodeDefinition {
    pub const fn new(
        name: &'static str,
        display_name: &'static str,
        description: &'static str,
        data_type: DataType,
        unit: &'static str,
        initial_value: Value,
    ) -> Self {
        Self {
            name,
            display_name,
            description,
            data_type,
            unit,
            initial_value,
        }
    }
}

/// Builds the string node id for a node inside a namespace folder.
pub fn node_id(namespace: u16, folder: &str, name: &str) -> String {
    format!("ns={namespace};s={folder}.{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_json_is_scalar() {
        assert_eq!(serde_json::to_string(&Value::Double(1.5)).unwrap(), "1.5");
        assert_eq!(serde_json::to_string(&Value::Int32(7)).unwrap(), "7");
        assert_eq!(
            serde_json::to_string(&Value::Text("E001".into())).unwrap(),
            "\"E001\""
        );
    }

    #[test]
    fn test_node_id_format() {
        assert_eq!(
            node_id(2, "Robot", "WeldingCurrent"),
            "ns=2;s=Robot.WeldingCurrent"
        );
        assert_eq!(node_id(4, "SpotWelder", "WeldCount"), "ns=4;s=SpotWelder.WeldCount");
    }
}
