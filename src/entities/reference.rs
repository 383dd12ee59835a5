// Reference tables: status descriptions and message field layouts

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusType {
    pub status: i32,
    pub description: String,
}

/// One field of a message layout (table `spk_fields`)
///
/// Keyed by (message_type, flow, name); listed in `position` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub message_type: String,
    pub flow: String,
    pub name: String,
    pub description: Option<String>,
    pub position: Option<i32>,
    pub length: Option<i32>,
}
