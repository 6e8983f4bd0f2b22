use std::fmt;

use couchkit_core::Result;
use serde_json::Value;

/// Turns sub-document values into bytes and back
pub trait JsonSerializer: Send + Sync + fmt::Debug {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>>;
    fn deserialize(&self, bytes: &[u8]) -> Result<Value>;
}

/// serde_json with no extra processing
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultJsonSerializer;

impl JsonSerializer for DefaultJsonSerializer {
    fn serialize(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
