//! Resource-request fields nested inside a `Job`: cores, memory, and named
//! licenses/features consumed while the job runs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::SpecError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub cores: u32,
    #[serde(default)]
    pub memory: Option<Memory>,
    #[serde(default)]
    pub licenses: HashMap<String, u32>,
    #[serde(default)]
    pub features: HashMap<String, u32>,
}

impl Resources {
    pub fn check(&self) -> Result<(), SpecError> {
        if let Some(mem) = &self.memory {
            mem.check()?;
        }
        Ok(())
    }

    /// Flattens licenses into `name=count,name=count` for attribute storage.
    pub fn licenses_flat(&self) -> String {
        let mut pairs: Vec<String> = self
            .licenses
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        pairs.sort();
        pairs.join(",")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Memory {
    pub size: u32,
    #[serde(default = "default_unit")]
    pub unit: MemoryUnit,
}

fn default_unit() -> MemoryUnit {
    MemoryUnit::MB
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryUnit {
    KB,
    MB,
    GB,
    TB,
}

impl Memory {
    /// Converts this memory request into megabytes.
    pub fn in_megabytes(&self) -> f64 {
        let factor = match self.unit {
            MemoryUnit::KB => 0.1,
            MemoryUnit::MB => 1.0,
            MemoryUnit::GB => 1_000.0,
            MemoryUnit::TB => 1_000_000.0,
        };
        f64::from(self.size) * factor
    }

    fn check(&self) -> Result<(), SpecError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub name: String,
    #[serde(default = "default_count")]
    pub count: u32,
}

fn default_count() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn megabytes_conversion() {
        assert_eq!(
            Memory {
                size: 2,
                unit: MemoryUnit::GB
            }
            .in_megabytes(),
            2000.0
        );
        assert_eq!(
            Memory {
                size: 10,
                unit: MemoryUnit::KB
            }
            .in_megabytes(),
            1.0
        );
    }

    #[test]
    fn licenses_flat_is_sorted() {
        let mut resources = Resources::default();
        resources.licenses.insert("b".to_string(), 2);
        resources.licenses.insert("a".to_string(), 1);
        assert_eq!(resources.licenses_flat(), "a=1,b=2");
    }
}
