use std::collections::HashMap;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sf_core::StoryForgeError;

/// On-disk flag encoding. Older saves store a plain list of set flag names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PersistedFlags {
    Bitmask {
        bitmask: String,
        registry: Vec<(String, u64)>,
    },
    Legacy(Vec<String>),
}

impl Default for PersistedFlags {
    fn default() -> Self {
        Self::Legacy(Vec::new())
    }
}

/// Named boolean flags packed into one arbitrary-width bitmask.
///
/// Bits are assigned on first use and never reused, so a bit position stays
/// stable for the lifetime of a save.
#[derive(Debug, Clone, Default)]
pub struct FlagSet {
    bits: BigUint,
    registry: HashMap<String, u64>,
    next_bit: u64,
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn bit_for(&mut self, name: &str) -> u64 {
        if let Some(bit) = self.registry.get(name) {
            return *bit;
        }
        let bit = self.next_bit;
        self.registry.insert(name.to_string(), bit);
        self.next_bit += 1;
        bit
    }

    pub fn set(&mut self, name: &str) {
        let bit = self.bit_for(name);
        self.bits.set_bit(bit, true);
    }

    pub fn clear(&mut self, name: &str) {
        if let Some(bit) = self.registry.get(name).copied() {
            self.bits.set_bit(bit, false);
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.registry
            .get(name)
            .map(|bit| self.bits.bit(*bit))
            .unwrap_or(false)
    }

    pub fn clear_all(&mut self) {
        self.bits = BigUint::default();
    }

    /// Set flag names in bit order.
    pub fn names(&self) -> Vec<String> {
        let mut set = self
            .registry
            .iter()
            .filter(|(_, bit)| self.bits.bit(**bit))
            .collect::<Vec<_>>();
        set.sort_by_key(|(_, bit)| **bit);
        set.into_iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.registry
            .values()
            .filter(|bit| self.bits.bit(**bit))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_persisted(&self) -> PersistedFlags {
        let mut registry = self
            .registry
            .iter()
            .map(|(name, bit)| (name.clone(), *bit))
            .collect::<Vec<_>>();
        registry.sort_by_key(|(_, bit)| *bit);
        PersistedFlags::Bitmask {
            bitmask: self.bits.to_str_radix(10),
            registry,
        }
    }

    pub fn from_persisted(persisted: &PersistedFlags) -> Result<Self, StoryForgeError> {
        match persisted {
            PersistedFlags::Legacy(names) => {
                let mut flags = Self::new();
                for name in names {
                    flags.set(name);
                }
                Ok(flags)
            }
            PersistedFlags::Bitmask { bitmask, registry } => {
                let bits = BigUint::parse_bytes(bitmask.as_bytes(), 10).ok_or_else(|| {
                    StoryForgeError::new(
                        "RUNTIME_FLAGS_INVALID",
                        format!("Flag bitmask \"{}\" is not a decimal integer.", bitmask),
                    )
                })?;
                let next_bit = registry.iter().map(|(_, bit)| bit + 1).max().unwrap_or(0);
                Ok(Self {
                    bits,
                    registry: registry.iter().cloned().collect(),
                    next_bit,
                })
            }
        }
    }
}
