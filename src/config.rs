//! Configuration for a [`RefSpace`](crate::RefSpace)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefConfig {
    #[serde(default = "default_value_capacity")]
    pub value_pool_capacity: usize,

    #[serde(default = "default_small_capacity")]
    pub context_pool_capacity: usize,

    #[serde(default = "default_small_capacity")]
    pub runtime_pool_capacity: usize,

    #[serde(default = "default_value_capacity")]
    pub registry_capacity: usize,

    /// Warn when a pool or registry is dropped while still tracking entries.
    #[serde(default = "default_true")]
    pub leak_warnings: bool,
}

fn default_value_capacity() -> usize {
    256
}

fn default_small_capacity() -> usize {
    8
}

fn default_true() -> bool {
    true
}

impl Default for RefConfig {
    fn default() -> Self {
        Self {
            value_pool_capacity: default_value_capacity(),
            context_pool_capacity: default_small_capacity(),
            runtime_pool_capacity: default_small_capacity(),
            registry_capacity: default_value_capacity(),
            leak_warnings: default_true(),
        }
    }
}

impl RefConfig {
    /// Defaults overridden by `JSREF_POOL_CAPACITY`, `JSREF_REGISTRY_CAPACITY`
    /// and `JSREF_LEAK_WARNINGS`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(capacity) = env_usize("JSREF_POOL_CAPACITY") {
            config.value_pool_capacity = capacity;
        }
        if let Some(capacity) = env_usize("JSREF_REGISTRY_CAPACITY") {
            config.registry_capacity = capacity;
        }
        if let Ok(val) = std::env::var("JSREF_LEAK_WARNINGS") {
            config.leak_warnings = !(val == "0" || val.eq_ignore_ascii_case("false"));
        }

        config
    }

    pub fn from_toml_str(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    pub fn with_leak_warnings(mut self, enabled: bool) -> Self {
        self.leak_warnings = enabled;
        self
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.trim().parse().ok()
}
