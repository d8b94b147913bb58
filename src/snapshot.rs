use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Value recorded for a component whose probe could not run.
pub const NOT_AVAILABLE: &str = "not available";

/// Monitored hardware components. Declaration order is the order used for
/// diffing and for the persisted baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Component {
    #[serde(rename = "CPU")]
    Cpu,
    #[serde(rename = "SSD")]
    Ssd,
    #[serde(rename = "GPU")]
    Gpu,
    #[serde(rename = "RAM")]
    Ram,
}

impl Component {
    pub const ALL: [Component; 4] = [Self::Cpu, Self::Ssd, Self::Gpu, Self::Ram];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Ssd => "SSD",
            Self::Gpu => "GPU",
            Self::Ram => "RAM",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    components: BTreeMap<Component, Value>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, component: Component, value: impl Into<Value>) -> Self {
        self.set(component, value);
        self
    }

    pub fn get(&self, component: Component) -> Option<&Value> {
        self.components.get(&component)
    }

    pub fn set(&mut self, component: Component, value: impl Into<Value>) {
        self.components.insert(component, value.into());
    }

    pub fn remove(&mut self, component: Component) -> Option<Value> {
        self.components.remove(&component)
    }

    /// Pretty JSON with keys in component order. Used both for persistence
    /// and for byte-level comparison in tests.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

pub fn render_value(value: Option<&Value>) -> String {
    match value {
        None => "<absent>".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
