//! Post code triggered actions.
//!
//! Rules are loaded once at startup. A code matches the first rule with the
//! same primary code whose secondary payload is either unset or equal.

use std::{collections::BTreeMap, fs, path::Path};

use ron::{Options, extensions::Extensions};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, span, Level};

use crate::codes::PostCode;

pub mod error;
pub mod systemd;

pub use error::{ActionError, RuleError};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ActionRule {
    pub primary: u64,
    #[serde(default)]
    pub secondary: Option<Vec<u8>>,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub event: Option<EventDescriptor>,
}

impl ActionRule {
    pub fn matches(&self, code: &PostCode) -> bool {
        self.primary == code.primary
            && self
                .secondary
                .as_ref()
                .is_none_or(|secondary| *secondary == code.secondary)
    }

    fn validate(&self, index: usize) -> Result<(), RuleError> {
        let invalid = |reason| RuleError::Invalid {
            index,
            primary: self.primary,
            reason,
        };

        if self.targets.is_empty() && self.event.is_none() {
            return Err(invalid("rule has neither targets nor an event"));
        }
        if self.targets.iter().any(|t| t.trim().is_empty()) {
            return Err(invalid("empty target name"));
        }
        if let Some(event) = &self.event {
            if event.name.trim().is_empty() {
                return Err(invalid("empty event name"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EventDescriptor {
    pub name: String,
    #[serde(default)]
    pub args: BTreeMap<String, EventArg>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum EventArg {
    Int(i64),
    Str(String),
}

/// Immutable, ordered rule set
#[derive(Debug, Clone, Default)]
pub struct ActionTable {
    rules: Vec<ActionRule>,
}

impl ActionTable {
    pub fn new(rules: Vec<ActionRule>) -> Result<Self, RuleError> {
        for (index, rule) in rules.iter().enumerate() {
            rule.validate(index)?;
        }
        Ok(Self { rules })
    }

    /// Loads a rule list, JSON for `.json` files and RON otherwise
    pub fn from_file(path: &Path) -> Result<Self, RuleError> {
        let content = fs::read_to_string(path).map_err(|source| RuleError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::new(serde_json::from_str(&content)?),
            _ => Self::parse(&content),
        }
    }

    pub fn parse(s: &str) -> Result<Self, RuleError> {
        let options = Options::default()
            .with_default_extension(Extensions::IMPLICIT_SOME)
            .with_default_extension(Extensions::UNWRAP_NEWTYPES);
        Self::new(options.from_str(s)?)
    }

    pub fn find(&self, code: &PostCode) -> Option<&ActionRule> {
        self.rules.iter().find(|rule| rule.matches(code))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

pub trait UnitStarter: Send + Sync {
    fn start_unit(&self, unit: &str) -> Result<(), ActionError>;
}

pub trait EventSink: Send + Sync {
    fn raise(&self, event: &EventDescriptor, code: &PostCode) -> Result<(), ActionError>;
}

pub struct ActionDispatcher {
    table: ActionTable,
    units: Box<dyn UnitStarter>,
    events: Box<dyn EventSink>,
}

impl ActionDispatcher {
    pub fn new(
        table: ActionTable,
        units: Box<dyn UnitStarter>,
        events: Box<dyn EventSink>,
    ) -> Self {
        Self {
            table,
            units,
            events,
        }
    }

    /// Dispatcher for the host system: systemd units and logged events
    pub fn system(table: ActionTable) -> Self {
        Self::new(table, Box::new(systemd::SystemdUnits), Box::new(systemd::LogEvents))
    }

    pub fn find(&self, code: &PostCode) -> Option<&ActionRule> {
        self.table.find(code)
    }

    /// Fires the actions of the first matching rule.
    /// Failures are logged per target and never stop the remaining ones.
    pub fn dispatch(&self, code: &PostCode) {
        let Some(rule) = self.find(code) else {
            return;
        };

        let span = span!(Level::INFO, "Action Dispatch", %code);
        let _enter = span.enter();
        debug!(targets = rule.targets.len(), "matched rule");

        for unit in &rule.targets {
            if let Err(e) = self.units.start_unit(unit) {
                error!("{e}");
            }
        }

        if let Some(event) = &rule.event {
            if let Err(e) = self.events.raise(event, code) {
                error!("{e}");
            }
        }
    }
}

#[cfg(test)]
pub mod recording {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Records every action instead of performing it
    #[derive(Clone, Default)]
    pub struct Recorder {
        pub units: Arc<Mutex<Vec<String>>>,
        pub events: Arc<Mutex<Vec<(String, PostCode)>>>,
        pub fail_units: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        pub fn dispatcher(&self, table: ActionTable) -> ActionDispatcher {
            ActionDispatcher::new(table, Box::new(self.clone()), Box::new(self.clone()))
        }

        pub fn units(&self) -> Vec<String> {
            self.units.lock().unwrap().clone()
        }

        pub fn events(&self) -> Vec<(String, PostCode)> {
            self.events.lock().unwrap().clone()
        }
    }

    impl UnitStarter for Recorder {
        fn start_unit(&self, unit: &str) -> Result<(), ActionError> {
            self.units.lock().unwrap().push(unit.to_string());
            if self.fail_units.lock().unwrap().iter().any(|u| u == unit) {
                return Err(ActionError::Failed {
                    unit: unit.to_string(),
                    reason: "refused".to_string(),
                });
            }
            Ok(())
        }
    }

    impl EventSink for Recorder {
        fn raise(&self, event: &EventDescriptor, code: &PostCode) -> Result<(), ActionError> {
            self.events
                .lock()
                .unwrap()
                .push((event.name.clone(), code.clone()));
            Ok(())
        }
    }
}
