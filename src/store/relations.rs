use crate::config::types::RelationConfig;
use crate::labels::{LabelSet, JUJU_APPLICATION, JUJU_MODEL, JUJU_MODEL_UUID};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// Topology an application announced when it related to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub model: String,
    pub model_uuid: String,
}

/// Outcome of checking a stream's labels against the registered relations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationCheck {
    Consistent,
    /// No relation for this application
    Unknown { application: String },
    Mismatch {
        application: String,
        label: &'static str,
        expected: String,
        actual: String,
    },
}

/// Relations registered at startup or over the API, keyed by application.
#[derive(Debug, Default)]
pub struct RelationRegistry {
    relations: RwLock<BTreeMap<String, Relation>>,
}

impl RelationRegistry {
    pub fn from_config(relations: &[RelationConfig]) -> Self {
        let registry = Self::default();
        for relation in relations {
            registry.register(
                &relation.application,
                Relation {
                    model: relation.model.clone(),
                    model_uuid: relation.model_uuid.clone(),
                },
            );
        }
        registry
    }

    /// Returns the relation it replaced, if any.
    pub fn register(&self, application: &str, relation: Relation) -> Option<Relation> {
        self.relations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(application.to_string(), relation)
    }

    pub fn remove(&self, application: &str) -> Option<Relation> {
        self.relations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(application)
    }

    pub fn get(&self, application: &str) -> Option<Relation> {
        self.relations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(application)
            .cloned()
    }

    pub fn list(&self) -> BTreeMap<String, Relation> {
        self.relations.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn check(&self, labels: &LabelSet) -> RelationCheck {
        let application = labels.value_or_empty(JUJU_APPLICATION);
        let Some(relation) = self.get(application) else {
            return RelationCheck::Unknown {
                application: application.to_string(),
            };
        };

        for (label, expected) in [(JUJU_MODEL, &relation.model), (JUJU_MODEL_UUID, &relation.model_uuid)] {
            let actual = labels.value_or_empty(label);
            if actual != expected.as_str() {
                return RelationCheck::Mismatch {
                    application: application.to_string(),
                    label,
                    expected: expected.clone(),
                    actual: actual.to_string(),
                };
            }
        }
        RelationCheck::Consistent
    }
}
