//! Mutation Observer API
//!
//! Observe DOM changes. Records are queued as mutations happen and
//! delivered to each observer as one batch per microtask checkpoint.

use crate::{DomError, DomTree, NodeId};
use std::collections::BTreeMap;
use std::rc::Rc;

/// Mutation type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationType {
    Attributes,
    CharacterData,
    ChildList,
}

/// Mutation record
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    pub mutation_type: MutationType,
    pub target: NodeId,
    pub added_nodes: Vec<NodeId>,
    pub removed_nodes: Vec<NodeId>,
    pub previous_sibling: Option<NodeId>,
    pub next_sibling: Option<NodeId>,
    pub attribute_name: Option<String>,
    pub old_value: Option<String>,
}

impl MutationRecord {
    /// Record for nodes inserted into or removed from `target`
    pub fn child_list(
        target: NodeId,
        added_nodes: Vec<NodeId>,
        removed_nodes: Vec<NodeId>,
        previous_sibling: Option<NodeId>,
        next_sibling: Option<NodeId>,
    ) -> Self {
        Self {
            mutation_type: MutationType::ChildList,
            target,
            added_nodes,
            removed_nodes,
            previous_sibling,
            next_sibling,
            attribute_name: None,
            old_value: None,
        }
    }

    /// Record for an attribute change
    pub fn attributes(target: NodeId, name: &str, old_value: Option<String>) -> Self {
        Self {
            mutation_type: MutationType::Attributes,
            target,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
            previous_sibling: None,
            next_sibling: None,
            attribute_name: Some(name.to_string()),
            old_value,
        }
    }

    /// Record for a text/comment data change
    pub fn character_data(target: NodeId, old_value: String) -> Self {
        Self {
            mutation_type: MutationType::CharacterData,
            target,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
            previous_sibling: None,
            next_sibling: None,
            attribute_name: None,
            old_value: Some(old_value),
        }
    }
}

/// Mutation observer options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationObserverInit {
    pub child_list: bool,
    pub attributes: bool,
    pub character_data: bool,
    pub subtree: bool,
    pub attribute_old_value: bool,
    pub character_data_old_value: bool,
    pub attribute_filter: Option<Vec<String>>,
}

impl MutationObserverInit {
    /// Reject option sets `observe()` refuses in the DOM
    pub fn validate(&self) -> Result<(), DomError> {
        if !self.child_list && !self.attributes && !self.character_data {
            return Err(DomError::InvalidObserverInit(
                "one of childList, attributes or characterData must be set",
            ));
        }
        if !self.attributes && (self.attribute_old_value || self.attribute_filter.is_some()) {
            return Err(DomError::InvalidObserverInit(
                "attributeOldValue and attributeFilter require attributes",
            ));
        }
        if !self.character_data && self.character_data_old_value {
            return Err(DomError::InvalidObserverInit(
                "characterDataOldValue requires characterData",
            ));
        }
        Ok(())
    }

    fn wants(&self, record: &MutationRecord) -> bool {
        match record.mutation_type {
            MutationType::ChildList => self.child_list,
            MutationType::CharacterData => self.character_data,
            MutationType::Attributes => {
                self.attributes
                    && match (&self.attribute_filter, &record.attribute_name) {
                        (Some(filter), Some(name)) => filter.iter().any(|f| f == name),
                        _ => true,
                    }
            }
        }
    }

    fn wants_old_value(&self, kind: MutationType) -> bool {
        match kind {
            MutationType::Attributes => self.attribute_old_value,
            MutationType::CharacterData => self.character_data_old_value,
            MutationType::ChildList => false,
        }
    }
}

/// Batch callback
pub type MutationCallback = Rc<dyn Fn(Vec<MutationRecord>)>;

/// Observer handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub u64);

struct Registration {
    target: NodeId,
    options: MutationObserverInit,
}

struct ObserverEntry {
    callback: MutationCallback,
    registrations: Vec<Registration>,
    pending: Vec<MutationRecord>,
}

/// Every mutation observer of a document, in creation order
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    observers: BTreeMap<ObserverId, ObserverEntry>,
    next_id: u64,
}

impl ObserverRegistry {
    pub fn create(&mut self, callback: MutationCallback) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.observers.insert(
            id,
            ObserverEntry {
                callback,
                registrations: Vec::new(),
                pending: Vec::new(),
            },
        );
        id
    }

    /// Observe a target; observing the same target again replaces its options
    pub fn observe(
        &mut self,
        id: ObserverId,
        target: NodeId,
        options: MutationObserverInit,
    ) -> Result<(), DomError> {
        options.validate()?;
        let entry = self
            .observers
            .get_mut(&id)
            .ok_or(DomError::UnknownObserver(id.0))?;
        match entry.registrations.iter_mut().find(|r| r.target == target) {
            Some(existing) => existing.options = options,
            None => entry.registrations.push(Registration { target, options }),
        }
        Ok(())
    }

    /// Stop observing all targets and drop queued records
    pub fn disconnect(&mut self, id: ObserverId) {
        if let Some(entry) = self.observers.get_mut(&id) {
            entry.registrations.clear();
            entry.pending.clear();
        }
    }

    pub fn take_records(&mut self, id: ObserverId) -> Vec<MutationRecord> {
        self.observers
            .get_mut(&id)
            .map(|e| std::mem::take(&mut e.pending))
            .unwrap_or_default()
    }

    pub fn remove(&mut self, id: ObserverId) {
        self.observers.remove(&id);
    }

    pub fn is_observing(&self, id: ObserverId, target: NodeId) -> bool {
        self.observers
            .get(&id)
            .is_some_and(|e| e.registrations.iter().any(|r| r.target == target))
    }

    /// Queue a record for every interested observer. Returns true if any
    /// observer queued it.
    pub fn enqueue(&mut self, record: &MutationRecord, tree: &DomTree) -> bool {
        let mut queued = false;
        for entry in self.observers.values_mut() {
            let mut interested = false;
            let mut old_value = false;
            for reg in &entry.registrations {
                let in_scope = reg.target == record.target
                    || (reg.options.subtree
                        && tree.is_inclusive_ancestor(reg.target, record.target));
                if in_scope && reg.options.wants(record) {
                    interested = true;
                    old_value |= reg.options.wants_old_value(record.mutation_type);
                }
            }
            if interested {
                let mut record = record.clone();
                if !old_value {
                    record.old_value = None;
                }
                entry.pending.push(record);
                queued = true;
            }
        }
        queued
    }

    /// Drain every non-empty queue, in observer creation order
    pub fn take_deliveries(&mut self) -> Vec<(MutationCallback, Vec<MutationRecord>)> {
        self.observers
            .values_mut()
            .filter(|e| !e.pending.is_empty())
            .map(|e| (e.callback.clone(), std::mem::take(&mut e.pending)))
            .collect()
    }
}
