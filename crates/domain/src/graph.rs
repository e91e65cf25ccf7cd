use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::ports::BoxFuture;
use crate::ports::graph::{EdgeLabel, GraphStore, GraphStoreError, RecordRef};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
    pub source: RecordRef,
    pub label: EdgeLabel,
    pub target: RecordRef,
}

#[derive(Debug, Default)]
struct GraphState {
    nodes: HashMap<RecordRef, Value>,
    edges: BTreeSet<Edge>,
}

/// Graph store held in process memory. Creates reject existing identities,
/// merges overlay object fields, relates are set inserts, and edge targets
/// need not exist.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGraphStore {
    inner: Arc<RwLock<GraphState>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self, table: &str) -> usize {
        let guard = self.inner.read().expect("graph store lock");
        guard.nodes.keys().filter(|record| record.table == table).count()
    }

    pub fn contains(&self, record: &RecordRef) -> bool {
        let guard = self.inner.read().expect("graph store lock");
        guard.nodes.contains_key(record)
    }

    pub fn node(&self, record: &RecordRef) -> Option<Value> {
        let guard = self.inner.read().expect("graph store lock");
        guard.nodes.get(record).cloned()
    }

    pub fn edges(&self) -> Vec<Edge> {
        let guard = self.inner.read().expect("graph store lock");
        guard.edges.iter().cloned().collect()
    }

    pub fn edges_from(&self, source: &RecordRef, label: EdgeLabel) -> Vec<RecordRef> {
        let guard = self.inner.read().expect("graph store lock");
        guard
            .edges
            .iter()
            .filter(|edge| &edge.source == source && edge.label == label)
            .map(|edge| edge.target.clone())
            .collect()
    }
}

impl GraphStore for InMemoryGraphStore {
    fn create(
        &self,
        record: &RecordRef,
        content: Value,
    ) -> BoxFuture<'_, Result<(), GraphStoreError>> {
        let record = record.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.write().expect("graph store lock");
            if guard.nodes.contains_key(&record) {
                return Err(GraphStoreError::Duplicate(format!(
                    "record {record} already exists"
                )));
            }
            guard.nodes.insert(record, content);
            Ok(())
        })
    }

    fn merge(
        &self,
        record: &RecordRef,
        content: Value,
    ) -> BoxFuture<'_, Result<(), GraphStoreError>> {
        let record = record.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.write().expect("graph store lock");
            match guard.nodes.get_mut(&record) {
                Some(Value::Object(stored)) if content.is_object() => {
                    if let Value::Object(fields) = content {
                        stored.extend(fields);
                    }
                }
                _ => {
                    guard.nodes.insert(record, content);
                }
            }
            Ok(())
        })
    }

    fn get(&self, record: &RecordRef) -> BoxFuture<'_, Result<Option<Value>, GraphStoreError>> {
        let record = record.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            let guard = inner.read().expect("graph store lock");
            Ok(guard.nodes.get(&record).cloned())
        })
    }

    fn relate(
        &self,
        source: &RecordRef,
        edge: EdgeLabel,
        target: &RecordRef,
    ) -> BoxFuture<'_, Result<(), GraphStoreError>> {
        let edge = Edge {
            source: source.clone(),
            label: edge,
            target: target.clone(),
        };
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.write().expect("graph store lock");
            guard.edges.insert(edge);
            Ok(())
        })
    }
}
