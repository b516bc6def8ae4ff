//! Node and connection repositories

use crate::error::EngineError;
use crate::model::{Connection, Node, NodeId};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tokio::fs;

pub const NODES_FILE: &str = "nodes.json";
pub const CONNECTIONS_FILE: &str = "connections.json";

#[async_trait]
pub trait NodeRepository: Send + Sync {
    async fn list_all(&self) -> Result<Vec<Node>, EngineError>;

    async fn get(&self, id: NodeId) -> Result<Node, EngineError>;
}

#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    async fn list_all(&self) -> Result<Vec<Connection>, EngineError>;

    /// Connections leaving `node`
    async fn outgoing(&self, node: NodeId) -> Result<Vec<Connection>, EngineError> {
        let mut connections = ConnectionRepository::list_all(self).await?;
        connections.retain(|c| c.source == node);
        Ok(connections)
    }

    /// Connections arriving at `node`
    async fn incoming(&self, node: NodeId) -> Result<Vec<Connection>, EngineError> {
        let mut connections = ConnectionRepository::list_all(self).await?;
        connections.retain(|c| c.dest == node);
        Ok(connections)
    }
}

/// Immutable in-memory graph, usually loaded from JSON files
#[derive(Debug, Clone, Default)]
pub struct GraphRepository {
    nodes: BTreeMap<NodeId, Node>,
    connections: Vec<Connection>,
}

impl GraphRepository {
    /// Build a validated graph.
    ///
    /// Rejects duplicate node ids, connections to unknown nodes and a second
    /// connection driving the same input.
    pub fn new(nodes: Vec<Node>, connections: Vec<Connection>) -> Result<Self, EngineError> {
        let mut by_id = BTreeMap::new();
        for node in nodes {
            let id = node.id;
            if by_id.insert(id, node).is_some() {
                return Err(EngineError::DuplicateNode(id));
            }
        }

        let mut driven = HashSet::new();
        for connection in &connections {
            for id in [connection.source, connection.dest] {
                if !by_id.contains_key(&id) {
                    return Err(EngineError::NodeNotFound(id));
                }
            }
            if !driven.insert((connection.dest, connection.dest_key.as_str())) {
                return Err(EngineError::DuplicateInput {
                    node: connection.dest,
                    key: connection.dest_key.clone(),
                });
            }
        }

        Ok(Self {
            nodes: by_id,
            connections,
        })
    }

    /// Load `nodes.json` and `connections.json` from `dir`. Missing files
    /// count as empty lists.
    pub async fn load(dir: &Path) -> Result<Self, EngineError> {
        let nodes: Vec<Node> = read_list(&dir.join(NODES_FILE)).await?;
        let connections: Vec<Connection> = read_list(&dir.join(CONNECTIONS_FILE)).await?;
        tracing::info!(
            "Loaded {} nodes and {} connections from {:?}",
            nodes.len(),
            connections.len(),
            dir
        );
        Self::new(nodes, connections)
    }
}

async fn read_list<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, EngineError> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No file found at {:?}, treating as empty", path);
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl NodeRepository for GraphRepository {
    async fn list_all(&self) -> Result<Vec<Node>, EngineError> {
        Ok(self.nodes.values().cloned().collect())
    }

    async fn get(&self, id: NodeId) -> Result<Node, EngineError> {
        self.nodes
            .get(&id)
            .cloned()
            .ok_or(EngineError::NodeNotFound(id))
    }
}

#[async_trait]
impl ConnectionRepository for GraphRepository {
    async fn list_all(&self) -> Result<Vec<Connection>, EngineError> {
        Ok(self.connections.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::LogicKind;
    use tempfile::TempDir;

    fn connection(id: u64, source: NodeId, dest: NodeId, dest_key: &str) -> Connection {
        Connection {
            id,
            source,
            source_key: "output".to_string(),
            dest,
            dest_key: dest_key.to_string(),
        }
    }

    fn nodes() -> Vec<Node> {
        vec![
            Node::new(1, "A", LogicKind::And),
            Node::new(2, "B", LogicKind::And),
            Node::new(3, "C", LogicKind::And),
        ]
    }

    #[tokio::test]
    async fn test_outgoing_and_incoming() {
        let repo = GraphRepository::new(
            nodes(),
            vec![
                connection(1, 1, 2, "input1"),
                connection(2, 1, 3, "input1"),
                connection(3, 2, 3, "input2"),
            ],
        )
        .unwrap();

        assert_eq!(repo.outgoing(1).await.unwrap().len(), 2);
        assert_eq!(repo.incoming(3).await.unwrap().len(), 2);
        assert!(repo.outgoing(3).await.unwrap().is_empty());
        assert_eq!(repo.get(2).await.unwrap().name, "B");
        assert!(matches!(
            repo.get(42).await.unwrap_err(),
            EngineError::NodeNotFound(42)
        ));
    }

    #[test]
    fn test_rejects_second_driver_of_an_input() {
        let err = GraphRepository::new(
            nodes(),
            vec![connection(1, 1, 3, "input1"), connection(2, 2, 3, "input1")],
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateInput { node: 3, .. }));
    }

    #[test]
    fn test_rejects_dangling_connection() {
        let err = GraphRepository::new(nodes(), vec![connection(1, 1, 9, "input1")]).unwrap_err();
        assert!(matches!(err, EngineError::NodeNotFound(9)));
    }

    #[test]
    fn test_rejects_duplicate_node_ids() {
        let mut nodes = nodes();
        nodes.push(Node::new(1, "again", LogicKind::Clock));
        let err = GraphRepository::new(nodes, Vec::new()).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateNode(1)));
    }

    #[tokio::test]
    async fn test_load_from_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(NODES_FILE),
            r#"[
                {"id": 1, "name": "Cheap", "logic": "simple_cheapest_hours", "settings": {"on_hours": 3}},
                {"id": 2, "name": "Plug", "logic": "nodes.logics.tapo_p100.TapoP100"}
            ]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join(CONNECTIONS_FILE),
            r#"[{"id": 1, "source": 1, "source_key": "power", "dest": 2, "dest_key": "power"}]"#,
        )
        .unwrap();

        let repo = GraphRepository::load(dir.path()).await.unwrap();
        let nodes = NodeRepository::list_all(&repo).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].logic, LogicKind::TapoP100);
        assert_eq!(repo.incoming(2).await.unwrap()[0].source_key, "power");
    }

    #[tokio::test]
    async fn test_missing_files_are_an_empty_graph() {
        let dir = TempDir::new().unwrap();
        let repo = GraphRepository::load(dir.path()).await.unwrap();
        assert!(NodeRepository::list_all(&repo).await.unwrap().is_empty());
        assert!(ConnectionRepository::list_all(&repo).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_logic_fails_to_load() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(NODES_FILE),
            r#"[{"id": 1, "logic": "os.system"}]"#,
        )
        .unwrap();
        assert!(matches!(
            GraphRepository::load(dir.path()).await.unwrap_err(),
            EngineError::Json(_)
        ));
    }
}
