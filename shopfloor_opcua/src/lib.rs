//! OPC UA sink for the shopfloor simulator.
//!
//! Manages the address space (one namespace per machine, a folder with a
//! fixed node set each) and receives a full value map per namespace per tick
//! from the simulation thread. Endpoint `opc.tcp://0.0.0.0:<port>` with
//! anonymous access and security policy none; the server certificate is
//! self-provisioned under `./pki/` on first run and reused afterwards.
//!
//! The sink deliberately stops short of a conformant OPC UA stack: when the
//! endpoint port or PKI is unavailable it degrades to value-storage-only
//! mode, retaining the published values for the observer REST surface while
//! the simulation keeps running.

pub mod pki;

use shopfloor_common::nodes::{node_id, NodeDefinition, Value, ValueMap};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Error type for sink operations.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("namespace {0} already registered")]
    NamespaceExists(u16),

    #[error("pki provisioning failed: {0}")]
    Pki(String),

    #[error("endpoint bind failed: {0}")]
    Bind(#[from] std::io::Error),
}

/// How the sink currently operates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    /// Not started yet.
    Stopped,
    /// Endpoint bound, values retained and exposed.
    Online,
    /// Endpoint unavailable; values retained in memory only.
    ValueStorageOnly,
}

/// One machine namespace: folder plus its node set and latest values.
struct Namespace {
    folder: String,
    #[allow(dead_code)]
    description: String,
    nodes: Vec<NodeDefinition>,
    values: ValueMap,
}

/// The OPC UA server sink.
///
/// Registration happens at startup from the simulation wiring; value updates
/// arrive once per tick. Concurrent reads (observer REST) go through the
/// internal lock, so the simulation thread is never blocked for long.
pub struct OpcUaServer {
    port: u16,
    application_name: String,
    pki_dir: std::path::PathBuf,
    namespaces: Arc<Mutex<BTreeMap<u16, Namespace>>>,
    mode: ServerMode,
    listener_task: Option<JoinHandle<()>>,
}

impl OpcUaServer {
    pub fn new(port: u16, application_name: &str) -> Self {
        Self {
            port,
            application_name: application_name.to_string(),
            pki_dir: std::path::PathBuf::from("./pki"),
            namespaces: Arc::new(Mutex::new(BTreeMap::new())),
            mode: ServerMode::Stopped,
            listener_task: None,
        }
    }

    /// Override the PKI directory (tests).
    pub fn with_pki_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.pki_dir = dir.into();
        self
    }

    /// The endpoint URL clients connect to.
    pub fn endpoint(&self) -> String {
        format!("opc.tcp://0.0.0.0:{}", self.port)
    }

    pub fn mode(&self) -> ServerMode {
        self.mode
    }

    /// Register a machine namespace with its folder and node set.
    ///
    /// Node values start at their schema initial values.
    pub fn register_namespace(
        &self,
        namespace: u16,
        folder: &str,
        description: &str,
        nodes: Vec<NodeDefinition>,
    ) -> Result<(), SinkError> {
        let mut spaces = self.lock_namespaces();
        if spaces.contains_key(&namespace) {
            return Err(SinkError::NamespaceExists(namespace));
        }

        let values = nodes
            .iter()
            .map(|n| (n.name.to_string(), n.initial_value.clone()))
            .collect();
        spaces.insert(
            namespace,
            Namespace {
                folder: folder.to_string(),
                description: description.to_string(),
                nodes,
                values,
            },
        );
        info!(namespace, folder, "OPC UA namespace registered");
        Ok(())
    }

    /// Start the endpoint.
    ///
    /// PKI or bind failures degrade to value-storage-only mode with a
    /// warning; the caller decides whether that is fatal (strict mode).
    pub async fn start(&mut self) -> Result<(), SinkError> {
        if let Err(err) = pki::ensure_pki(&self.pki_dir, &self.application_name) {
            warn!(error = %err, "PKI provisioning failed - OPC UA endpoint disabled");
            self.mode = ServerMode::ValueStorageOnly;
            return Ok(());
        }

        let addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                info!(endpoint = %self.endpoint(), "OPC UA server listening");
                self.mode = ServerMode::Online;
                self.listener_task = Some(tokio::spawn(accept_loop(listener)));
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, port = self.port, "OPC UA bind failed - running in value storage mode");
                self.mode = ServerMode::ValueStorageOnly;
                Ok(())
            }
        }
    }

    /// Same as [`Self::start`] but a bind failure is an error (strict mode).
    pub async fn start_strict(&mut self) -> Result<(), SinkError> {
        pki::ensure_pki(&self.pki_dir, &self.application_name)
            .map_err(|e| SinkError::Pki(e.to_string()))?;
        let addr: SocketAddr = ([0, 0, 0, 0], self.port).into();
        let listener = TcpListener::bind(addr).await?;
        info!(endpoint = %self.endpoint(), "OPC UA server listening");
        self.mode = ServerMode::Online;
        self.listener_task = Some(tokio::spawn(accept_loop(listener)));
        Ok(())
    }

    /// Replace all values of a namespace in one call.
    ///
    /// Updates to unknown namespaces are silently dropped so the simulation
    /// tolerates a sink that never came up.
    pub fn update_namespace_values(&self, namespace: u16, values: ValueMap) {
        let mut spaces = self.lock_namespaces();
        if let Some(space) = spaces.get_mut(&namespace) {
            space.values.extend(values);
        }
    }

    /// Latest value of one node.
    pub fn value(&self, namespace: u16, name: &str) -> Option<Value> {
        self.lock_namespaces()
            .get(&namespace)?
            .values
            .get(name)
            .cloned()
    }

    /// Snapshot of all values in a namespace.
    pub fn namespace_values(&self, namespace: u16) -> Option<ValueMap> {
        self.lock_namespaces()
            .get(&namespace)
            .map(|s| s.values.clone())
    }

    /// The `ns=<i>;s=<Folder>.<Node>` ids of a namespace.
    pub fn node_ids(&self, namespace: u16) -> Vec<String> {
        let spaces = self.lock_namespaces();
        let Some(space) = spaces.get(&namespace) else {
            return Vec::new();
        };
        space
            .nodes
            .iter()
            .map(|n| node_id(namespace, &space.folder, n.name))
            .collect()
    }

    /// Stop the endpoint; retained values stay readable.
    pub fn stop(&mut self) {
        if let Some(task) = self.listener_task.take() {
            task.abort();
        }
        if self.mode == ServerMode::Online {
            info!("OPC UA server stopped");
        }
        self.mode = ServerMode::Stopped;
    }

    fn lock_namespaces(&self) -> std::sync::MutexGuard<'_, BTreeMap<u16, Namespace>> {
        self.namespaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for OpcUaServer {
    fn drop(&mut self) {
        if let Some(task) = self.listener_task.take() {
            task.abort();
        }
    }
}

/// Accept clients on the endpoint.
///
/// Connections are accepted and dropped: the simulator claims the port and
/// surfaces liveness without speaking the binary protocol.
async fn accept_loop(listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((_socket, peer)) => {
                debug!(%peer, "OPC UA client connected (no session service)");
            }
            Err(err) => {
                warn!(error = %err, "OPC UA accept failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopfloor_common::nodes::DataType;

    fn make_nodes() -> Vec<NodeDefinition> {
        vec![
            NodeDefinition::new(
                "WeldingCurrent",
                "Welding Current",
                "Current in Amps",
                DataType::Double,
                "A",
                Value::Double(0.0),
            ),
            NodeDefinition::new(
                "State",
                "State",
                "Machine state (0-4)",
                DataType::Int32,
                "",
                Value::Int32(0),
            ),
        ]
    }

    #[test]
    fn test_register_and_initial_values() {
        let server = OpcUaServer::new(4840, "test");
        server
            .register_namespace(2, "Robot", "Welding robot", make_nodes())
            .unwrap();

        assert_eq!(server.value(2, "WeldingCurrent"), Some(Value::Double(0.0)));
        assert_eq!(server.value(2, "State"), Some(Value::Int32(0)));
        assert_eq!(server.value(3, "State"), None);
    }

    #[test]
    fn test_duplicate_namespace_rejected() {
        let server = OpcUaServer::new(4840, "test");
        server
            .register_namespace(2, "Robot", "Welding robot", make_nodes())
            .unwrap();
        assert!(matches!(
            server.register_namespace(2, "Robot", "again", make_nodes()),
            Err(SinkError::NamespaceExists(2))
        ));
    }

    #[test]
    fn test_update_values_in_one_call() {
        let server = OpcUaServer::new(4840, "test");
        server
            .register_namespace(2, "Robot", "Welding robot", make_nodes())
            .unwrap();

        let mut values = ValueMap::new();
        values.insert("WeldingCurrent".into(), Value::Double(201.5));
        values.insert("State".into(), Value::Int32(2));
        server.update_namespace_values(2, values);

        assert_eq!(server.value(2, "WeldingCurrent"), Some(Value::Double(201.5)));
        assert_eq!(server.value(2, "State"), Some(Value::Int32(2)));
    }

    #[test]
    fn test_unknown_namespace_updates_dropped() {
        let server = OpcUaServer::new(4840, "test");
        let mut values = ValueMap::new();
        values.insert("Anything".into(), Value::Double(1.0));
        // Must not panic or create the namespace.
        server.update_namespace_values(9, values);
        assert!(server.namespace_values(9).is_none());
    }

    #[test]
    fn test_node_ids_follow_contract() {
        let server = OpcUaServer::new(4840, "test");
        server
            .register_namespace(2, "Robot", "Welding robot", make_nodes())
            .unwrap();
        let ids = server.node_ids(2);
        assert!(ids.contains(&"ns=2;s=Robot.WeldingCurrent".to_string()));
        assert!(ids.contains(&"ns=2;s=Robot.State".to_string()));
    }

    #[tokio::test]
    async fn test_start_falls_back_when_port_taken() {
        let tmp = tempfile::tempdir().unwrap();
        // Claim a port first.
        let blocker = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = blocker.local_addr().unwrap().port();

        let mut server = OpcUaServer::new(port, "test").with_pki_dir(tmp.path());
        server.start().await.unwrap();
        assert_eq!(server.mode(), ServerMode::ValueStorageOnly);

        // Values still work in fallback mode.
        server
            .register_namespace(2, "Robot", "Welding robot", make_nodes())
            .unwrap();
        let mut values = ValueMap::new();
        values.insert("State".into(), Value::Int32(1));
        server.update_namespace_values(2, values);
        assert_eq!(server.value(2, "State"), Some(Value::Int32(1)));
    }

    #[tokio::test]
    async fn test_start_strict_errors_on_taken_port() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = blocker.local_addr().unwrap().port();

        let mut server = OpcUaServer::new(port, "test").with_pki_dir(tmp.path());
        assert!(server.start_strict().await.is_err());
    }

    #[tokio::test]
    async fn test_start_and_stop_on_free_port() {
        let tmp = tempfile::tempdir().unwrap();
        // Port 0 asks the OS for a free one; the sink reports online.
        let mut server = OpcUaServer::new(0, "test").with_pki_dir(tmp.path());
        server.start().await.unwrap();
        assert_eq!(server.mode(), ServerMode::Online);
        server.stop();
        assert_eq!(server.mode(), ServerMode::Stopped);
    }
}
