//! Interfaces to the services behind the HTTP boundary
//!
//! Query execution, process tracking and cluster transport live outside
//! this crate. Handlers only see these traits; the offline implementations
//! here let the service run on its own (queries fail with
//! [`PilosaError::ExecutorUnavailable`], the registry knows only the local
//! process, pushed messages loop back onto the local bus).

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::bus::{BusEvent, Envelope, EventBus, Message};
use crate::config::ServiceConfig;
use crate::error::{PilosaError, Result};

/// Bitmap id and its count, as returned by top-n style queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    pub key: u64,
    pub count: u64,
}

/// Result of a PQL query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryResult {
    Pairs(Vec<Pair>),
    Count(u64),
    Value(serde_json::Value),
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        matches!(self, QueryResult::Value(serde_json::Value::Null))
    }
}

/// Bulk bitmap import for one slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub db: String,
    pub frame: String,
    /// Compressed, base64-encoded bitmap
    pub bitmap: String,
    pub bitmap_id: u64,
    pub slice: i32,
    pub filter: u64,
}

/// Granularity of time-quantum bitmap ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeQuantum {
    Y,
    YM,
    YMD,
    YMDH,
}

/// Query execution
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a PQL query against a database
    async fn run_pql(&self, db: &str, pql: &str) -> Result<QueryResult>;

    /// Import a compressed bitmap
    async fn batch(&self, request: BatchRequest) -> Result<serde_json::Value>;

    /// Bitmap ids covering `time` for a time-quantum frame
    fn time_ids(&self, base_id: u64, time: NaiveDateTime, quantum: TimeQuantum) -> Vec<u64>;
}

/// Network location of a cluster process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub host: String,
    pub port_tcp: u16,
    pub port_http: u16,
}

/// Known cluster processes
#[async_trait]
pub trait ProcessRegistry: Send + Sync {
    /// All known processes keyed by id
    fn metadata(&self) -> BTreeMap<Uuid, ProcessInfo>;

    fn get_process(&self, id: &Uuid) -> Result<ProcessInfo>;

    /// Round-trip time to a process
    async fn ping(&self, id: &Uuid) -> Result<Duration>;
}

/// Cluster message transport
#[async_trait]
pub trait Transport: Send + Sync {
    async fn push(&self, message: Message) -> Result<()>;
}

/// Executor used when no query engine is attached
#[derive(Debug, Default, Clone)]
pub struct DetachedExecutor;

#[async_trait]
impl Executor for DetachedExecutor {
    async fn run_pql(&self, _db: &str, _pql: &str) -> Result<QueryResult> {
        Err(PilosaError::ExecutorUnavailable)
    }

    async fn batch(&self, _request: BatchRequest) -> Result<serde_json::Value> {
        Err(PilosaError::ExecutorUnavailable)
    }

    fn time_ids(&self, base_id: u64, _time: NaiveDateTime, _quantum: TimeQuantum) -> Vec<u64> {
        vec![base_id]
    }
}

/// Registry that only knows the local process
#[derive(Debug, Clone)]
pub struct SingleProcessRegistry {
    id: Uuid,
    info: ProcessInfo,
}

impl SingleProcessRegistry {
    pub fn new(id: Uuid, info: ProcessInfo) -> Self {
        Self { id, info }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

#[async_trait]
impl ProcessRegistry for SingleProcessRegistry {
    fn metadata(&self) -> BTreeMap<Uuid, ProcessInfo> {
        BTreeMap::from([(self.id, self.info.clone())])
    }

    fn get_process(&self, id: &Uuid) -> Result<ProcessInfo> {
        if *id == self.id {
            Ok(self.info.clone())
        } else {
            Err(PilosaError::ProcessNotFound(id.to_string()))
        }
    }

    async fn ping(&self, id: &Uuid) -> Result<Duration> {
        let start = Instant::now();
        self.get_process(id)?;
        Ok(start.elapsed())
    }
}

/// Transport that delivers pushed messages back to this process
#[derive(Clone)]
pub struct LoopbackTransport {
    bus: Arc<dyn EventBus>,
    host: String,
}

impl LoopbackTransport {
    pub fn new(bus: Arc<dyn EventBus>, host: impl Into<String>) -> Self {
        Self {
            bus,
            host: host.into(),
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn push(&self, message: Message) -> Result<()> {
        self.bus
            .publish(BusEvent::Outbound(Envelope {
                message: message.clone(),
                host: self.host.clone(),
            }))
            .await;
        self.bus.publish(BusEvent::Inbound(message)).await;
        Ok(())
    }
}

/// Everything the handlers forward to
#[derive(Clone)]
pub struct Collaborators {
    pub executor: Arc<dyn Executor>,
    pub processes: Arc<dyn ProcessRegistry>,
    pub transport: Arc<dyn Transport>,
}

impl Collaborators {
    /// Offline collaborators for a standalone process
    pub fn detached(config: &ServiceConfig, bus: Arc<dyn EventBus>) -> Self {
        let host = format!("{}:{}", config.host, config.port_http);
        let info = ProcessInfo {
            host: config.host.clone(),
            port_tcp: 0,
            port_http: config.port_http,
        };

        Self {
            executor: Arc::new(DetachedExecutor),
            processes: Arc::new(SingleProcessRegistry::new(Uuid::new_v4(), info)),
            transport: Arc::new(LoopbackTransport::new(bus, host)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{LocalBus, Topic};

    #[test]
    fn test_query_result_serialization() {
        let empty = QueryResult::Pairs(Vec::new());
        assert_eq!(serde_json::to_string(&empty).unwrap(), "[]");

        let pairs = QueryResult::Pairs(vec![Pair { key: 10, count: 3 }]);
        assert_eq!(
            serde_json::to_string(&pairs).unwrap(),
            r#"[{"key":10,"count":3}]"#
        );

        assert_eq!(serde_json::to_string(&QueryResult::Count(42)).unwrap(), "42");
        assert!(QueryResult::Value(serde_json::Value::Null).is_empty());
    }

    #[tokio::test]
    async fn test_detached_executor_is_unavailable() {
        let executor = DetachedExecutor;
        let result = executor.run_pql("3", "get(10, general)").await;
        assert!(matches!(result, Err(PilosaError::ExecutorUnavailable)));
    }

    #[tokio::test]
    async fn test_single_process_registry() {
        let id = Uuid::new_v4();
        let registry = SingleProcessRegistry::new(
            id,
            ProcessInfo {
                host: "127.0.0.1".to_string(),
                port_tcp: 12000,
                port_http: 15000,
            },
        );

        assert_eq!(registry.metadata().len(), 1);
        assert!(registry.ping(&id).await.is_ok());

        let other = Uuid::new_v4();
        assert!(matches!(
            registry.get_process(&other),
            Err(PilosaError::ProcessNotFound(_))
        ));
        assert!(registry.ping(&other).await.is_err());
    }

    #[tokio::test]
    async fn test_loopback_transport_publishes_both_directions() {
        let bus = Arc::new(LocalBus::new());
        let mut inbound = bus.subscribe(Topic::Inbound);
        let mut outbound = bus.subscribe(Topic::Outbound);

        let transport = LoopbackTransport::new(bus.clone(), "127.0.0.1:15000");
        transport.push(Message::new("mystring")).await.unwrap();

        let out = outbound.recv().await.unwrap();
        assert_eq!(out.host(), "127.0.0.1:15000");
        let inb = inbound.recv().await.unwrap();
        assert_eq!(inb.host(), "");
    }
}
