//! Pose publishing to a remote parameter tree over OSC.
//!
//! Each marker owns a node `/<root>/<prefix><id>` with two parameters:
//! `Position` (two floats) and `Angle` (one float). Nodes are created the
//! first time a marker is seen.

use std::collections::HashMap;
use std::io;
use std::net::UdpSocket;
use std::sync::mpsc;
use std::thread::JoinHandle;

use log::{debug, info, warn};
use qrtrack_markers::{MarkerId, PoseRecord};
use rosc::{encoder, OscMessage, OscPacket, OscType};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("parameter tree unreachable: {0}")]
    Unreachable(String),
    #[error("could not open the transport: {0}")]
    Transport(#[from] io::Error),
    #[error("OSC encoding failed: {0}")]
    Encode(#[from] rosc::OscError),
}

/// Receives every pose produced by the tracking loop.
pub trait PoseSink {
    fn publish(&mut self, pose: &PoseRecord) -> Result<(), PublishError>;
}

/// Prints poses through the `log` facade.
#[derive(Debug, Default)]
pub struct LogSink;

impl PoseSink for LogSink {
    fn publish(&mut self, pose: &PoseRecord) -> Result<(), PublishError> {
        info!(
            "marker {}: x={:.1} y={:.1} angle={:.1}",
            pose.id, pose.x, pose.y, pose.angle
        );
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherParams {
    /// `host:port` of the parameter tree; `None` logs poses instead.
    pub target: Option<String>,
    pub root: String,
    pub prefix: String,
}

impl Default for PublisherParams {
    fn default() -> Self {
        Self {
            target: None,
            root: "scene".to_string(),
            prefix: "Metabot.".to_string(),
        }
    }
}

/// OSC addresses of one marker node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeAddress {
    pub position: String,
    pub angle: String,
}

impl NodeAddress {
    pub fn for_marker(root: &str, prefix: &str, id: &MarkerId) -> Self {
        let name = osc_safe(&format!("{prefix}{id}"));
        let base = format!("/{}/{name}", osc_safe(root));
        Self {
            position: format!("{base}/Position"),
            angle: format!("{base}/Angle"),
        }
    }
}

/// Replace characters OSC reserves for address patterns.
fn osc_safe(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            ' ' | '#' | '*' | ',' | '/' | '?' | '[' | ']' | '{' | '}' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Fire-and-forget publisher: a worker thread owns the UDP socket.
pub struct ParameterTreePublisher {
    root: String,
    prefix: String,
    nodes: HashMap<MarkerId, NodeAddress>,
    tx: Option<mpsc::Sender<Vec<u8>>>,
    worker: Option<JoinHandle<()>>,
}

impl ParameterTreePublisher {
    /// Connect to `target` (`host:port`) and start the transport worker.
    pub fn connect(target: &str, params: &PublisherParams) -> Result<Self, PublishError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(target)?;
        info!("publishing poses to {target} under /{}", params.root);

        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let worker = std::thread::Builder::new()
            .name("osc-publisher".to_string())
            .spawn(move || {
                for packet in rx {
                    if let Err(e) = socket.send(&packet) {
                        warn!("OSC send failed: {e}");
                    }
                }
                debug!("OSC publisher stopped");
            })?;

        Ok(Self {
            root: params.root.clone(),
            prefix: params.prefix.clone(),
            nodes: HashMap::new(),
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Node of a marker, created on first use.
    pub fn node(&mut self, id: &MarkerId) -> &NodeAddress {
        let (root, prefix) = (&self.root, &self.prefix);
        self.nodes.entry(id.clone()).or_insert_with(|| {
            let node = NodeAddress::for_marker(root, prefix, id);
            info!("created parameter node for marker {id}");
            node
        })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn send(&self, packet: Vec<u8>) -> Result<(), PublishError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| PublishError::Unreachable("publisher closed".to_string()))?;
        tx.send(packet)
            .map_err(|_| PublishError::Unreachable("transport worker stopped".to_string()))
    }
}

impl PoseSink for ParameterTreePublisher {
    fn publish(&mut self, pose: &PoseRecord) -> Result<(), PublishError> {
        let node = self.node(&pose.id).clone();
        let position = OscPacket::Message(OscMessage {
            addr: node.position,
            args: vec![OscType::Float(pose.x), OscType::Float(pose.y)],
        });
        let angle = OscPacket::Message(OscMessage {
            addr: node.angle,
            args: vec![OscType::Float(pose.angle)],
        });
        self.send(encoder::encode(&position)?)?;
        self.send(encoder::encode(&angle)?)
    }
}

impl Drop for ParameterTreePublisher {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
