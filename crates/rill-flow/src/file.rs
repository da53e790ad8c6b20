//! TOML persistence for flows.
//!
//! ```toml
//! [flow]
//! name = "main"
//!
//! [[flow.nodes]]
//! text = "control"
//! x = 10.0
//! y = 20.0
//! w = 80.0
//! h = 24.0
//! value = 0.5
//!
//! [[flow.edges]]
//! from = 0
//! output_index = 0
//! to = 1
//! input_index = 0
//!
//! [[buffers]]
//! name = "kick"
//! path = "kick.wav"
//! ```
//!
//! Node ids in a file are list positions. Saving compacts the ids of an
//! edited flow; loading assigns ids in list order and re-validates every
//! edge.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rill_ir::Library;
use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};
use crate::graph::{Edge, Flow, NodeId};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FlowFile {
    flow: FlowSection,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    buffers: Vec<BufferEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FlowSection {
    name: String,
    #[serde(default)]
    nodes: Vec<NodeEntry>,
    #[serde(default)]
    edges: Vec<EdgeEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeEntry {
    text: String,
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
    #[serde(default)]
    w: f32,
    #[serde(default)]
    h: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    buffer: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct EdgeEntry {
    from: u32,
    output_index: u32,
    to: u32,
    input_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BufferEntry {
    name: String,
    path: PathBuf,
}

impl Flow {
    /// Parses a flow from TOML text.
    pub fn from_toml(text: &str, library: &Library) -> Result<Self> {
        let file: FlowFile = toml::from_str(text)?;
        let mut flow = Flow::new(file.flow.name);

        for (idx, entry) in file.flow.nodes.iter().enumerate() {
            let id = NodeId(idx as u32);
            flow.insert_node(id, &entry.text, library)?;
            flow.move_node(id, entry.x, entry.y)?;
            flow.resize_node(id, entry.w, entry.h)?;
            flow.set_value(id, entry.value)?;
            flow.set_buffer(id, entry.buffer.clone())?;
        }
        for entry in &file.flow.edges {
            let edge = Edge::new(
                NodeId(entry.from),
                entry.output_index,
                NodeId(entry.to),
                entry.input_index,
            );
            flow.connect(edge, library)?;
        }
        for buffer in file.buffers {
            flow.add_buffer(buffer.name, buffer.path);
        }
        Ok(flow)
    }

    /// Serializes the flow, compacting node ids to list positions.
    pub fn to_toml(&self) -> Result<String> {
        let positions: HashMap<NodeId, u32> = self
            .nodes()
            .enumerate()
            .map(|(pos, (id, _))| (id, pos as u32))
            .collect();

        let nodes = self
            .nodes()
            .map(|(_, node)| NodeEntry {
                text: node.text.clone(),
                x: node.x,
                y: node.y,
                w: node.w,
                h: node.h,
                value: node.value,
                buffer: node.buffer.clone(),
            })
            .collect();
        let edges = self
            .edges()
            .iter()
            .filter_map(|e| {
                Some(EdgeEntry {
                    from: *positions.get(&e.from)?,
                    output_index: e.output,
                    to: *positions.get(&e.to)?,
                    input_index: e.input,
                })
            })
            .collect();
        let buffers = self
            .buffers()
            .iter()
            .map(|b| BufferEntry {
                name: b.name.clone(),
                path: b.path.clone(),
            })
            .collect();

        let file = FlowFile {
            flow: FlowSection {
                name: self.name().to_owned(),
                nodes,
                edges,
            },
            buffers,
        };
        Ok(toml::to_string_pretty(&file)?)
    }

    /// Loads a flow file.
    pub fn load(path: &Path, library: &Library) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| FlowError::load(path, e))?;
        let flow = Self::from_toml(&text, library)?;
        tracing::info!(path = %path.display(), nodes = flow.node_count(), "flow loaded");
        Ok(flow)
    }

    /// Saves the flow, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = self.to_toml()?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| FlowError::save(parent, e))?;
        }
        std::fs::write(path, text).map_err(|e| FlowError::save(path, e))?;
        tracing::info!(path = %path.display(), "flow saved");
        Ok(())
    }
}
