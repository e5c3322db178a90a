use crate::config::CatchmentConfig;
use crate::id::{NodeId, PositionLevel};
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap};
use std::collections::{HashMap, VecDeque};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised while building a catchment topology.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("node '{0}' is declared more than once")]
    DuplicateNode(String),
    #[error("node '{node}' refers to unknown node '{peer}'")]
    UnknownNode { node: String, peer: String },
    #[error("node '{node}' drains to both '{first}' and '{second}'")]
    MultipleDownstream {
        node: String,
        first: String,
        second: String,
    },
    #[error("node '{0}' refers to itself")]
    SelfReference(String),
    #[error("cycle detected in catchment among {0:?}")]
    CycleDetected(Vec<String>),
    #[error("node '{0}' gives a pipe distance without a positive velocity")]
    InvalidVelocity(String),
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// One node as declared, before peers are resolved. Either side of a
/// connection may be declared; the other is inferred.
#[derive(Debug, Clone, Copy)]
pub struct NodeDecl<'a> {
    pub name: &'a str,
    pub downstream: Option<&'a str>,
    pub upstream: &'a [String],
}

/// Resolved per-node data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyNode {
    pub name: String,
    pub downstream: Option<NodeId>,
    pub upstream: Vec<NodeId>,
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

/// A forest of CSOs, each draining to at most one downstream node.
///
/// Nodes live in a slotmap arena; names are resolved to [`NodeId`]s once at
/// construction. Levels count hops from the outlet, and the processing order
/// visits the most upstream level first, breaking ties by declaration order.
#[derive(Debug, Clone)]
pub struct CatchmentTopology {
    nodes: SlotMap<NodeId, TopologyNode>,
    by_name: HashMap<String, NodeId>,
    /// Declaration order.
    declared: Vec<NodeId>,
    levels: SecondaryMap<NodeId, PositionLevel>,
    processing: Vec<NodeId>,
}

impl CatchmentTopology {
    /// Resolve declarations into a topology, rejecting unknown peers,
    /// conflicting downstream links and cycles.
    pub fn new(decls: &[NodeDecl<'_>]) -> Result<Self, TopologyError> {
        let mut nodes: SlotMap<NodeId, TopologyNode> = SlotMap::with_key();
        let mut by_name = HashMap::with_capacity(decls.len());
        let mut declared = Vec::with_capacity(decls.len());

        for decl in decls {
            if by_name.contains_key(decl.name) {
                return Err(TopologyError::DuplicateNode(decl.name.to_string()));
            }
            let id = nodes.insert(TopologyNode {
                name: decl.name.to_string(),
                downstream: None,
                upstream: Vec::new(),
            });
            by_name.insert(decl.name.to_string(), id);
            declared.push(id);
        }

        let resolve = |node: &str, peer: &str| -> Result<NodeId, TopologyError> {
            if node == peer {
                return Err(TopologyError::SelfReference(node.to_string()));
            }
            by_name
                .get(peer)
                .copied()
                .ok_or_else(|| TopologyError::UnknownNode {
                    node: node.to_string(),
                    peer: peer.to_string(),
                })
        };

        // Every connection as (upstream, downstream), from either side.
        let mut links: Vec<(NodeId, NodeId)> = Vec::new();
        for (decl, &id) in decls.iter().zip(&declared) {
            if let Some(down) = decl.downstream {
                links.push((id, resolve(decl.name, down)?));
            }
            for up in decl.upstream {
                links.push((resolve(decl.name, up)?, id));
            }
        }

        for (up, down) in links {
            let current = nodes[up].downstream;
            match current {
                Some(existing) if existing == down => {}
                Some(existing) => {
                    return Err(TopologyError::MultipleDownstream {
                        node: nodes[up].name.clone(),
                        first: nodes[existing].name.clone(),
                        second: nodes[down].name.clone(),
                    });
                }
                None => {
                    nodes[up].downstream = Some(down);
                    nodes[down].upstream.push(up);
                }
            }
        }

        let mut topology = Self {
            nodes,
            by_name,
            declared,
            levels: SecondaryMap::new(),
            processing: Vec::new(),
        };
        topology.compute_levels()?;
        Ok(topology)
    }

    /// Build from a catchment configuration.
    pub fn from_config(config: &CatchmentConfig) -> Result<Self, TopologyError> {
        for node in &config.nodes {
            if node.distance_m.is_some_and(|d| d > 0.0)
                && !node.velocity_ms.is_some_and(|v| v > 0.0)
            {
                return Err(TopologyError::InvalidVelocity(node.cso.name.clone()));
            }
        }
        let decls: Vec<NodeDecl<'_>> = config
            .nodes
            .iter()
            .map(|n| NodeDecl {
                name: &n.cso.name,
                downstream: n.downstream.as_deref(),
                upstream: &n.upstream,
            })
            .collect();
        Self::new(&decls)
    }

    /// Breadth-first from the outlets along upstream links (Kahn's algorithm
    /// on the reversed graph, where every node has in-degree 0 or 1). Nodes
    /// never reached sit on a cycle.
    fn compute_levels(&mut self) -> Result<(), TopologyError> {
        let mut queue: VecDeque<NodeId> = self
            .declared
            .iter()
            .copied()
            .filter(|&id| self.nodes[id].downstream.is_none())
            .collect();
        for &id in &queue {
            self.levels.insert(id, PositionLevel(0));
        }

        while let Some(id) = queue.pop_front() {
            let next = PositionLevel(self.levels[id].0 + 1);
            for &up in &self.nodes[id].upstream {
                if !self.levels.contains_key(up) {
                    self.levels.insert(up, next);
                    queue.push_back(up);
                }
            }
        }

        if self.levels.len() != self.nodes.len() {
            let stuck: Vec<String> = self
                .declared
                .iter()
                .filter(|&&id| !self.levels.contains_key(id))
                .map(|&id| self.nodes[id].name.clone())
                .collect();
            return Err(TopologyError::CycleDetected(stuck));
        }

        let mut processing: Vec<(usize, NodeId)> =
            self.declared.iter().copied().enumerate().collect();
        processing.sort_by(|(ia, a), (ib, b)| {
            self.levels[*b].cmp(&self.levels[*a]).then(ia.cmp(ib))
        });
        self.processing = processing.into_iter().map(|(_, id)| id).collect();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn id(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn node(&self, id: NodeId) -> Option<&TopologyNode> {
        self.nodes.get(id)
    }

    /// Name of `id`; empty for an id from another topology.
    pub fn name(&self, id: NodeId) -> &str {
        self.nodes.get(id).map_or("", |n| n.name.as_str())
    }

    pub fn downstream(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|n| n.downstream)
    }

    pub fn upstream(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(id).map_or(&[], |n| n.upstream.as_slice())
    }

    pub fn level(&self, id: NodeId) -> Option<PositionLevel> {
        self.levels.get(id).copied()
    }

    /// Nodes in declaration order.
    pub fn declared(&self) -> &[NodeId] {
        &self.declared
    }

    /// Most upstream level first; ties in declaration order.
    pub fn processing_order(&self) -> &[NodeId] {
        &self.processing
    }

    /// Nodes with no downstream node.
    pub fn outlets(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.declared
            .iter()
            .copied()
            .filter(|&id| self.nodes[id].downstream.is_none())
    }
}
