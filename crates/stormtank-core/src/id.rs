use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a CSO node in a catchment topology.
    pub struct NodeId;
}

/// Position of a node in the processing order. Level 0 is an outlet (no
/// downstream node); each hop upstream adds one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionLevel(pub u32);
