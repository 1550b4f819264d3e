//! Channel trees for multi-channel repositories.

use serde::{Deserialize, Serialize};

/// A node in the channel tree of a multi-channel repository.
///
/// Synchronization walks the tree pre-order: a parent channel is always
/// processed before its children, because child channels may reference
/// records living in the parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel identifier.
    pub channel_id: i64,
    /// Channel name, informational.
    pub name: String,
    /// Child channels. Sibling order is not significant.
    #[serde(default)]
    pub children: Vec<Channel>,
}

impl Channel {
    /// Create a leaf channel.
    #[must_use]
    pub fn new(channel_id: i64, name: impl Into<String>) -> Self {
        Self {
            channel_id,
            name: name.into(),
            children: Vec::new(),
        }
    }

    /// Builder-style child attachment.
    #[must_use]
    pub fn with_child(mut self, child: Channel) -> Self {
        self.children.push(child);
        self
    }

    /// Pre-order traversal over this channel and all descendants.
    pub fn walk(&self) -> impl Iterator<Item = &Channel> {
        let mut out = Vec::new();
        collect_pre_order(self, &mut out);
        out.into_iter()
    }

    /// Total number of channels in this subtree.
    #[must_use]
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Channel::count).sum::<usize>()
    }
}

fn collect_pre_order<'a>(node: &'a Channel, out: &mut Vec<&'a Channel>) {
    out.push(node);
    for child in &node.children {
        collect_pre_order(child, out);
    }
}
