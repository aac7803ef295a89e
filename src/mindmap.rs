//! Mind map assembly - labeled cluster tree to output nodes
//!
//! Labels arrive in the cluster tree's pre-order. Ids are slugs of the labels,
//! made unique across the whole tree with `_0`, `_1`, ... suffixes in the
//! same pre-order, so a given tree and label set always yields the same ids.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::clustering::Cluster;
use crate::error::AssemblyError;
use crate::labeling::ClusterLabel;
use crate::language::Language;

/// Id used when a label has no alphanumeric characters
const PLACEHOLDER_ID: &str = "node";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MindmapNode {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Indices of the segments this node covers, ascending
    #[serde(default)]
    pub source_segment_indices: Vec<usize>,
    #[serde(default)]
    pub children: Vec<MindmapNode>,
}

impl MindmapNode {
    /// Single root for a document with nothing to cluster
    pub fn placeholder(language: Language) -> Self {
        let label = language.untitled().to_string();
        Self {
            id: slugify(&label),
            label,
            description: None,
            source_segment_indices: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(MindmapNode::node_count).sum::<usize>()
    }

    /// Edges on the longest root-to-leaf path (a lone root has depth 0)
    pub fn depth(&self) -> usize {
        self.children
            .iter()
            .map(|c| c.depth() + 1)
            .max()
            .unwrap_or(0)
    }

    /// All ids, pre-order
    pub fn all_ids(&self) -> Vec<&str> {
        let mut ids = vec![self.id.as_str()];
        for child in &self.children {
            ids.extend(child.all_ids());
        }
        ids
    }

    pub fn leaves(&self) -> Vec<&MindmapNode> {
        if self.is_leaf() {
            return vec![self];
        }
        self.children.iter().flat_map(|c| c.leaves()).collect()
    }

    /// Find a node by id
    pub fn find(&self, id: &str) -> Option<&MindmapNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }
}

/// Lowercase, collapse every run of non-alphanumerics to `_`, trim the ends.
/// Letters from any script survive.
pub fn slugify(label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    let mut pending_sep = false;
    for c in label.chars() {
        if c.is_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if slug.is_empty() {
        PLACEHOLDER_ID.to_string()
    } else {
        slug
    }
}

/// Tree-wide unique id for a label
fn unique_id(label: &str, taken: &mut HashSet<String>) -> String {
    let base = slugify(label);
    if taken.insert(base.clone()) {
        return base;
    }
    let mut n = 0;
    loop {
        let candidate = format!("{}_{}", base, n);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Check that the tree partitions its root's indices: no empty clusters,
/// no duplicates, and every parent is exactly the disjoint union of its
/// children.
pub fn check_partition(cluster: &Cluster) -> Result<(), AssemblyError> {
    if cluster.indices.is_empty() {
        return Err(AssemblyError::EmptyCluster(cluster.depth));
    }
    let own: BTreeSet<usize> = cluster.indices.iter().copied().collect();
    if own.len() != cluster.indices.len() {
        return Err(AssemblyError::PartitionViolation(format!(
            "duplicate segment index in cluster at depth {}",
            cluster.depth
        )));
    }
    if cluster.is_leaf() {
        return Ok(());
    }

    let mut union = BTreeSet::new();
    for child in &cluster.children {
        check_partition(child)?;
        for &index in &child.indices {
            if !union.insert(index) {
                return Err(AssemblyError::PartitionViolation(format!(
                    "segment {} appears in two children at depth {}",
                    index,
                    child.depth
                )));
            }
        }
    }
    if union != own {
        return Err(AssemblyError::PartitionViolation(format!(
            "children at depth {} cover {} segments, parent has {}",
            cluster.depth + 1,
            union.len(),
            own.len()
        )));
    }
    Ok(())
}

/// Turn a labeled cluster tree into mind map nodes. `labels` must follow
/// [`Cluster::preorder`].
pub fn assemble(root: &Cluster, labels: Vec<ClusterLabel>) -> Result<MindmapNode, AssemblyError> {
    let expected = root.node_count();
    if labels.len() != expected {
        return Err(AssemblyError::LabelCountMismatch {
            expected,
            got: labels.len(),
        });
    }
    check_partition(root)?;

    let mut labels = labels.into_iter();
    let mut taken = HashSet::new();
    build_node(root, &mut labels, &mut taken)
}

fn build_node(
    cluster: &Cluster,
    labels: &mut impl Iterator<Item = ClusterLabel>,
    taken: &mut HashSet<String>,
) -> Result<MindmapNode, AssemblyError> {
    let ClusterLabel { label, description } = labels.next().ok_or(AssemblyError::LabelCountMismatch {
        expected: cluster.node_count(),
        got: 0,
    })?;
    let id = unique_id(&label.text, taken);

    let children = cluster
        .children
        .iter()
        .map(|child| build_node(child, labels, taken))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(MindmapNode {
        id,
        label: label.text,
        description,
        source_segment_indices: cluster.indices.clone(),
        children,
    })
}
