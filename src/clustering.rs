//! Clustering engine - recursive average-linkage clustering on embeddings
//!
//! Each level runs agglomerative clustering (UPGMA on cosine distance, by
//! nearest-neighbour chain) over the vectors of the current cluster, then cuts
//! the merge history into the largest k ≤ min(2 + depth, max_branching)
//! groups whose members all meet the minimum size. Children recurse until the depth budget is spent, no
//! admissible split exists, or the members are indistinguishable.
//!
//! Deterministic: merges break ties by lowest index, children are ordered by
//! their smallest member index, and there is no randomness anywhere.
//!
//! Keyword extraction lives here too; the label generator uses it to derive
//! fallback labels from a cluster's texts.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use crate::error::ClusterError;
use crate::similarity::{all_within, compute_centroid, cosine_distance};

/// Knobs for one clustering run
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub max_depth: usize,
    pub min_size: usize,
    /// Effective min size at a node of n members is max(min_size, ⌊n · ratio⌋)
    pub min_size_ratio: f32,
    pub max_branching: usize,
    pub identical_epsilon: f32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            min_size: 2,
            min_size_ratio: 0.15,
            max_branching: 4,
            identical_epsilon: 1e-6,
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.max_depth == 0 {
            return Err(ClusterError::InvalidConfig("max_depth must be at least 1".to_string()));
        }
        if self.min_size == 0 {
            return Err(ClusterError::InvalidConfig("min_size must be at least 1".to_string()));
        }
        if self.max_branching < 2 {
            return Err(ClusterError::InvalidConfig("max_branching must be at least 2".to_string()));
        }
        Ok(())
    }

    fn effective_min_size(&self, n: usize) -> usize {
        let scaled = (n as f64 * self.min_size_ratio as f64).floor() as usize;
        scaled.max(self.min_size)
    }
}

/// A node of the cluster tree. Leaves have no children.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    /// Segment indices, ascending
    pub indices: Vec<usize>,
    /// L2-normalized mean of the member vectors
    pub centroid: Vec<f32>,
    pub depth: usize,
    /// In discovery order (by smallest member index)
    pub children: Vec<Cluster>,
}

impl Cluster {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Pre-order traversal: self, then each child subtree in order
    pub fn preorder(&self) -> Vec<&Cluster> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(cluster) = stack.pop() {
            out.push(cluster);
            stack.extend(cluster.children.iter().rev());
        }
        out
    }

    pub fn leaves(&self) -> Vec<&Cluster> {
        self.preorder().into_iter().filter(|c| c.is_leaf()).collect()
    }

    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Cluster::node_count).sum::<usize>()
    }

    /// Edges on the longest root-to-leaf path
    pub fn height(&self) -> usize {
        self.children
            .iter()
            .map(|c| 1 + c.height())
            .max()
            .unwrap_or(0)
    }
}

/// Build the cluster tree over all vectors.
pub fn build_cluster_tree(vectors: &[Vec<f32>], config: &ClusterConfig) -> Result<Cluster, ClusterError> {
    config.validate()?;
    if vectors.is_empty() {
        return Err(ClusterError::EmptyInput);
    }

    let dim = vectors[0].len();
    if dim == 0 {
        return Err(ClusterError::InvalidConfig("vectors have zero dimension".to_string()));
    }
    if let Some((index, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dim) {
        return Err(ClusterError::DimensionMismatch {
            index,
            expected: dim,
            found: v.len(),
        });
    }

    let all: Vec<usize> = (0..vectors.len()).collect();
    let tree = build_node(vectors, all, 0, config);
    debug!(
        "Clustered {} vectors into {} nodes (height {})",
        vectors.len(),
        tree.node_count(),
        tree.height()
    );
    Ok(tree)
}

fn build_node(vectors: &[Vec<f32>], indices: Vec<usize>, depth: usize, config: &ClusterConfig) -> Cluster {
    let members: Vec<&[f32]> = indices.iter().map(|&i| vectors[i].as_slice()).collect();
    let centroid = compute_centroid(&members).unwrap_or_default();

    let children = match split(&members, depth, config) {
        Some(groups) => groups
            .into_iter()
            .map(|group| {
                let child_indices: Vec<usize> = group.into_iter().map(|local| indices[local]).collect();
                build_node(vectors, child_indices, depth + 1, config)
            })
            .collect(),
        None => Vec::new(),
    };

    Cluster {
        indices,
        centroid,
        depth,
        children,
    }
}

/// Try to subdivide `members`. Returns groups of local indices (each sorted,
/// ordered by first member) or None if this node must stay a leaf.
fn split(members: &[&[f32]], depth: usize, config: &ClusterConfig) -> Option<Vec<Vec<usize>>> {
    let n = members.len();
    if depth >= config.max_depth {
        return None;
    }

    let min_size = config.effective_min_size(n);
    // Two children of min_size each is the smallest admissible split
    if n < 2 || n < min_size.saturating_mul(2) {
        return None;
    }
    if all_within(members, config.identical_epsilon) {
        debug!("{} members at depth {} are indistinguishable, keeping as leaf", n, depth);
        return None;
    }

    let merges = average_linkage(members);
    let max_k = (2 + depth).min(config.max_branching).min(n);

    for k in (2..=max_k).rev() {
        let groups = cut(n, &merges, k);
        if groups.iter().all(|g| g.len() >= min_size) {
            debug!("Split {} members at depth {} into {} groups", n, depth, k);
            return Some(groups);
        }
    }

    debug!("No split of {} members at depth {} meets min size {}", n, depth, min_size);
    None
}

/// Pairwise distances stored as the upper triangle, row-major
struct CondensedMatrix {
    n: usize,
    data: Vec<f64>,
}

impl CondensedMatrix {
    fn from_members(members: &[&[f32]]) -> Self {
        let n = members.len();
        let mut data = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                data.push(cosine_distance(members[i], members[j]));
            }
        }
        Self { n, data }
    }

    fn offset(&self, i: usize, j: usize) -> usize {
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        i * (2 * self.n - i - 1) / 2 + (j - i - 1)
    }

    fn get(&self, i: usize, j: usize) -> f64 {
        self.data[self.offset(i, j)]
    }

    fn set(&mut self, i: usize, j: usize, d: f64) {
        let at = self.offset(i, j);
        self.data[at] = d;
    }
}

/// Average-linkage agglomerative clustering by nearest-neighbour chain,
/// O(n²) time. Returns the merge history as (kept, absorbed) representative
/// pairs sorted by merge height, n - 1 entries for n members.
fn average_linkage(members: &[&[f32]]) -> Vec<(usize, usize)> {
    let n = members.len();
    let mut dist = CondensedMatrix::from_members(members);
    let mut size = vec![1usize; n];
    let mut active = vec![true; n];
    let mut merges: Vec<(usize, usize, f64)> = Vec::with_capacity(n.saturating_sub(1));
    let mut chain: Vec<usize> = Vec::with_capacity(n);

    while merges.len() + 1 < n {
        if chain.is_empty() {
            match (0..n).find(|&i| active[i]) {
                Some(start) => chain.push(start),
                None => break,
            }
        }
        let top = chain[chain.len() - 1];
        let prev = chain.len().checked_sub(2).map(|i| chain[i]);

        // Nearest active neighbour; the previous chain link wins ties so the
        // chain always terminates in a reciprocal pair
        let mut nearest = prev;
        let mut nearest_d = prev.map_or(f64::INFINITY, |p| dist.get(top, p));
        for k in (0..n).filter(|&k| active[k] && k != top) {
            let d = dist.get(top, k);
            if d < nearest_d {
                nearest = Some(k);
                nearest_d = d;
            }
        }
        let Some(nearest) = nearest else { break };

        if Some(nearest) != prev {
            chain.push(nearest);
            continue;
        }

        chain.truncate(chain.len() - 2);
        let (a, b) = (top.min(nearest), top.max(nearest));

        // Lance-Williams update for UPGMA
        let (size_a, size_b) = (size[a] as f64, size[b] as f64);
        for k in 0..n {
            if !active[k] || k == a || k == b {
                continue;
            }
            let d = (size_a * dist.get(a, k) + size_b * dist.get(b, k)) / (size_a + size_b);
            dist.set(a, k, d);
        }
        size[a] += size[b];
        active[b] = false;
        merges.push((a, b, nearest_d));
    }

    // Chain order is not height order; a stable sort keeps equal heights in
    // the order they were found
    merges.sort_by(|x, y| x.2.total_cmp(&y.2));
    merges.into_iter().map(|(a, b, _)| (a, b)).collect()
}

/// Replay the first n - k merges and read off the k groups
fn cut(n: usize, merges: &[(usize, usize)], k: usize) -> Vec<Vec<usize>> {
    let mut uf = UnionFind::new(n);
    for &(a, b) in merges.iter().take(n.saturating_sub(k)) {
        uf.union(a, b);
    }

    // BTreeMap keyed by first member gives discovery order for free
    let mut by_root: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..n {
        by_root.entry(uf.find(i)).or_default().push(i);
    }
    let ordered: BTreeMap<usize, Vec<usize>> = by_root
        .into_values()
        .map(|group| (group[0], group))
        .collect();
    ordered.into_values().collect()
}

/// Union-find over dense indices, with path compression.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = i;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a != root_b {
            // Lower index wins so roots stay stable across runs
            let (keep, absorb) = if root_a < root_b { (root_a, root_b) } else { (root_b, root_a) };
            self.parent[absorb] = keep;
        }
    }
}

// ==================== Keyword extraction ====================

/// Stop words to filter out
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with",
    "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do", "does",
    "did", "will", "would", "could", "should", "may", "might", "must", "shall", "can",
    "this", "that", "these", "those", "i", "you", "he", "she", "it", "we", "they", "me",
    "him", "her", "us", "them", "my", "your", "his", "its", "our", "their", "what", "which",
    "who", "whom", "when", "where", "why", "how", "all", "each", "every", "both", "few",
    "more", "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same",
    "so", "than", "too", "very", "just", "also", "now", "here", "there", "then", "once",
    "if", "because", "as", "until", "while", "about", "against", "between", "into",
    "through", "during", "before", "after", "above", "below", "from", "up", "down", "out",
    "off", "over", "under", "again", "further", "any", "like", "get", "got", "getting",
    "make", "made", "making", "use", "using", "used", "need", "want", "know", "think",
    "thing", "things", "something", "anything", "everything", "way", "ways",
    "new", "old", "good", "bad", "first", "last", "long", "great", "little",
    "able", "let", "example", "untitled",
    // Arabic
    "في", "من", "على", "إلى", "الى", "عن", "مع", "هذا", "هذه", "ذلك", "تلك", "التي",
    "الذي", "الذين", "هو", "هي", "هم", "أن", "إن", "ان", "كان", "كانت", "يكون", "ما",
    "لا", "لم", "لن", "قد", "كل", "بعض", "أو", "او", "ثم", "بين", "عند", "حتى", "إذا",
    "اذا", "أي", "كما", "لكن", "بل", "غير", "أيضا", "ايضا", "وهو", "وهي", "وفي", "ومن",
    // French / Spanish / German / Portuguese function words
    "le", "la", "les", "des", "une", "est", "et", "dans", "pour", "que", "qui", "sur",
    "el", "los", "las", "del", "por", "con", "una", "para", "es", "se",
    "der", "die", "das", "und", "ist", "ein", "eine", "mit", "den", "von", "zu",
    "os", "um", "uma", "em", "do", "da", "dos", "das", "com", "não",
];

/// Extract keywords from text using TF-like scoring.
/// Ties break on first occurrence so the result is stable.
pub fn extract_keywords(text: &str, top_n: usize) -> Vec<(String, f64)> {
    let words = tokenize(text);
    let stop_set: HashSet<&str> = STOP_WORDS.iter().copied().collect();

    let mut word_counts: HashMap<String, (usize, usize)> = HashMap::new(); // word -> (count, first seen)
    let mut total_words = 0;

    for (position, word) in words.into_iter().enumerate() {
        let len = word.chars().count();
        if len < 3 || len > 25 {
            continue;
        }
        if stop_set.contains(word.as_str()) {
            continue;
        }
        // Skip numbers
        if word.chars().all(|c| c.is_numeric()) {
            continue;
        }
        word_counts.entry(word).or_insert((0, position)).0 += 1;
        total_words += 1;
    }

    if total_words == 0 {
        return vec![];
    }

    let mut scored: Vec<(String, f64, usize)> = word_counts
        .into_iter()
        .map(|(word, (count, first))| {
            let tf = count as f64 / total_words as f64;
            // Boost multi-occurrence words
            let boost = if count > 1 { 1.0 + (count as f64).ln() } else { 1.0 };
            (word, tf * boost, first)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.2.cmp(&b.2))
    });

    scored.truncate(top_n);
    scored.into_iter().map(|(w, s, _)| (w, s)).collect()
}

/// Tokenize text into lowercase words
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_matches('\'').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Capitalize first letter
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().chain(chars).collect(),
    }
}
