//! Expression trees stored as index-addressed arenas.
//!
//! A [`Chromosome`] keeps its nodes in a `Vec` in preorder with the root at
//! index 0. Parents are stored as indices, so a subtree always occupies the
//! contiguous range `id..id + node_count` between structural operations.
//! Crossover and mutation append the incoming subtree, reattach it, fix the
//! cached node counts along the ancestor path and then compact the arena
//! back into preorder.

use std::collections::TryReserveError;
use std::iter;
use std::sync::Arc;

use derive_more::derive::Display;
use derive_more::derive::From;
use derive_more::derive::Into;
use educe::Educe;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Fault;
use crate::factory::NodeType;
use crate::factory::RandomNodeGenerator;
use crate::op::Op;
use crate::value::Value;
use crate::window::AttrId;
use crate::window::AttrWindow;
use crate::window::Schema;

#[derive(Clone, Copy, Debug, Default, Display, Eq, PartialEq, Hash, From, Into)]
pub struct NodeId(u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    const fn offset(self, by: u32) -> Self {
        Self(self.0 + by)
    }

    const fn rebase(self, start: u32) -> Self {
        Self(self.0 - start)
    }
}

/// Children of a function node, one array per arity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Args {
    One([NodeId; 1]),
    Two([NodeId; 2]),
}

impl Args {
    pub(crate) const fn placeholder(arity: usize) -> Self {
        if arity == 1 {
            Self::One([NodeId::ROOT])
        } else {
            Self::Two([NodeId::ROOT; 2])
        }
    }

    pub const fn as_slice(&self) -> &[NodeId] {
        match self {
            Self::One(args) => args,
            Self::Two(args) => args,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [NodeId] {
        match self {
            Self::One(args) => args,
            Self::Two(args) => args,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NodeKind {
    Const(Value),
    Lookup { attr: AttrId, offset: u16 },
    Func { op: Op, args: Args },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    count: u32,
}

impl Node {
    const fn leaf(kind: NodeKind, parent: Option<NodeId>) -> Self {
        Self {
            kind,
            parent,
            count: 1,
        }
    }

    pub const fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// `None` for the root.
    pub const fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Number of nodes in the subtree rooted here, this node included.
    pub const fn node_count(&self) -> usize {
        self.count as usize
    }

    pub const fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Func { args, .. } => args.as_slice(),
            NodeKind::Const(_) | NodeKind::Lookup { .. } => &[],
        }
    }

    fn children_mut(&mut self) -> &mut [NodeId] {
        match &mut self.kind {
            NodeKind::Func { args, .. } => args.as_mut_slice(),
            NodeKind::Const(_) | NodeKind::Lookup { .. } => &mut [],
        }
    }

    /// Copy with every index moved by `f`; the parent is replaced by `parent`.
    fn remapped(mut self, parent: Option<NodeId>, f: impl Fn(NodeId) -> NodeId) -> Self {
        self.parent = parent;
        for child in self.children_mut() {
            *child = f(*child);
        }
        self
    }
}

/// How splice and mutation points are chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SplicePolicy {
    /// Every node, the root included, is equally likely.
    #[default]
    Uniform,
    /// Walk down from the root through random children, stopping at each
    /// level with probability `stop`. Never picks the root of a function tree.
    Descend { stop: f64 },
}

#[derive(Clone, Debug, Educe)]
#[educe(Default)]
pub struct Chromosome {
    #[educe(Default(expression = vec![Node::leaf(NodeKind::Const(Value(0.0)), None)]))]
    nodes: Vec<Node>,
    root: NodeId,
    schema: Arc<Schema>,
}

impl PartialEq for Chromosome {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes && self.root == other.root
    }
}

impl Chromosome {
    pub fn constant(value: Value, schema: Arc<Schema>) -> Self {
        Self {
            nodes: vec![Node::leaf(NodeKind::Const(value), None)],
            root: NodeId::ROOT,
            schema,
        }
    }

    /// Grows a random tree; no branch is deeper than `max_depth` edges.
    pub fn random(
        generator: &impl RandomNodeGenerator,
        max_depth: usize,
        rng: &mut impl Rng,
    ) -> Self {
        let mut chromosome = Self::empty(Arc::clone(generator.schema()));
        let _root = chromosome.grow(generator, rng, None, max_depth);
        chromosome
    }

    /// Arena with no nodes. Callers must push a root before handing it out.
    pub(crate) const fn empty(schema: Arc<Schema>) -> Self {
        Self {
            nodes: Vec::new(),
            root: NodeId::ROOT,
            schema,
        }
    }

    pub(crate) fn push(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::leaf(kind, parent));
        id
    }

    /// Fills the argument slots of a function node pushed with placeholders
    /// and caches its node count. `args` must already hold their counts.
    pub(crate) fn attach(&mut self, id: NodeId, args: &[NodeId]) {
        let count = 1 + args.iter().map(|a| self.node(*a).count).sum::<u32>();
        let node = &mut self.nodes[id.index()];
        node.children_mut().copy_from_slice(args);
        node.count = count;
    }

    fn grow(
        &mut self,
        generator: &impl RandomNodeGenerator,
        rng: &mut impl Rng,
        parent: Option<NodeId>,
        budget: usize,
    ) -> NodeId {
        match generator.generate(rng, budget) {
            NodeType::Const(value) => self.push(NodeKind::Const(value), parent),
            NodeType::Lookup { attr, offset } => {
                self.push(NodeKind::Lookup { attr, offset }, parent)
            }
            NodeType::Func(op) => {
                let args = Args::placeholder(op.arity());
                let id = self.push(NodeKind::Func { op, args }, parent);
                let mut args = args;
                for arg in args.as_mut_slice() {
                    *arg = self.grow(generator, rng, Some(id), budget.saturating_sub(1));
                }
                self.attach(id, args.as_slice());
                id
            }
        }
    }

    pub const fn root(&self) -> NodeId {
        self.root
    }

    pub const fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Panics if `id` does not belong to this chromosome.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n))
    }

    pub fn node_count(&self) -> usize {
        self.node(self.root).node_count()
    }

    /// Counts the subtree at `id` by walking it instead of trusting the
    /// cached counts.
    pub fn recount(&self, id: NodeId) -> usize {
        1 + self
            .node(id)
            .children()
            .iter()
            .map(|c| self.recount(*c))
            .sum::<usize>()
    }

    /// Number of edges between `id` and the root.
    pub fn depth_of(&self, id: NodeId) -> usize {
        iter::successors(self.node(id).parent, |p| self.node(*p).parent).count()
    }

    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut level = self.node(self.root).children().to_vec();
        loop {
            if level.is_empty() {
                return depth;
            }
            level = level
                .iter()
                .flat_map(|id| self.node(*id).children().iter().copied())
                .collect();
            depth += 1;
        }
    }

    pub fn execute<W: AttrWindow + ?Sized>(&self, window: &W) -> Result<Value, Fault> {
        self.execute_at(self.root, window)
    }

    /// Executes the subtree at `id`, reporting the first fault met.
    pub fn execute_at<W: AttrWindow + ?Sized>(
        &self,
        id: NodeId,
        window: &W,
    ) -> Result<Value, Fault> {
        match self.node(id).kind {
            NodeKind::Const(value) => Ok(value),
            NodeKind::Lookup { attr, offset } => window
                .lookup(attr, offset)
                .map(Value)
                .ok_or(Fault::OutOfBounds { attr, offset }),
            NodeKind::Func { op, args } => match args {
                Args::One([x]) => op.apply(&[self.execute_at(x, window)?]),
                Args::Two([x, y]) => {
                    op.apply(&[self.execute_at(x, window)?, self.execute_at(y, window)?])
                }
            },
        }
    }

    /// Like [`execute`](Self::execute) but yields [`Value::FAILED`] on a fault.
    pub fn evaluate<W: AttrWindow + ?Sized>(&self, window: &W) -> Value {
        self.execute(window).unwrap_or(Value::FAILED)
    }

    pub fn try_clone(&self) -> Result<Self, TryReserveError> {
        let mut nodes = Vec::new();
        nodes.try_reserve_exact(self.nodes.len())?;
        nodes.extend_from_slice(&self.nodes);
        Ok(Self {
            nodes,
            root: self.root,
            schema: Arc::clone(&self.schema),
        })
    }

    /// Copies the subtree at `id` into a chromosome of its own.
    pub fn extract(&self, id: NodeId) -> Result<Self, TryReserveError> {
        let start = id.index();
        let end = start + self.node(id).node_count();
        let mut nodes = Vec::new();
        nodes.try_reserve_exact(end - start)?;
        nodes.extend(self.nodes[start..end].iter().enumerate().map(|(i, node)| {
            let parent = if i == 0 {
                None
            } else {
                node.parent.map(|p| p.rebase(id.0))
            };
            node.remapped(parent, |c| c.rebase(id.0))
        }));
        Ok(Self {
            nodes,
            root: NodeId::ROOT,
            schema: Arc::clone(&self.schema),
        })
    }

    /// Replaces the subtree at `at` with a copy of `donor`.
    fn graft(&mut self, at: NodeId, donor: &Self) -> Result<(), TryReserveError> {
        let parent = self.node(at).parent;
        let base = self.nodes.len() as u32;
        self.nodes.try_reserve(donor.nodes.len())?;
        self.nodes
            .extend(donor.nodes.iter().enumerate().map(|(i, node)| {
                let node_parent = if i == 0 {
                    parent
                } else {
                    node.parent.map(|p| p.offset(base))
                };
                node.remapped(node_parent, |c| c.offset(base))
            }));
        let grafted = NodeId(base).offset(donor.root.0);

        match parent {
            Some(p) => {
                for child in self.nodes[p.index()].children_mut() {
                    if *child == at {
                        *child = grafted;
                    }
                }
            }
            None => self.root = grafted,
        }

        let mut cursor = parent;
        while let Some(id) = cursor {
            let node = self.node(id);
            let count = 1 + node
                .children()
                .iter()
                .map(|c| self.node(*c).count)
                .sum::<u32>();
            cursor = node.parent;
            self.nodes[id.index()].count = count;
        }

        self.compact()
    }

    /// Drops unreachable nodes and restores preorder with the root at 0.
    fn compact(&mut self) -> Result<(), TryReserveError> {
        let mut nodes: Vec<Node> = Vec::new();
        nodes.try_reserve_exact(self.node_count())?;
        let mut stack: Vec<(NodeId, Option<(NodeId, usize)>)> = vec![(self.root, None)];
        while let Some((old, link)) = stack.pop() {
            let id = NodeId(nodes.len() as u32);
            let node = self.nodes[old.index()];
            nodes.push(Node {
                parent: link.map(|(p, _)| p),
                ..node
            });
            if let Some((p, slot)) = link {
                nodes[p.index()].children_mut()[slot] = id;
            }
            for (slot, child) in node.children().iter().enumerate().rev() {
                stack.push((*child, Some((id, slot))));
            }
        }
        self.nodes = nodes;
        self.root = NodeId::ROOT;
        debug_assert_eq!(self.node_count(), self.nodes.len());
        Ok(())
    }

    pub fn pick_splice(&self, policy: SplicePolicy, rng: &mut impl Rng) -> NodeId {
        match policy {
            SplicePolicy::Uniform => NodeId(rng.random_range(0..self.nodes.len()) as u32),
            SplicePolicy::Descend { stop } => {
                let mut id = self.root;
                loop {
                    let children = self.node(id).children();
                    if children.is_empty() {
                        return id;
                    }
                    let chosen = children[rng.random_range(0..children.len())];
                    if rng.random_bool(stop) {
                        return chosen;
                    }
                    id = chosen;
                }
            }
        }
    }

    /// Swaps one randomly chosen subtree of `self` with one of `other`.
    ///
    /// Both trees must be owned copies: the exchanged subtrees are copied
    /// out before either tree is modified. Picking both roots swaps the
    /// whole chromosomes.
    pub fn crossover(
        &mut self,
        other: &mut Self,
        policy: SplicePolicy,
        rng: &mut impl Rng,
    ) -> Result<(), TryReserveError> {
        let mine = self.pick_splice(policy, rng);
        let theirs = other.pick_splice(policy, rng);
        let from_mine = self.extract(mine)?;
        let from_theirs = other.extract(theirs)?;
        self.graft(mine, &from_theirs)?;
        other.graft(theirs, &from_mine)
    }

    pub fn mutate(
        &mut self,
        generator: &impl RandomNodeGenerator,
        policy: SplicePolicy,
        max_depth: usize,
        rng: &mut impl Rng,
    ) -> Result<(), TryReserveError> {
        let at = self.pick_splice(policy, rng);
        self.mutate_at(at, generator, max_depth, rng)
    }

    /// Replaces the subtree at `at` with a fresh random one. Points close to
    /// the root get a larger depth budget than points near the leaves.
    pub fn mutate_at(
        &mut self,
        at: NodeId,
        generator: &impl RandomNodeGenerator,
        max_depth: usize,
        rng: &mut impl Rng,
    ) -> Result<(), TryReserveError> {
        let budget = max_depth.saturating_sub(self.depth_of(at));
        let fresh = Self::random(generator, budget, rng);
        self.graft(at, &fresh)
    }
}

#[cfg(test)]
mod test {
    use rand::SeedableRng;
    use strum::VariantArray;

    use super::*;
    use crate::Random;
    use crate::factory::NodeWeights;
    use crate::factory::WeightedNodeGenerator;

    fn generator() -> WeightedNodeGenerator {
        let schema = Arc::new(Schema::new(["open", "close"]).unwrap());
        WeightedNodeGenerator::new(schema, Op::VARIANTS.to_vec(), 20, NodeWeights::default())
            .unwrap()
    }

    fn assert_consistent(chromosome: &Chromosome) {
        assert_eq!(chromosome.root(), NodeId::ROOT);
        assert_eq!(chromosome.node_count(), chromosome.nodes.len());
        for (id, node) in chromosome.nodes() {
            assert_eq!(node.node_count(), chromosome.recount(id), "count of {id}");
            for child in node.children() {
                assert_eq!(chromosome.node(*child).parent(), Some(id));
            }
        }
        assert_eq!(chromosome.node(NodeId::ROOT).parent(), None);
    }

    #[test]
    fn random_trees_respect_depth_and_counts() {
        let generator = generator();
        let mut rng = Random::seed_from_u64(1);
        for depth in 0..6 {
            let tree = Chromosome::random(&generator, depth, &mut rng);
            assert!(tree.depth() <= depth);
            assert_consistent(&tree);
        }
    }

    #[test]
    fn default_is_a_single_constant() {
        let tree = Chromosome::default();
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.node(NodeId::ROOT).kind(), &NodeKind::Const(Value(0.0)));
    }

    #[test]
    fn crossover_keeps_counts_and_total_size() {
        let generator = generator();
        let mut rng = Random::seed_from_u64(7);
        for _ in 0..200 {
            let mut a = Chromosome::random(&generator, 4, &mut rng);
            let mut b = Chromosome::random(&generator, 4, &mut rng);
            let total = a.node_count() + b.node_count();
            a.crossover(&mut b, SplicePolicy::Uniform, &mut rng).unwrap();
            assert_consistent(&a);
            assert_consistent(&b);
            assert_eq!(a.node_count() + b.node_count(), total);
        }
    }

    #[test]
    fn descend_policy_crossover_keeps_counts() {
        let generator = generator();
        let mut rng = Random::seed_from_u64(8);
        let policy = SplicePolicy::Descend { stop: 0.5 };
        for _ in 0..100 {
            let mut a = Chromosome::random(&generator, 4, &mut rng);
            let mut b = Chromosome::random(&generator, 4, &mut rng);
            a.crossover(&mut b, policy, &mut rng).unwrap();
            assert_consistent(&a);
            assert_consistent(&b);
        }
    }

    #[test]
    fn root_to_root_graft_swaps_whole_trees() {
        let generator = generator();
        let mut rng = Random::seed_from_u64(3);
        let mut a = Chromosome::random(&generator, 3, &mut rng);
        let mut b = Chromosome::random(&generator, 3, &mut rng);
        let (old_a, old_b) = (a.clone(), b.clone());
        let from_a = a.extract(NodeId::ROOT).unwrap();
        let from_b = b.extract(NodeId::ROOT).unwrap();
        a.graft(NodeId::ROOT, &from_b).unwrap();
        b.graft(NodeId::ROOT, &from_a).unwrap();
        assert_eq!(a, old_b);
        assert_eq!(b, old_a);
    }

    #[test]
    fn mutation_keeps_counts() {
        let generator = generator();
        let mut rng = Random::seed_from_u64(11);
        let mut tree = Chromosome::random(&generator, 4, &mut rng);
        for _ in 0..200 {
            tree.mutate(&generator, SplicePolicy::Uniform, 6, &mut rng)
                .unwrap();
            assert_consistent(&tree);
        }
    }

    #[test]
    fn mutation_budget_shrinks_with_depth() {
        let generator = generator();
        let mut rng = Random::seed_from_u64(5);
        for _ in 0..100 {
            let mut tree = Chromosome::random(&generator, 3, &mut rng);
            let at = tree.pick_splice(SplicePolicy::Uniform, &mut rng);
            tree.mutate_at(at, &generator, 3, &mut rng).unwrap();
            // the new subtree hangs at depth d with a budget of 3 - d
            assert!(tree.depth() <= 3);
            assert_consistent(&tree);
        }
    }

    #[test]
    fn extract_is_a_standalone_subtree() {
        let generator = generator();
        let mut rng = Random::seed_from_u64(9);
        let tree = Chromosome::random(&generator, 4, &mut rng);
        for (id, node) in tree.nodes() {
            let sub = tree.extract(id).unwrap();
            assert_eq!(sub.node_count(), node.node_count());
            assert_consistent(&sub);
        }
    }

    #[test]
    fn depth_of_walks_parents() {
        let generator = generator();
        let mut rng = Random::seed_from_u64(2);
        let tree = Chromosome::random(&generator, 5, &mut rng);
        assert_eq!(tree.depth_of(NodeId::ROOT), 0);
        let deepest = tree
            .nodes()
            .map(|(id, _)| tree.depth_of(id))
            .max()
            .unwrap();
        assert_eq!(deepest, tree.depth());
    }
}
