use std::sync::Arc;

use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use serde::Deserialize;
use serde::Serialize;

use crate::chromosome::SplicePolicy;
use crate::error::ConfigError;
use crate::op::Op;
use crate::value::Value;
use crate::window::AttrId;
use crate::window::Schema;

/// Chance a sliding constant is negative.
pub const CHANCE_NEGATIVE: f64 = 0.50;
/// Chance a sliding constant is a whole number.
pub const CHANCE_WHOLE: f64 = 0.75;
/// Largest magnitude tier; tier `k` draws the whole part from `0..10^k`.
pub const MAX_TIER: u32 = 9;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NodeType {
    Const(Value),
    Lookup { attr: AttrId, offset: u16 },
    Func(Op),
}

pub trait RandomNodeGenerator {
    /// Schema the generated lookups refer to.
    fn schema(&self) -> &Arc<Schema>;

    /// Picks the next node. With a `budget` of zero only leaves come back.
    fn generate(&self, rng: &mut impl Rng, budget: usize) -> NodeType;
}

/// Relative weights of the three node kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeWeights {
    pub constant: u32,
    pub lookup: u32,
    pub function: u32,
}

impl Default for NodeWeights {
    fn default() -> Self {
        Self {
            constant: 1,
            lookup: 1,
            function: 1,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Kind {
    Const,
    Lookup,
    Func,
}

const KINDS: [Kind; 3] = [Kind::Const, Kind::Lookup, Kind::Func];

#[derive(Clone, Debug)]
pub struct WeightedNodeGenerator {
    schema: Arc<Schema>,
    attrs: Vec<AttrId>,
    ops: Vec<Op>,
    max_offset: u16,
    kinds: WeightedIndex<u32>,
    leaves: WeightedIndex<u32>,
}

impl WeightedNodeGenerator {
    /// Lookups are disabled when the schema is empty or `max_offset` is
    /// zero, functions when `ops` is empty.
    pub fn new(
        schema: Arc<Schema>,
        ops: Vec<Op>,
        max_offset: u16,
        weights: NodeWeights,
    ) -> Result<Self, ConfigError> {
        let lookup = if schema.is_empty() || max_offset == 0 {
            0
        } else {
            weights.lookup
        };
        let function = if ops.is_empty() { 0 } else { weights.function };
        let leaves = WeightedIndex::new([weights.constant, lookup])
            .map_err(|e| ConfigError::Invalid(format!("leaf node weights: {e}")))?;
        let kinds = WeightedIndex::new([weights.constant, lookup, function])
            .map_err(|e| ConfigError::Invalid(format!("node weights: {e}")))?;
        let attrs = schema.ids().collect();
        Ok(Self {
            schema,
            attrs,
            ops,
            max_offset,
            kinds,
            leaves,
        })
    }
}

impl RandomNodeGenerator for WeightedNodeGenerator {
    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn generate(&self, rng: &mut impl Rng, budget: usize) -> NodeType {
        let kind = if budget == 0 {
            KINDS[self.leaves.sample(rng)]
        } else {
            KINDS[self.kinds.sample(rng)]
        };
        match kind {
            Kind::Const => NodeType::Const(sliding_real(rng)),
            Kind::Lookup => NodeType::Lookup {
                attr: self.attrs[rng.random_range(0..self.attrs.len())],
                offset: rng.random_range(0..self.max_offset),
            },
            Kind::Func => NodeType::Func(self.ops[rng.random_range(0..self.ops.len())]),
        }
    }
}

/// Everything needed to create and alter chromosomes.
#[derive(Clone, Debug)]
pub struct Breeder<G> {
    pub generator: G,
    pub splice: SplicePolicy,
    pub max_depth: usize,
}

/// Magnitude tier for a uniform draw: tier 1 below 1/2, tier 2 below 3/4,
/// tier 3 below 7/8 and so on, halving the remaining mass up to [`MAX_TIER`].
pub fn sliding_tier(how_big: f64) -> u32 {
    let mut tier = 1;
    let mut threshold = 0.5;
    let mut step = 0.5;
    while tier < MAX_TIER && how_big >= threshold {
        tier += 1;
        step /= 2.0;
        threshold += step;
    }
    tier
}

/// Random constant biased towards small, simple values.
pub fn sliding_real(rng: &mut impl Rng) -> Value {
    let is_negative = rng.random::<f64>() < CHANCE_NEGATIVE;
    let is_whole = rng.random::<f64>() < CHANCE_WHOLE;
    let tier = sliding_tier(rng.random::<f64>());

    let whole = rng.random_range(0..10_u32.pow(tier));
    let fraction = if is_whole { 0.0 } else { rng.random::<f64>() };
    signed(is_negative, whole, fraction)
}

/// The sign covers the fraction too: `(true, 3, 0.25)` is `-3.25`, and a
/// negative zero stays negative.
fn signed(is_negative: bool, whole: u32, fraction: f64) -> Value {
    let magnitude = f64::from(whole) + fraction;
    Value(if is_negative { -magnitude } else { magnitude })
}
