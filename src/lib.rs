//! Genetic programming core for price forecasting.
//!
//! Candidate forecasters are expression trees ([`Chromosome`]) over a
//! window of historical attributes. A [`Population`] scores them against
//! training windows, keeps the best and breeds the next generation by
//! tournament selection, subtree crossover and mutation.

pub mod chromosome;
pub mod config;
pub mod error;
pub mod factory;
pub mod individual;
pub mod op;
pub mod population;
mod sexpr;
pub mod traveller;
pub mod value;
pub mod window;

use rand_xoshiro::Xoshiro256PlusPlus;

pub use crate::chromosome::Chromosome;
pub use crate::chromosome::SplicePolicy;
pub use crate::config::EvolutionConfig;
pub use crate::error::ConfigError;
pub use crate::error::DataError;
pub use crate::error::EvolveError;
pub use crate::error::Fault;
pub use crate::error::MateError;
pub use crate::error::ParseError;
pub use crate::factory::Breeder;
pub use crate::factory::NodeWeights;
pub use crate::factory::RandomNodeGenerator;
pub use crate::factory::WeightedNodeGenerator;
pub use crate::individual::Individual;
pub use crate::individual::UNFIT;
pub use crate::op::Op;
pub use crate::population::ErrorMetric;
pub use crate::population::Evaluator;
pub use crate::population::Evolution;
pub use crate::population::GenerationStats;
pub use crate::population::Population;
pub use crate::population::WindowedError;
pub use crate::sexpr::MAX_NESTING;
pub use crate::traveller::Traveller;
pub use crate::value::Value;
pub use crate::window::AttrId;
pub use crate::window::AttrWindow;
pub use crate::window::PriceSeries;
pub use crate::window::PriceWindow;
pub use crate::window::Schema;

/// Random number generator threaded through every stochastic operation.
pub type Random = Xoshiro256PlusPlus;
