use std::collections::TryReserveError;
use std::fmt;
use std::sync::Arc;

use educe::Educe;
use rand::Rng;

use crate::chromosome::Chromosome;
use crate::error::Fault;
use crate::error::MateError;
use crate::error::ParseError;
use crate::factory::Breeder;
use crate::factory::RandomNodeGenerator;
use crate::value::Value;
use crate::window::AttrWindow;
use crate::window::Schema;

/// Fitness of an individual that has not been scored yet.
pub const UNFIT: f64 = f64::MAX;

/// One candidate solution.
///
/// A default individual carries a no-op chromosome and is sick, so it never
/// takes part in reproduction until the scoring phase heals it. Cloning
/// copies the chromosome and the health flags but never the fitness.
#[derive(Debug, Educe)]
#[educe(Default)]
pub struct Individual {
    chromosome: Chromosome,
    is_dead: bool,
    #[educe(Default = true)]
    is_sick: bool,
    #[educe(Default(expression = UNFIT))]
    fitness: f64,
}

impl Clone for Individual {
    fn clone(&self) -> Self {
        Self {
            chromosome: self.chromosome.clone(),
            is_dead: self.is_dead,
            is_sick: self.is_sick,
            fitness: UNFIT,
        }
    }
}

impl fmt::Display for Individual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.chromosome, f)
    }
}

impl Individual {
    pub const fn new(chromosome: Chromosome) -> Self {
        Self {
            chromosome,
            is_dead: false,
            is_sick: false,
            fitness: UNFIT,
        }
    }

    pub fn new_random<G: RandomNodeGenerator>(breeder: &Breeder<G>, rng: &mut impl Rng) -> Self {
        Self::new(Chromosome::random(
            &breeder.generator,
            breeder.max_depth,
            rng,
        ))
    }

    pub fn parse(text: &str, schema: Arc<Schema>) -> Result<Self, ParseError> {
        Chromosome::parse(text, schema).map(Self::new)
    }

    /// [`Clone`] that reports allocation failure instead of aborting.
    pub fn try_clone(&self) -> Result<Self, TryReserveError> {
        Ok(Self {
            chromosome: self.chromosome.try_clone()?,
            is_dead: self.is_dead,
            is_sick: self.is_sick,
            fitness: UNFIT,
        })
    }

    pub const fn chromosome(&self) -> &Chromosome {
        &self.chromosome
    }

    pub const fn fitness(&self) -> f64 {
        self.fitness
    }

    pub fn chromo_node_count(&self) -> usize {
        self.chromosome.node_count()
    }

    /// Unchecked evaluation, [`Value::FAILED`] when the chromosome faults.
    pub fn chromo_value<W: AttrWindow + ?Sized>(&self, window: &W) -> Value {
        self.chromosome.evaluate(window)
    }

    pub fn exec_chromosome<W: AttrWindow + ?Sized>(&self, window: &W) -> Result<Value, Fault> {
        self.chromosome.execute(window)
    }

    pub const fn is_dead(&self) -> bool {
        self.is_dead
    }

    pub const fn is_sick(&self) -> bool {
        self.is_sick
    }

    pub const fn can_reproduce(&self) -> bool {
        !(self.is_dead || self.is_sick)
    }

    pub const fn set_fitness(&mut self, fitness: f64) {
        self.fitness = fitness;
    }

    pub const fn set_is_dead(&mut self, yes: bool) {
        self.is_dead = yes;
    }

    pub const fn set_is_sick(&mut self, yes: bool) {
        self.is_sick = yes;
    }

    pub fn mutate<G: RandomNodeGenerator>(
        &mut self,
        breeder: &Breeder<G>,
        rng: &mut impl Rng,
    ) -> Result<(), TryReserveError> {
        self.chromosome
            .mutate(&breeder.generator, breeder.splice, breeder.max_depth, rng)
    }

    /// Breeds two offspring with `partner` into `crib[slot_a]` and
    /// `crib[slot_b]`.
    ///
    /// Both parents are cloned and crossed over, then each baby is mutated
    /// with probability `mutation_rate`. When the two slots are the same the
    /// second baby is still bred, consuming the same random draws, and then
    /// dropped. On error the crib is left untouched.
    ///
    /// # Panics
    ///
    /// If either parent cannot reproduce.
    #[expect(clippy::too_many_arguments, reason = "mirrors the crib bookkeeping")]
    pub fn mate<G: RandomNodeGenerator>(
        &self,
        partner: &Individual,
        crib: &mut [Option<Individual>],
        slot_a: usize,
        slot_b: usize,
        mutation_rate: f64,
        breeder: &Breeder<G>,
        rng: &mut impl Rng,
    ) -> Result<(), MateError> {
        assert!(self.can_reproduce(), "mating with an individual that cannot reproduce");
        assert!(partner.can_reproduce(), "mating with a partner that cannot reproduce");

        let mut baby1 = self.try_clone()?;
        let mut baby2 = partner.try_clone()?;
        baby1
            .chromosome
            .crossover(&mut baby2.chromosome, breeder.splice, rng)?;

        if rng.random::<f64>() < mutation_rate {
            baby1.mutate(breeder, rng)?;
        }
        if rng.random::<f64>() < mutation_rate {
            baby2.mutate(breeder, rng)?;
        }

        crib[slot_a] = Some(baby1);
        if slot_a != slot_b {
            crib[slot_b] = Some(baby2);
        }
        Ok(())
    }
}
