//! The generational loop.
//!
//! Every generation is scored in parallel, then a crib of the same size is
//! filled by tournament-selected parents and replaces the population. All
//! randomness comes from the population's own seeded generator, so a run is
//! reproducible from [`EvolutionConfig::seed`].

use std::iter;
use std::mem;
use std::sync::Arc;

use rand::Rng;
use rand::SeedableRng;
use rand::seq::index;
use rayon::prelude::*;
use serde::Deserialize;
use serde::Serialize;

use crate::Random;
use crate::chromosome::Chromosome;
use crate::config::EvolutionConfig;
use crate::error::ConfigError;
use crate::error::EvolveError;
use crate::error::Fault;
use crate::factory::Breeder;
use crate::factory::RandomNodeGenerator;
use crate::factory::WeightedNodeGenerator;
use crate::individual::Individual;
use crate::individual::UNFIT;
use crate::traveller::Traveller;
use crate::traveller::assign_generations;
use crate::value::Value;
use crate::window::AttrWindow;
use crate::window::Schema;

/// Scores a chromosome; lower is better.
pub trait Evaluator: Sync {
    fn evaluate(&self, chromosome: &Chromosome) -> Result<f64, Fault>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMetric {
    #[default]
    Absolute,
    Squared,
}

impl ErrorMetric {
    pub fn error(self, forecast: f64, target: f64) -> f64 {
        let diff = forecast - target;
        match self {
            Self::Absolute => diff.abs(),
            Self::Squared => diff * diff,
        }
    }
}

/// Mean forecast error over a fixed set of training windows.
#[derive(Clone, Debug)]
pub struct WindowedError<W> {
    windows: Vec<W>,
    metric: ErrorMetric,
}

impl<W: AttrWindow> WindowedError<W> {
    pub const fn new(windows: Vec<W>, metric: ErrorMetric) -> Self {
        Self { windows, metric }
    }

    pub fn windows(&self) -> &[W] {
        &self.windows
    }
}

impl<W: AttrWindow> Evaluator for WindowedError<W> {
    /// Any fault on any window fails the chromosome. An empty window set
    /// or an overflowing sum is reported as [`Fault::Metric`].
    fn evaluate(&self, chromosome: &Chromosome) -> Result<f64, Fault> {
        let mut total = 0.0;
        for window in &self.windows {
            let forecast = chromosome.execute(window)?;
            total += self.metric.error(forecast.0, window.target());
        }
        let mean = total / self.windows.len() as f64;
        if mean.is_finite() {
            Ok(mean)
        } else {
            Err(Fault::Metric)
        }
    }
}

/// What happened in one call to [`Population::step`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationStats {
    pub generation: usize,
    /// Best fitness seen so far in the run.
    pub best_fitness: f64,
    /// Best fitness in this generation alone.
    pub leader_fitness: f64,
    /// Mean fitness of the individuals able to reproduce.
    pub mean_fitness: f64,
    pub eligible: usize,
    pub dead: usize,
    /// Crib slots left to their previous occupant after a failed mating.
    pub shortfall: usize,
    pub converged: bool,
}

/// Outcome of [`Population::evolve`].
#[derive(Clone, Debug, PartialEq)]
pub struct Evolution {
    pub best_fitness: f64,
    pub best_solution: String,
    /// Generations scored, including the one that converged.
    pub generations: usize,
    pub converged: bool,
}

#[derive(Debug)]
pub struct Population<G> {
    individuals: Vec<Individual>,
    breeder: Breeder<G>,
    config: EvolutionConfig,
    generation: usize,
    best: Option<Individual>,
    stalled: usize,
    /// Readied travellers waiting for their insertion generation, in order.
    travellers: Vec<(usize, Individual)>,
    rng: Random,
}

impl Population<WeightedNodeGenerator> {
    /// Population whose node generator is built from the config's operator
    /// set, weights and lookup range over `schema`.
    pub fn from_config(config: EvolutionConfig, schema: Arc<Schema>) -> Result<Self, ConfigError> {
        let generator = WeightedNodeGenerator::new(
            schema,
            config.operators.clone(),
            config.max_offset,
            config.node_weights,
        )?;
        Self::new(config, generator)
    }
}

impl<G: RandomNodeGenerator> Population<G> {
    pub fn new(config: EvolutionConfig, generator: G) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut rng = Random::seed_from_u64(config.seed);
        let breeder = Breeder {
            generator,
            splice: config.splice,
            max_depth: config.max_depth,
        };
        let individuals = iter::repeat_with(|| Individual::new_random(&breeder, &mut rng))
            .take(config.population_size.get())
            .collect();
        Ok(Self {
            individuals,
            breeder,
            config,
            generation: 0,
            best: None,
            stalled: 0,
            travellers: Vec::new(),
            rng,
        })
    }

    pub const fn generation(&self) -> usize {
        self.generation
    }

    pub fn individuals(&self) -> &[Individual] {
        &self.individuals
    }

    pub const fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    pub const fn breeder(&self) -> &Breeder<G> {
        &self.breeder
    }

    pub const fn best_individual(&self) -> Option<&Individual> {
        self.best.as_ref()
    }

    /// [`UNFIT`] until a generation has been scored.
    pub fn best_fitness(&self) -> f64 {
        self.best.as_ref().map_or(UNFIT, Individual::fitness)
    }

    pub fn best_solution(&self) -> Option<String> {
        self.best.as_ref().map(ToString::to_string)
    }

    /// Forecast of the best chromosome so far for `window`.
    pub fn prophesy<W: AttrWindow + ?Sized>(&self, window: &W) -> Option<Value> {
        self.best.as_ref().map(|best| best.chromo_value(window))
    }

    /// Parses `travellers` and queues them for insertion. When the config
    /// lists traveller generations they replace the records' own.
    /// Malformed travellers are skipped. Returns how many were queued.
    pub fn ready_travellers(&mut self, mut travellers: Vec<Traveller>) -> usize {
        if !self.config.traveller_generations.is_empty() {
            assign_generations(&mut travellers, &self.config.traveller_generations);
        }
        let before = self.travellers.len();
        for traveller in travellers {
            match traveller.to_individual(self.breeder.generator.schema()) {
                Ok(individual) => self.travellers.push((traveller.generation, individual)),
                Err(e) => log::warn!(
                    "skipping traveller {} {}+{}: {e}",
                    traveller.symbol,
                    traveller.attribute,
                    traveller.horizon
                ),
            }
        }
        self.travellers.sort_by_key(|(generation, _)| *generation);
        self.travellers.len() - before
    }

    /// Moves the travellers due by now into the last slots. Slot 0 is left
    /// alone when elitism is on.
    fn insert_travellers(&mut self) {
        let (due, pending) = mem::take(&mut self.travellers)
            .into_iter()
            .partition::<Vec<_>, _>(|(generation, _)| *generation <= self.generation);
        self.travellers = pending;
        if due.is_empty() {
            return;
        }

        let first = usize::from(self.config.elitism);
        let mut slots = (first..self.individuals.len()).rev();
        let mut inserted = 0;
        for (_, traveller) in due {
            match slots.next() {
                Some(slot) => {
                    self.individuals[slot] = traveller;
                    inserted += 1;
                }
                None => log::warn!(
                    "generation {}: no slot left for traveller {traveller}",
                    self.generation
                ),
            }
        }
        log::debug!(
            "generation {}: inserted {inserted} traveller(s)",
            self.generation
        );
    }

    /// Scores every living individual. A fault kills it, a successful
    /// score heals it.
    pub fn score(&mut self, evaluator: &impl Evaluator) {
        self.individuals
            .par_iter_mut()
            .filter(|individual| !individual.is_dead())
            .for_each(|individual| match evaluator.evaluate(individual.chromosome()) {
                Ok(fitness) => {
                    individual.set_fitness(fitness);
                    individual.set_is_sick(false);
                }
                Err(_) => {
                    individual.set_fitness(UNFIT);
                    individual.set_is_dead(true);
                }
            });
    }

    /// Runs one generation: insert due travellers, score, track the best
    /// and breed the next generation unless the run has converged.
    pub fn step(&mut self, evaluator: &impl Evaluator) -> Result<GenerationStats, EvolveError> {
        self.insert_travellers();
        self.score(evaluator);

        let eligible: Vec<usize> = self
            .individuals
            .iter()
            .enumerate()
            .filter(|(_, individual)| individual.can_reproduce())
            .map(|(i, _)| i)
            .collect();
        let dead = self.individuals.iter().filter(|i| i.is_dead()).count();
        let leader = eligible
            .iter()
            .copied()
            .min_by(|&l, &r| {
                self.individuals[l]
                    .fitness()
                    .total_cmp(&self.individuals[r].fitness())
            })
            .ok_or(EvolveError::NoEligibleParents {
                generation: self.generation,
            })?;

        let leader_fitness = self.individuals[leader].fitness();
        if self.best.is_none() || leader_fitness < self.best_fitness() {
            let mut best = self.individuals[leader].clone();
            best.set_fitness(leader_fitness);
            log::debug!(
                "generation {}: new best {leader_fitness} {best}",
                self.generation
            );
            self.best = Some(best);
            self.stalled = 0;
        } else {
            self.stalled += 1;
        }

        let mean_fitness = eligible
            .iter()
            .map(|&i| self.individuals[i].fitness())
            .sum::<f64>()
            / eligible.len() as f64;
        let converged = self.best_fitness() <= self.config.target_fitness
            || self
                .config
                .stall_generations
                .is_some_and(|limit| self.stalled >= limit);

        let mut stats = GenerationStats {
            generation: self.generation,
            best_fitness: self.best_fitness(),
            leader_fitness,
            mean_fitness,
            eligible: eligible.len(),
            dead,
            shortfall: 0,
            converged,
        };
        log::info!(
            "generation {}: best {} leader {} mean {} eligible {} dead {}",
            stats.generation,
            stats.best_fitness,
            stats.leader_fitness,
            stats.mean_fitness,
            stats.eligible,
            stats.dead
        );

        if !converged {
            stats.shortfall = self.breed(&eligible)?;
            self.generation += 1;
        }
        Ok(stats)
    }

    /// Fills a crib pairwise from tournament winners and makes it the new
    /// population. Returns the number of slots no offspring reached.
    fn breed(&mut self, eligible: &[usize]) -> Result<usize, EvolveError> {
        let size = self.individuals.len();
        let mut crib: Vec<Option<Individual>> = iter::repeat_with(|| None).take(size).collect();

        let mut slot = 0;
        if self.config.elitism {
            if let Some(best) = &self.best {
                crib[0] = Some(best.clone());
                slot = 1;
            }
        }

        let no_parents = EvolveError::NoEligibleParents {
            generation: self.generation,
        };
        let tournament = self.config.tournament_size.get();
        let mut shortfall = 0;
        while slot < size {
            let pair = (slot, (slot + 1).min(size - 1));
            let mom = select_by_tournament(&self.individuals, eligible, tournament, &mut self.rng)
                .ok_or_else(|| no_parents.clone())?;
            let dad = select_by_tournament(&self.individuals, eligible, tournament, &mut self.rng)
                .ok_or_else(|| no_parents.clone())?;
            if let Err(e) = self.individuals[mom].mate(
                &self.individuals[dad],
                &mut crib,
                pair.0,
                pair.1,
                self.config.mutation_rate,
                &self.breeder,
                &mut self.rng,
            ) {
                let missed = pair.1 - pair.0 + 1;
                log::warn!(
                    "generation {}: {missed} slot(s) keep their occupant: {e}",
                    self.generation
                );
                shortfall += missed;
            }
            slot += 2;
        }

        let previous = mem::take(&mut self.individuals);
        self.individuals = crib
            .into_iter()
            .zip(previous)
            .map(|(baby, occupant)| match baby {
                Some(baby) => baby,
                None if occupant.is_dead() => Individual::new_random(&self.breeder, &mut self.rng),
                None => occupant,
            })
            .collect();
        Ok(shortfall)
    }

    /// Steps until convergence or the generation budget runs out.
    pub fn evolve(&mut self, evaluator: &impl Evaluator) -> Result<Evolution, EvolveError> {
        let mut generations = 0;
        let mut converged = false;
        while generations < self.config.generations {
            let stats = self.step(evaluator)?;
            generations += 1;
            if stats.converged {
                converged = true;
                break;
            }
        }

        // every successful step records a best
        let best_fitness = self.best_fitness();
        let best_solution = self.best_solution().unwrap_or_default();
        log::info!("finished after {generations} generation(s), best {best_fitness}: {best_solution}");
        Ok(Evolution {
            best_fitness,
            best_solution,
            generations,
            converged,
        })
    }
}

/// Fittest of `size` distinct individuals drawn from `eligible`, or `None`
/// when nothing is eligible.
fn select_by_tournament(
    individuals: &[Individual],
    eligible: &[usize],
    size: usize,
    rng: &mut impl Rng,
) -> Option<usize> {
    index::sample(rng, eligible.len(), size.min(eligible.len()))
        .iter()
        .map(|i| eligible[i])
        .min_by(|&l, &r| individuals[l].fitness().total_cmp(&individuals[r].fitness()))
}

#[cfg(test)]
mod test {
    use nonzero_lit::usize;

    use super::*;
    use crate::PriceSeries;
    use crate::op::Op;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(["open", "close"]).unwrap())
    }

    fn series() -> PriceSeries {
        let close: Vec<f64> = (0..40).map(|d| 50.0 + f64::from(d % 7)).collect();
        let open = close.iter().map(|c| c + 1.0).collect();
        PriceSeries::new(schema(), vec![open, close]).unwrap()
    }

    fn config() -> EvolutionConfig {
        EvolutionConfig {
            population_size: usize!(40),
            generations: 5,
            max_depth: 3,
            max_offset: 5,
            operators: vec![Op::Add, Op::Sub, Op::Mul, Op::Neg, Op::Inv],
            ..EvolutionConfig::default()
        }
    }

    struct Constant(Result<f64, Fault>);

    impl Evaluator for Constant {
        fn evaluate(&self, _: &Chromosome) -> Result<f64, Fault> {
            self.0
        }
    }

    #[test]
    fn seeds_the_configured_size() {
        let population = Population::from_config(config(), schema()).unwrap();
        assert_eq!(population.individuals().len(), 40);
        assert!(population.individuals().iter().all(Individual::can_reproduce));
        assert_eq!(population.best_fitness(), UNFIT);
        assert!(population.best_solution().is_none());
    }

    #[test]
    fn metrics_measure_distance() {
        assert_eq!(ErrorMetric::Absolute.error(1.0, 3.0), 2.0);
        assert_eq!(ErrorMetric::Squared.error(1.0, 3.0), 4.0);
    }

    #[test]
    fn windowed_error_is_the_mean() {
        let series = series();
        let windows = series.windows(5, 1, "close").unwrap();
        let count = windows.len() as f64;
        let targets: f64 = windows.iter().map(AttrWindow::target).sum();
        let evaluator = WindowedError::new(windows, ErrorMetric::Absolute);

        let zero = Chromosome::constant(Value(0.0), schema());
        let fitness = evaluator.evaluate(&zero).unwrap();
        assert!((fitness - targets / count).abs() < 1e-9);

        let none: WindowedError<crate::PriceWindow<'_>> =
            WindowedError::new(Vec::new(), ErrorMetric::Absolute);
        assert_eq!(none.evaluate(&zero), Err(Fault::Metric));
    }

    #[test]
    fn inverting_zero_kills_the_individual() {
        let schema = Arc::new(Schema::new(["close"]).unwrap());
        let series = PriceSeries::new(Arc::clone(&schema), vec![vec![0.0; 10]]).unwrap();
        let evaluator = WindowedError::new(series.windows(3, 1, "close").unwrap(), ErrorMetric::Absolute);

        let mut population = Population::from_config(config(), Arc::clone(&schema)).unwrap();
        population.individuals[0] = Individual::parse("(INV close[0])", Arc::clone(&schema)).unwrap();
        population.individuals[1] = Individual::parse("(ADD close[0] 1)", schema).unwrap();
        population.score(&evaluator);

        assert!(population.individuals[0].is_dead());
        assert!(!population.individuals[0].can_reproduce());
        assert_eq!(population.individuals[0].fitness(), UNFIT);
        assert!(!population.individuals[1].is_dead());
        assert_eq!(population.individuals[1].fitness(), 1.0);
    }

    #[test]
    fn scoring_heals_the_sick() {
        let mut population = Population::from_config(config(), schema()).unwrap();
        population.individuals[3].set_is_sick(true);
        population.score(&Constant(Ok(2.0)));
        assert!(population.individuals[3].can_reproduce());
        assert_eq!(population.individuals[3].fitness(), 2.0);
    }

    #[test]
    fn nothing_eligible_is_an_error() {
        let mut population = Population::from_config(config(), schema()).unwrap();
        assert_eq!(
            population.step(&Constant(Err(Fault::Metric))),
            Err(EvolveError::NoEligibleParents { generation: 0 })
        );
    }

    #[test]
    fn step_breeds_a_full_generation() {
        let series = series();
        let evaluator = WindowedError::new(series.windows(5, 1, "close").unwrap(), ErrorMetric::Absolute);
        let mut population = Population::from_config(
            EvolutionConfig {
                population_size: usize!(41),
                ..config()
            },
            schema(),
        )
        .unwrap();

        let stats = population.step(&evaluator).unwrap();
        assert_eq!(stats.generation, 0);
        assert!(!stats.converged);
        assert_eq!(stats.shortfall, 0);
        assert_eq!(stats.eligible + stats.dead, 41);
        assert_eq!(stats.best_fitness, stats.leader_fitness);
        assert_eq!(population.generation(), 1);
        assert_eq!(population.individuals().len(), 41);

        // slot 0 holds the elite
        assert_eq!(
            population.individuals()[0].chromosome(),
            population.best_individual().unwrap().chromosome()
        );
    }

    #[test]
    fn first_scored_generation_always_sets_the_best() {
        let mut population = Population::from_config(config(), schema()).unwrap();
        let evolution = population.evolve(&Constant(Ok(UNFIT))).unwrap();
        assert_eq!(evolution.best_fitness, UNFIT);
        assert!(!evolution.best_solution.is_empty());
        assert_eq!(
            population.best_solution().as_deref(),
            Some(evolution.best_solution.as_str())
        );
        assert_eq!(evolution.generations, 5);
    }

    #[test]
    fn reaching_the_target_stops_breeding() {
        let mut population = Population::from_config(config(), schema()).unwrap();
        let stats = population.step(&Constant(Ok(0.0))).unwrap();
        assert!(stats.converged);
        assert_eq!(population.generation(), 0);
    }

    #[test]
    fn stalling_converges() {
        let mut population = Population::from_config(
            EvolutionConfig {
                stall_generations: Some(2),
                generations: 10,
                ..config()
            },
            schema(),
        )
        .unwrap();
        let evolution = population.evolve(&Constant(Ok(1.0))).unwrap();
        assert!(evolution.converged);
        assert_eq!(evolution.generations, 3);
        assert_eq!(evolution.best_fitness, 1.0);
    }

    #[test]
    fn travellers_wait_for_their_generation() {
        let series = series();
        let evaluator = WindowedError::new(series.windows(5, 1, "close").unwrap(), ErrorMetric::Absolute);
        let mut population = Population::from_config(config(), schema()).unwrap();
        let traveller = |generation| Traveller {
            symbol: "ACME".to_string(),
            attribute: "close".to_string(),
            horizon: 1,
            generation,
            chromosome: "(NEG (NEG close[1]))".to_string(),
        };
        assert_eq!(population.ready_travellers(vec![traveller(1)]), 1);

        population.step(&evaluator).unwrap();
        assert_eq!(population.travellers.len(), 1);
        population.insert_travellers();
        let last = population.individuals().last().unwrap();
        assert_eq!(last.to_string(), "(NEG (NEG close[1]))");
        assert!(last.is_sick());
        assert!(population.travellers.is_empty());
    }
}
