use std::num::NonZeroUsize;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use strum::VariantArray;

use crate::chromosome::SplicePolicy;
use crate::error::ConfigError;
use crate::factory::NodeWeights;
use crate::op::Op;
use crate::population::ErrorMetric;
use crate::value::EPSILON;

const DEFAULT_POPULATION: NonZeroUsize = NonZeroUsize::new(500).unwrap();
const DEFAULT_TOURNAMENT: NonZeroUsize = NonZeroUsize::new(7).unwrap();

/// Parameters of one evolutionary run. Missing TOML keys fall back to
/// [`Default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    pub population_size: NonZeroUsize,
    /// Upper bound on scored generations.
    pub generations: usize,
    pub tournament_size: NonZeroUsize,
    /// Chance each offspring is mutated after crossover.
    pub mutation_rate: f64,
    /// Carry the best-ever individual unchanged into every new generation.
    pub elitism: bool,
    /// Depth of seeded trees and the budget mutation grows from.
    pub max_depth: usize,
    pub splice: SplicePolicy,
    pub node_weights: NodeWeights,
    pub operators: Vec<Op>,
    /// Lookups draw offsets from `0..max_offset`, normally the window length.
    pub max_offset: u16,
    pub metric: ErrorMetric,
    /// Stop once the best fitness is at or below this.
    pub target_fitness: f64,
    /// Stop when the best fitness has not improved for this many generations.
    pub stall_generations: Option<usize>,
    pub seed: u64,
    /// Insertion generations handed out, in order, to imported travellers.
    pub traveller_generations: Vec<usize>,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: DEFAULT_POPULATION,
            generations: 100,
            tournament_size: DEFAULT_TOURNAMENT,
            mutation_rate: 0.1,
            elitism: true,
            max_depth: 6,
            splice: SplicePolicy::Uniform,
            node_weights: NodeWeights::default(),
            operators: Op::VARIANTS.to_vec(),
            max_offset: 90,
            metric: ErrorMetric::Absolute,
            target_fitness: EPSILON,
            stall_generations: None,
            seed: 0,
            traveller_generations: Vec::new(),
        }
    }
}

impl EvolutionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.population_size.get() < 2 {
            return invalid("population size must be at least 2");
        }
        if self.generations == 0 {
            return invalid("generations must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return invalid("mutation rate must be between 0 and 1");
        }
        if let SplicePolicy::Descend { stop } = self.splice {
            if !(0.0..=1.0).contains(&stop) {
                return invalid("splice stop chance must be between 0 and 1");
            }
        }
        if self.target_fitness.is_nan() {
            return invalid("target fitness must be a number");
        }
        Ok(())
    }

    /// Lookups draw offsets from `0..max_offset`; any offset of `days` or
    /// more is outside a `days`-row window and would fault on every window.
    pub fn validate_window(&self, days: usize) -> Result<(), ConfigError> {
        if usize::from(self.max_offset) > days {
            return Err(ConfigError::Invalid(format!(
                "max offset {} reaches past a {days}-day window",
                self.max_offset
            )));
        }
        Ok(())
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod test {
    use nonzero_lit::usize;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        EvolutionConfig::default().validate().unwrap();
    }

    #[test]
    fn reads_partial_toml() {
        let config = EvolutionConfig::from_toml_str(
            r#"
            population_size = 64
            generations = 10
            mutation_rate = 0.25
            operators = ["ADD", "SUB", "INV"]
            metric = "squared"
            splice = { kind = "descend", stop = 0.5 }
            traveller_generations = [0, 5]
            "#,
        )
        .unwrap();
        assert_eq!(config.population_size, usize!(64));
        assert_eq!(config.tournament_size, usize!(7));
        assert_eq!(config.operators, vec![Op::Add, Op::Sub, Op::Inv]);
        assert_eq!(config.metric, ErrorMetric::Squared);
        assert_eq!(config.splice, SplicePolicy::Descend { stop: 0.5 });
        assert_eq!(config.traveller_generations, vec![0, 5]);
        assert!(config.elitism);
    }

    #[test]
    fn rejects_bad_values() {
        for text in [
            "population_size = 1",
            "generations = 0",
            "mutation_rate = 1.5",
            "splice = { kind = \"descend\", stop = 2.0 }",
        ] {
            assert!(
                matches!(
                    EvolutionConfig::from_toml_str(text),
                    Err(ConfigError::Invalid(_))
                ),
                "{text}"
            );
        }
        assert!(matches!(
            EvolutionConfig::from_toml_str("population_size = 0"),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            EvolutionConfig::from_toml_str("operators = [\"FOO\"]"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn max_offset_must_fit_the_window() {
        let config = EvolutionConfig::from_toml_str("generations = 3").unwrap();
        assert_eq!(config.max_offset, 90);
        assert!(config.validate_window(90).is_ok());
        assert!(matches!(
            config.validate_window(30),
            Err(ConfigError::Invalid(_))
        ));

        let config = EvolutionConfig::from_toml_str("max_offset = 30").unwrap();
        assert!(config.validate_window(30).is_ok());
        assert!(config.validate_window(29).is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let config = EvolutionConfig {
            population_size: usize!(10),
            stall_generations: Some(3),
            ..EvolutionConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: EvolutionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
