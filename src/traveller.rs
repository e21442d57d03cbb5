use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ParseError;
use crate::individual::Individual;
use crate::window::Schema;

/// A chromosome evolved elsewhere, imported into a running population.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Traveller {
    pub symbol: String,
    /// Attribute the chromosome was trained to forecast.
    pub attribute: String,
    pub horizon: u32,
    /// Generation at the start of which the traveller is inserted.
    #[serde(default)]
    pub generation: usize,
    pub chromosome: String,
}

impl Traveller {
    /// Parses the chromosome against `schema`. The individual comes back
    /// sick so it cannot breed before it has been scored once.
    pub fn to_individual(&self, schema: &Arc<Schema>) -> Result<Individual, ParseError> {
        let mut individual = Individual::parse(&self.chromosome, Arc::clone(schema))?;
        individual.set_is_sick(true);
        Ok(individual)
    }
}

/// Hands out insertion generations in order. Travellers beyond the end of
/// `generations` are dropped.
pub fn assign_generations(travellers: &mut Vec<Traveller>, generations: &[usize]) {
    travellers.truncate(generations.len());
    for (traveller, generation) in travellers.iter_mut().zip(generations) {
        traveller.generation = *generation;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn traveller(chromosome: &str) -> Traveller {
        Traveller {
            symbol: "ACME".to_string(),
            attribute: "close".to_string(),
            horizon: 1,
            generation: 0,
            chromosome: chromosome.to_string(),
        }
    }

    #[test]
    fn reads_json_records() {
        let travellers: Vec<Traveller> = serde_json::from_str(
            r#"[
                {"symbol": "ACME", "attribute": "close", "horizon": 1,
                 "chromosome": "(SUB 3.85202 (INV close[16]))"},
                {"symbol": "ACME", "attribute": "close", "horizon": 5,
                 "generation": 12, "chromosome": "close[0]"}
            ]"#,
        )
        .unwrap();
        assert_eq!(travellers.len(), 2);
        assert_eq!(travellers[0].generation, 0);
        assert_eq!(travellers[1].generation, 12);
        assert_eq!(travellers[1].horizon, 5);
    }

    #[test]
    fn imported_individuals_start_sick() {
        let schema = Arc::new(Schema::new(["close"]).unwrap());
        let individual = traveller("(NEG close[2])")
            .to_individual(&schema)
            .unwrap();
        assert!(individual.is_sick());
        assert!(!individual.is_dead());
        assert!(!individual.can_reproduce());
        assert_eq!(individual.to_string(), "(NEG close[2])");
    }

    #[test]
    fn malformed_chromosomes_are_reported() {
        let schema = Arc::new(Schema::new(["close"]).unwrap());
        assert_eq!(
            traveller("(NEG open[2])")
                .to_individual(&schema)
                .unwrap_err(),
            ParseError::UnknownAttribute("open".to_string())
        );
    }

    #[test]
    fn generations_are_assigned_in_order() {
        let mut travellers = vec![traveller("1"), traveller("2"), traveller("3")];
        assign_generations(&mut travellers, &[4, 9]);
        assert_eq!(travellers.len(), 2);
        assert_eq!(travellers[0].generation, 4);
        assert_eq!(travellers[1].generation, 9);
    }
}
