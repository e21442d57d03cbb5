use std::error::Error;
use std::sync::Arc;

use sibyl_gp::AttrWindow;
use sibyl_gp::EvolutionConfig;
use sibyl_gp::Population;
use sibyl_gp::PriceSeries;
use sibyl_gp::Schema;
use sibyl_gp::Traveller;
use sibyl_gp::WindowedError;

const DAYS: usize = 30;
const HORIZON: usize = 1;
const ROWS: usize = 400;

/// Deterministic daily bars: a slow trend with two overlapping cycles.
fn synthetic_series() -> Result<PriceSeries, Box<dyn Error>> {
    let schema = Arc::new(Schema::new(["open", "high", "low", "close", "volume"])?);
    let close: Vec<f64> = (0..ROWS)
        .map(|day| {
            let t = day as f64;
            100.0 + 0.05 * t + 3.0 * (t / 9.0).sin() + 1.5 * (t / 4.0).cos()
        })
        .collect();
    let open: Vec<f64> = close
        .iter()
        .enumerate()
        .map(|(day, c)| if day == 0 { *c } else { close[day - 1] })
        .collect();
    let high = open.iter().zip(&close).map(|(o, c)| o.max(*c) + 0.4).collect();
    let low = open.iter().zip(&close).map(|(o, c)| o.min(*c) - 0.4).collect();
    let volume = (0..ROWS)
        .map(|day| 1_000.0 + 250.0 * (day as f64 / 5.0).sin().abs())
        .collect();
    Ok(PriceSeries::new(schema, vec![open, high, low, close, volume])?)
}

pub fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => EvolutionConfig::load(path)?,
        None => EvolutionConfig {
            max_offset: DAYS as u16,
            generations: 50,
            ..EvolutionConfig::default()
        },
    };

    config.validate_window(DAYS)?;

    let series = synthetic_series()?;
    let evaluator = WindowedError::new(series.windows(DAYS, HORIZON, "close")?, config.metric);
    let mut population = Population::from_config(config, Arc::clone(series.schema()))?;

    // yesterday's close is a fair starting point
    let _ready = population.ready_travellers(vec![Traveller {
        symbol: "SYN".to_string(),
        attribute: "close".to_string(),
        horizon: HORIZON as u32,
        generation: 0,
        chromosome: "close[0]".to_string(),
    }]);

    let evolution = population.evolve(&evaluator)?;
    println!(
        "best after {} generation(s){}: {}",
        evolution.generations,
        if evolution.converged { " (converged)" } else { "" },
        evolution.best_fitness
    );
    println!("{}", evolution.best_solution);

    let close = series.schema().position("close").ok_or("series has no close column")?;
    if let Some(window) = series.latest(DAYS) {
        if let (Some(last_close), Some(forecast)) =
            (window.lookup(close, 0), population.prophesy(&window))
        {
            println!(
                "last close {last_close:.4}, forecast {forecast} from {} training window(s)",
                evaluator.windows().len()
            );
        }
    }
    Ok(())
}
