use rand::prelude::*;
use rand_pcg::Pcg64;

use crate::optimizer::common::Problem;

/// Produces a seed layout for a hill-climbing run, or `None` if it can't build one.
///
/// Seeds used for restarts must not depend on the current layout, otherwise re-running the
/// optimizer on its own proposal could wander off to a different local optimum.
pub trait InitialLayoutGenerator {
    fn name(&self) -> &'static str;

    fn generate(&mut self, problem: &Problem, rng: &mut Pcg64) -> Option<Vec<u32>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackingOrder {
    /// Order of the current layout (used to repair an infeasible input).
    Current,
    /// Heaviest devices at the bottom.
    HeaviestFirst,
    /// Hottest and coolest devices alternate.
    HeatInterleaved,
    /// Random order.
    Shuffled,
}

/// Stacks devices bottom-up in a given order, optionally spreading the free units evenly between them.
pub struct PackingGenerator {
    order: PackingOrder,
    spread: bool,
}

impl PackingGenerator {
    pub fn new(order: PackingOrder, spread: bool) -> Self {
        Self { order, spread }
    }

    pub fn repack_current() -> Self {
        Self::new(PackingOrder::Current, false)
    }

    fn order(&self, problem: &Problem, rng: &mut Pcg64) -> Vec<usize> {
        let mut order: Vec<usize> = (0..problem.len()).collect();
        match self.order {
            PackingOrder::Current => {
                order.sort_by_key(|i| problem.current[*i].start_unit);
            }
            PackingOrder::HeaviestFirst => {
                order.sort_by(|a, b| problem.devices[*b].weight().total_cmp(&problem.devices[*a].weight()));
            }
            PackingOrder::HeatInterleaved => {
                order.sort_by(|a, b| {
                    problem.devices[*b]
                        .heat_output()
                        .total_cmp(&problem.devices[*a].heat_output())
                });
                let mut interleaved = Vec::with_capacity(order.len());
                let (mut lo, mut hi) = (0, order.len());
                while lo < hi {
                    interleaved.push(order[lo]);
                    lo += 1;
                    if lo < hi {
                        hi -= 1;
                        interleaved.push(order[hi]);
                    }
                }
                order = interleaved;
            }
            PackingOrder::Shuffled => {
                order.shuffle(rng);
            }
        }
        order
    }
}

impl InitialLayoutGenerator for PackingGenerator {
    fn name(&self) -> &'static str {
        match self.order {
            PackingOrder::Current => "repack-current",
            PackingOrder::HeaviestFirst => "heaviest-first",
            PackingOrder::HeatInterleaved => "heat-interleaved",
            PackingOrder::Shuffled => "shuffled",
        }
    }

    fn generate(&mut self, problem: &Problem, rng: &mut Pcg64) -> Option<Vec<u32>> {
        let order = self.order(problem, rng);
        pack(problem, &order, self.spread)
    }
}

/// Places devices one above another starting from unit 1.
fn pack(problem: &Problem, order: &[usize], spread: bool) -> Option<Vec<u32>> {
    let total_units = problem.capacity.total_units() as u64;
    let used: u64 = order.iter().map(|i| problem.height(*i) as u64).sum();
    if used > total_units {
        return None;
    }
    let gap = if spread && !order.is_empty() {
        (total_units - used) / order.len() as u64
    } else {
        0
    };
    let mut starts = vec![0; problem.len()];
    let mut next = 1u64;
    for i in order {
        starts[*i] = next as u32;
        next += problem.height(*i) as u64 + gap;
    }
    Some(starts)
}

/// Seed generators for restarts, in the order they are tried.
pub fn restart_generators(count: usize) -> Vec<Box<dyn InitialLayoutGenerator>> {
    (0..count)
        .map(|i| -> Box<dyn InitialLayoutGenerator> {
            match i {
                0 => Box::new(PackingGenerator::new(PackingOrder::HeaviestFirst, false)),
                1 => Box::new(PackingGenerator::new(PackingOrder::HeatInterleaved, true)),
                _ => Box::new(PackingGenerator::new(PackingOrder::Shuffled, true)),
            }
        })
        .collect()
}
