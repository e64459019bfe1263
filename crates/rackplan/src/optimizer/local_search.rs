use std::boxed::Box;
use std::sync::{Arc, Mutex};

use threadpool::ThreadPool;

use crate::optimizer::common::*;
use crate::optimizer::neighborhood::{Neighborhood, SlideNeighborhood, SwapNeighborhood};
use crate::optimizer::objective::score;
use crate::validator::validate_set;

/// Validates and scores one candidate layout. Infeasible candidates are discarded, never scored.
pub fn evaluate_candidate(problem: &Problem, starts: &[u32]) -> Option<Layout> {
    if validate_set(&problem.capacity, &problem.placements(starts)).is_err() {
        return None;
    }
    let score = score(problem, starts);
    if !score.total.is_finite() {
        return None;
    }
    Some(Layout {
        starts: starts.to_vec(),
        score,
        moves: problem.disruption(starts),
    })
}

/// Evaluates batches of candidates, either in the calling thread or on a thread pool.
///
/// Results are always returned in the order of the candidates, so the outcome of a search does not
/// depend on the number of threads.
pub struct Evaluator {
    pool: Option<ThreadPool>,
    threads: usize,
}

impl Evaluator {
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        Self {
            pool: if threads > 1 { Some(ThreadPool::new(threads)) } else { None },
            threads,
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn evaluate(&self, problem: &Arc<Problem>, candidates: Vec<Vec<u32>>) -> Vec<Option<Layout>> {
        let pool = match &self.pool {
            Some(pool) if candidates.len() >= 2 * self.threads => pool,
            _ => return candidates.iter().map(|c| evaluate_candidate(problem, c)).collect(),
        };

        let chunk_size = (candidates.len() + self.threads - 1) / self.threads;
        let mut chunks: Vec<Vec<Vec<u32>>> = Vec::new();
        let mut iter = candidates.into_iter().peekable();
        while iter.peek().is_some() {
            chunks.push(iter.by_ref().take(chunk_size).collect());
        }
        let chunk_lens: Vec<usize> = chunks.iter().map(|c| c.len()).collect();

        let results: Arc<Mutex<Vec<Option<Vec<Option<Layout>>>>>> = Arc::new(Mutex::new(vec![None; chunks.len()]));
        for (idx, chunk) in chunks.into_iter().enumerate() {
            let results = results.clone();
            let problem = problem.clone();
            pool.execute(move || {
                let evaluated: Vec<Option<Layout>> = chunk.iter().map(|c| evaluate_candidate(&problem, c)).collect();
                if let Ok(mut results) = results.lock() {
                    results[idx] = Some(evaluated);
                }
            });
        }
        pool.join();

        let slots = match results.lock() {
            Ok(mut slots) => std::mem::take(&mut *slots),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        // a chunk lost to a panicking worker counts as infeasible
        slots
            .into_iter()
            .zip(chunk_lens)
            .flat_map(|(slot, len)| slot.unwrap_or_else(|| vec![None; len]))
            .collect()
    }
}

/// Steepest-ascent hill climbing over a set of neighbourhoods.
///
/// Each step evaluates the whole neighbourhood of the current layout (as far as the budget allows)
/// and moves to the best candidate if it beats the current layout.
pub struct HillClimbing {
    neighborhoods: Vec<Box<dyn Neighborhood>>,
}

impl HillClimbing {
    pub fn new(neighborhoods: Vec<Box<dyn Neighborhood>>) -> Self {
        Self { neighborhoods }
    }

    /// Swap and slide moves.
    pub fn standard() -> Self {
        Self::new(vec![Box::new(SwapNeighborhood), Box::new(SlideNeighborhood)])
    }

    pub fn run(
        &self,
        problem: &Arc<Problem>,
        init: Layout,
        evaluator: &Evaluator,
        budget: &mut SearchBudget,
        cancel: &CancellationToken,
    ) -> (Layout, StopReason) {
        let mut curr = init;
        let mut step = 0;
        loop {
            if cancel.is_cancelled() {
                return (curr, StopReason::Cancelled);
            }
            if budget.is_exhausted() {
                return (curr, StopReason::BudgetExhausted);
            }

            let mut candidates = Vec::new();
            for neighborhood in self.neighborhoods.iter() {
                neighborhood.neighbors(problem, &curr.starts, &mut candidates);
            }
            let generated = candidates.len();
            let granted = budget.take(generated as u64) as usize;
            candidates.truncate(granted);

            let mut best: Option<Layout> = None;
            let mut feasible = 0;
            for layout in evaluator.evaluate(problem, candidates).into_iter().flatten() {
                feasible += 1;
                if best.as_ref().map_or(true, |b| layout.beats(b)) {
                    best = Some(layout);
                }
            }
            step += 1;
            log::trace!(
                "step {}: {} neighbours generated, {} evaluated, {} feasible, score {:.6}",
                step,
                generated,
                granted,
                feasible,
                curr.score.total
            );

            match best {
                Some(best) if best.beats(&curr) => curr = best,
                _ if granted < generated => return (curr, StopReason::BudgetExhausted),
                _ => return (curr, StopReason::Converged),
            }
        }
    }
}
