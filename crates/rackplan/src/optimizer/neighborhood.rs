use crate::model::DeviceProfile;
use crate::optimizer::common::Problem;

/// Generator of the layouts reachable from a layout by one move.
///
/// Generated layouts are not guaranteed to be feasible, every candidate still goes through the
/// validator before it is scored. Generation order must only depend on the problem and the layout,
/// ties between equally good candidates are broken by it.
pub trait Neighborhood: Send + Sync {
    fn name(&self) -> &'static str;

    fn neighbors(&self, problem: &Problem, starts: &[u32], out: &mut Vec<Vec<u32>>);
}

/// Devices that can't be told apart by any objective. Swapping them changes nothing but the move count.
fn interchangeable(a: &DeviceProfile, b: &DeviceProfile) -> bool {
    a.height_units == b.height_units
        && a.power() == b.power()
        && a.weight() == b.weight()
        && a.heat_output() == b.heat_output()
        && a.airflow_pattern == b.airflow_pattern
}

/// Exchanges the positions of two devices.
///
/// Devices of equal height trade their unit ranges. Devices of different heights are only swapped
/// when they are directly stacked, in which case they change order inside the block they occupy.
pub struct SwapNeighborhood;

impl Neighborhood for SwapNeighborhood {
    fn name(&self) -> &'static str {
        "swap"
    }

    fn neighbors(&self, problem: &Problem, starts: &[u32], out: &mut Vec<Vec<u32>>) {
        let n = problem.len();
        for a in 0..n {
            for b in a + 1..n {
                if starts[a] == starts[b] || interchangeable(&problem.devices[a], &problem.devices[b]) {
                    continue;
                }
                let mut next = starts.to_vec();
                if problem.height(a) == problem.height(b) {
                    next.swap(a, b);
                } else {
                    let (lo, hi) = if starts[a] < starts[b] { (a, b) } else { (b, a) };
                    if starts[lo] + problem.height(lo) != starts[hi] {
                        continue;
                    }
                    next[hi] = starts[lo];
                    next[lo] = starts[lo] + problem.height(hi);
                }
                out.push(next);
            }
        }
    }
}

/// Moves one device to any empty range of the rack.
pub struct SlideNeighborhood;

impl Neighborhood for SlideNeighborhood {
    fn name(&self) -> &'static str {
        "slide"
    }

    fn neighbors(&self, problem: &Problem, starts: &[u32], out: &mut Vec<Vec<u32>>) {
        let total_units = problem.capacity.total_units() as usize;

        // owner of each unit, index 0 is unit 1
        let mut owner: Vec<Option<usize>> = vec![None; total_units];
        for (i, start) in starts.iter().enumerate() {
            for unit in *start..start.saturating_add(problem.height(i)) {
                if unit >= 1 && unit as usize <= total_units {
                    owner[unit as usize - 1] = Some(i);
                }
            }
        }

        let mut blocked = vec![0usize; total_units + 1];
        for i in 0..problem.len() {
            let height = problem.height(i) as usize;
            if height == 0 || height > total_units {
                continue;
            }
            for u in 0..total_units {
                let taken = matches!(owner[u], Some(o) if o != i);
                blocked[u + 1] = blocked[u] + taken as usize;
            }
            for start in 1..=total_units - height + 1 {
                if start as u32 == starts[i] {
                    continue;
                }
                if blocked[start + height - 1] - blocked[start - 1] == 0 {
                    let mut next = starts.to_vec();
                    next[i] = start as u32;
                    out.push(next);
                }
            }
        }
    }
}
