//! Route discovery
//!
//! Breadth-first search over the mesh graph. Neighbours are expanded in the
//! order the caller yields them, so ties between equal-length paths resolve
//! deterministically toward the first-yielded neighbour.

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::hash::Hash;

use tracing::trace;

use crate::error::{RoutingError, RoutingResult};

/// Shortest path from `start` to `goal`, both included
///
/// `neighbors` yields the devices reachable in one hop from a device.
pub fn shortest_path<N, F, I>(start: N, goal: N, mut neighbors: F) -> RoutingResult<Vec<N>>
where
    N: Copy + Eq + Hash + Display,
    F: FnMut(N) -> I,
    I: IntoIterator<Item = N>,
{
    if start == goal {
        return Ok(vec![start]);
    }

    let mut previous: HashMap<N, N> = HashMap::new();
    let mut queue = VecDeque::from([start]);
    previous.insert(start, start);

    while let Some(current) = queue.pop_front() {
        for next in neighbors(current) {
            if previous.contains_key(&next) {
                continue;
            }
            previous.insert(next, current);

            if next == goal {
                let path = walk_back(&previous, start, goal);
                trace!(from = %start, to = %goal, hops = path.len() - 1, "Route discovered");
                return Ok(path);
            }
            queue.push_back(next);
        }
    }

    Err(RoutingError::NoRoute {
        from: start.to_string(),
        to: goal.to_string(),
    })
}

fn walk_back<N: Copy + Eq + Hash>(previous: &HashMap<N, N>, start: N, goal: N) -> Vec<N> {
    let mut path = vec![goal];
    let mut current = goal;
    while current != start {
        match previous.get(&current) {
            Some(&prev) => {
                path.push(prev);
                current = prev;
            }
            None => break,
        }
    }
    path.reverse();
    path
}
