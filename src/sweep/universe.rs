//! Route universe: every ordered pair of distinct airports, in table order.
//!
//! The ordering is part of the persisted state. A stored `route_index` points
//! into this list, so the same airport table and filter must always yield the
//! same sequence.

use sha2::{Digest, Sha256};

use crate::types::{Airport, Route};

/// Ordered (origin, destination) pairs, outer loop over origins.
/// With `international_only`, pairs within one country are skipped.
pub fn build_routes(airports: &[Airport], international_only: bool) -> Vec<Route> {
    let mut routes = Vec::new();
    for (i, origin) in airports.iter().enumerate() {
        for (j, destination) in airports.iter().enumerate() {
            if i == j || origin.code == destination.code {
                continue;
            }
            if international_only && origin.country == destination.country {
                continue;
            }
            routes.push(Route {
                origin: origin.code.clone(),
                destination: destination.code.clone(),
            });
        }
    }
    routes
}

/// `routes × trip_lengths`, all trip lengths of route i before route i+1.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    routes: Vec<Route>,
    trip_lengths: Vec<i64>,
}

impl WorkQueue {
    fn new(routes: Vec<Route>, trip_lengths: Vec<i64>) -> Self {
        Self {
            routes,
            trip_lengths,
        }
    }

    pub fn from_airports(airports: &[Airport], international_only: bool, trip_lengths: Vec<i64>) -> Self {
        Self::new(build_routes(airports, international_only), trip_lengths)
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn trip_lengths(&self) -> &[i64] {
        &self.trip_lengths
    }

    pub fn route(&self, index: usize) -> Option<&Route> {
        self.routes.get(index)
    }

    /// Digest of the ordered route list. Two tables with the same number of
    /// routes in a different order get different signatures.
    pub fn signature(&self) -> String {
        let mut hasher = Sha256::new();
        for route in &self.routes {
            hasher.update(route.origin.as_bytes());
            hasher.update(b"-");
            hasher.update(route.destination.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(&hasher.finalize()[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_airports;

    fn airports() -> Vec<Airport> {
        vec![
            Airport::new("JFK", "US"),
            Airport::new("LAX", "US"),
            Airport::new("LHR", "GB"),
        ]
    }

    fn pair(route: &Route) -> (&str, &str) {
        (route.origin.as_str(), route.destination.as_str())
    }

    #[test]
    fn all_ordered_pairs_in_table_order() {
        let routes = build_routes(&airports(), false);
        let pairs: Vec<_> = routes.iter().map(pair).collect();
        assert_eq!(
            pairs,
            vec![
                ("JFK", "LAX"),
                ("JFK", "LHR"),
                ("LAX", "JFK"),
                ("LAX", "LHR"),
                ("LHR", "JFK"),
                ("LHR", "LAX"),
            ]
        );
    }

    #[test]
    fn international_only_drops_domestic_pairs() {
        let routes = build_routes(&airports(), true);
        let pairs: Vec<_> = routes.iter().map(pair).collect();
        assert_eq!(
            pairs,
            vec![("JFK", "LHR"), ("LAX", "LHR"), ("LHR", "JFK"), ("LHR", "LAX")]
        );
    }

    #[test]
    fn identical_inputs_give_identical_lists() {
        let table = default_airports();
        let n = table.len();
        let a = build_routes(&table, false);
        let b = build_routes(&table, false);
        assert_eq!(a, b);
        assert_eq!(a.len(), n * (n - 1));

        let c = build_routes(&table, true);
        let d = build_routes(&table, true);
        assert_eq!(c, d);
        assert!(c.len() < a.len());
    }

    #[test]
    fn work_queue_indexes_routes_in_order() {
        let queue = WorkQueue::from_airports(&airports(), false, vec![7, 14]);
        assert_eq!(queue.route_count(), 6);
        assert_eq!(queue.trip_lengths(), &[7, 14]);
        assert_eq!(pair(queue.route(0).unwrap()), ("JFK", "LAX"));
        assert_eq!(pair(queue.route(4).unwrap()), ("LHR", "JFK"));
        assert!(queue.route(6).is_none());
    }

    #[test]
    fn signature_tracks_route_order() {
        let a = WorkQueue::from_airports(&airports(), false, vec![7]);
        let same = WorkQueue::from_airports(&airports(), false, vec![14]);
        assert_eq!(a.signature(), same.signature());
        assert_eq!(a.signature().len(), 16);

        let mut reordered = airports();
        reordered.swap(0, 2);
        let b = WorkQueue::from_airports(&reordered, false, vec![7]);
        assert_eq!(a.route_count(), b.route_count());
        assert_ne!(a.signature(), b.signature());
    }
}
