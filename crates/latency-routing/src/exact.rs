//! Exact shortest-path reference router.
//!
//! The production router is a greedy lookahead heuristic and can take a
//! longer path than necessary (or dead-end where a path exists). For
//! correctness-critical latency reporting this module materializes the
//! gated mesh as a graph and runs Dijkstra, giving the true minimum
//! distance to compare against. It is deliberately not the default: the
//! greedy walk is what the operational reports are produced with.

use crate::{ConstellationSnapshot, Result, RoutePath, RoutingError};
use constellation_core::{distance_m, EciPosition, SatelliteId};
use mesh_topology::MeshResolver;
use petgraph::algo::astar;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;
use tracing::debug;

/// Minimum-distance route from `origin` to `destination` over the gated
/// mesh, origin leg included, computed with Dijkstra (A* with a zero
/// heuristic).
pub fn shortest_route(
    resolver: &MeshResolver,
    snapshot: &ConstellationSnapshot,
    origin: &EciPosition,
    destination: &SatelliteId,
    reachable: impl Fn(&SatelliteId, &SatelliteId) -> bool,
) -> Result<RoutePath> {
    if snapshot.position(destination).is_none() {
        return Err(RoutingError::UnknownSatellite(destination.clone()));
    }
    let (first, origin_leg_m) = snapshot
        .nearest_to(origin)
        .ok_or(RoutingError::EmptyConstellation)?;
    let first = first.clone();

    // Materialize the gated mesh.
    let mut graph: DiGraph<SatelliteId, f64> = DiGraph::new();
    let mut nodes: HashMap<SatelliteId, NodeIndex> = HashMap::new();
    for (id, _) in snapshot.satellites() {
        nodes.insert(id.clone(), graph.add_node(id.clone()));
    }
    for (id, pos) in snapshot.satellites() {
        for neighbor in resolver.neighbors(id)? {
            if !reachable(id, &neighbor) {
                continue;
            }
            if let Some(neighbor_pos) = snapshot.position(&neighbor) {
                graph.add_edge(
                    nodes[id],
                    nodes[&neighbor],
                    distance_m(pos, neighbor_pos),
                );
            }
        }
    }
    debug!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "materialized gated mesh"
    );

    let goal = nodes[destination];
    let path = astar(
        &graph,
        nodes[&first],
        |n| n == goal,
        |e| *e.weight(),
        |_| 0.0,
    );

    match path {
        Some((mesh_distance_m, node_path)) => {
            let hops: Vec<SatelliteId> = node_path
                .into_iter()
                .map(|idx| graph[idx].clone())
                .collect();
            Ok(RoutePath::new(hops, origin_leg_m + mesh_distance_m))
        }
        None => Err(RoutingError::NoPath {
            from: first,
            to: destination.clone(),
        }),
    }
}
