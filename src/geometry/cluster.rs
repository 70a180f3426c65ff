//! Greedy single-link clustering of centroids by proximity.

use geo_types::Coord;

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

fn euclidean(a: Coord<f64>, b: Coord<f64>) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// Clusters items (given by their centroid) such that any two centroids
/// within `dist` millimeters end up in the same cluster (transitively).
///
/// `dist <= 0.0` degenerates to every item being its own cluster, even if
/// centroids coincide exactly. Cluster order, and item order within each
/// cluster, is deterministic for equal input.
pub fn cluster_by_proximity(centroids: &[Coord<f64>], dist: f64) -> Vec<Vec<usize>> {
    let n = centroids.len();
    let mut uf = UnionFind::new(n);

    if dist > 0.0 {
        for i in 0..n {
            for j in (i + 1)..n {
                if euclidean(centroids[i], centroids[j]) <= dist {
                    uf.union(i, j);
                }
            }
        }
    }

    let mut groups: std::collections::BTreeMap<usize, Vec<usize>> = std::collections::BTreeMap::new();
    for i in 0..n {
        let root = uf.find(i);
        groups.entry(root).or_default().push(i);
    }

    let mut clusters: Vec<Vec<usize>> = groups.into_values().collect();
    for cluster in &mut clusters {
        cluster.sort_unstable();
    }

    clusters.sort_by(|a, b| {
        let rep_a = mean_centroid(a, centroids);
        let rep_b = mean_centroid(b, centroids);
        rep_a
            .x
            .partial_cmp(&rep_b.x)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(rep_a.y.partial_cmp(&rep_b.y).unwrap_or(std::cmp::Ordering::Equal))
            .then(a[0].cmp(&b[0]))
    });

    clusters
}

fn mean_centroid(indices: &[usize], centroids: &[Coord<f64>]) -> Coord<f64> {
    let n = indices.len() as f64;
    let (sx, sy) = indices.iter().fold((0.0, 0.0), |(sx, sy), &i| (sx + centroids[i].x, sy + centroids[i].y));
    Coord { x: sx / n, y: sy / n }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_keeps_every_point_separate() {
        let pts = vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 0.0, y: 0.0 }, Coord { x: 5.0, y: 5.0 }];
        let clusters = cluster_by_proximity(&pts, 0.0);
        assert_eq!(clusters.len(), 3);
    }

    #[test]
    fn nearby_points_merge() {
        let pts = vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 10.0, y: 0.0 }, Coord { x: 1000.0, y: 0.0 }];
        let clusters = cluster_by_proximity(&pts, 50.0);
        assert_eq!(clusters.len(), 2);
        assert!(clusters.iter().any(|c| c.len() == 2));
    }

    #[test]
    fn transitive_chain_merges_into_one_cluster() {
        let pts = vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 40.0, y: 0.0 },
            Coord { x: 80.0, y: 0.0 },
        ];
        let clusters = cluster_by_proximity(&pts, 50.0);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0], vec![0, 1, 2]);
    }
}
