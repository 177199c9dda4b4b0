//! Regroupement par proximité (union-find sur le graphe de seuil)
//!
//! Le regroupement est transitif : si A est à portée de B et B de C, A, B et C
//! forment un seul groupe même si A et C sont hors de portée. La fermeture
//! transitive passe par un union-find dont la racine est toujours le plus
//! petit indice, ce qui rend les groupes indépendants de l'ordre de parcours.
//! Les appelants trient leurs entrées par `FeatureKey` avant l'appel.

use std::collections::BTreeMap;

use rstar::primitives::GeomWithData;
use rstar::RTree;

type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// Union-find sur des indices, racine = plus petit indice
#[derive(Debug, Clone)]
pub struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    pub fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Compression de chemin
        let mut current = i;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[child] = root;
    }

    /// Groupes triés par plus petit membre, membres croissants
    pub fn groups(&mut self) -> Vec<Vec<usize>> {
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..self.parent.len() {
            let root = self.find(i);
            groups.entry(root).or_default().push(i);
        }
        groups.into_values().collect()
    }
}

/// Index spatial de positions projetées
pub struct PointIndex {
    tree: RTree<IndexedPoint>,
}

impl PointIndex {
    pub fn new(positions: &[[f64; 2]]) -> Self {
        let items: Vec<IndexedPoint> = positions
            .iter()
            .enumerate()
            .map(|(i, p)| GeomWithData::new(*p, i))
            .collect();
        Self {
            tree: RTree::bulk_load(items),
        }
    }

    /// Indices à une distance <= `radius` de `point`
    pub fn within(&self, point: [f64; 2], radius: f64) -> impl Iterator<Item = usize> + '_ {
        self.tree
            .locate_within_distance(point, radius * radius)
            .map(|item| item.data)
    }

    pub fn any_within(&self, point: [f64; 2], radius: f64) -> bool {
        self.within(point, radius).next().is_some()
    }
}

/// Groupes de proximité transitifs
///
/// Deux positions sont reliées si leur distance est <= `radius` et si
/// `may_link(i, j)` (avec `i < j`) l'autorise.
pub fn proximity_groups<F>(positions: &[[f64; 2]], radius: f64, may_link: F) -> Vec<Vec<usize>>
where
    F: Fn(usize, usize) -> bool,
{
    let index = PointIndex::new(positions);
    let mut set = DisjointSet::new(positions.len());

    for (i, point) in positions.iter().enumerate() {
        for j in index.within(*point, radius) {
            if j > i && may_link(i, j) {
                set.union(i, j);
            }
        }
    }

    set.groups()
}
