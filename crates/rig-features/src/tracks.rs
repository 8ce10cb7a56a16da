//! Fusion of pairwise matches into multi-view tracks.
//!
//! If feature A in image I matches feature B in image J, which matches
//! feature C in image K, then (A, B, C) belong to one track with a single
//! triangulated point. Fusion is a union-find over (cid, fid) observations;
//! tracks observing two distinct features of the same acquisition are in
//! conflict and dropped entirely.

use std::collections::BTreeMap;

use rig_core::Track;

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = i;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // Attach the larger root under the smaller one so that group
            // representatives are deterministic.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Fuse pairwise matches `(cid_i, cid_j) -> [(fid_i, fid_j)]` into tracks.
///
/// Track ids are assigned by the ordered traversal of the pair map, so the
/// result is deterministic for identical inputs. Only tracks with at least
/// two observations survive.
pub fn build_tracks(pairwise: &BTreeMap<(usize, usize), Vec<(usize, usize)>>) -> Vec<Track> {
    // Index every observation.
    let mut obs_index: BTreeMap<(usize, usize), usize> = BTreeMap::new();
    for (&(cid_left, cid_right), matches) in pairwise {
        for &(fid_left, fid_right) in matches {
            let next = obs_index.len();
            obs_index.entry((cid_left, fid_left)).or_insert(next);
            let next = obs_index.len();
            obs_index.entry((cid_right, fid_right)).or_insert(next);
        }
    }

    let mut uf = UnionFind::new(obs_index.len());
    for (&(cid_left, cid_right), matches) in pairwise {
        for &(fid_left, fid_right) in matches {
            let a = obs_index[&(cid_left, fid_left)];
            let b = obs_index[&(cid_right, fid_right)];
            uf.union(a, b);
        }
    }

    // Group observations by root, in insertion (= pair traversal) order of
    // the roots.
    let mut groups: BTreeMap<usize, Vec<(usize, usize)>> = BTreeMap::new();
    for (&(cid, fid), &idx) in &obs_index {
        groups.entry(uf.find(idx)).or_default().push((cid, fid));
    }

    let mut tracks = Vec::new();
    'group: for members in groups.values() {
        if members.len() < 2 {
            continue;
        }
        let mut track = Track::new();
        for &(cid, fid) in members {
            if track.insert(cid, fid).is_some() {
                // Two features of the same acquisition: conflicting track.
                continue 'group;
            }
        }
        tracks.push(track);
    }
    tracks
}
