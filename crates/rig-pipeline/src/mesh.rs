//! Mesh collaborator interface and per-track intersection caches.
//!
//! The mesh loader and the ray-mesh intersection structure are external;
//! the pipeline only consumes this trait. Intersections are cached per
//! observation and averaged per track before each optimization pass.

use std::collections::BTreeMap;

use rig_core::{CamImage, InlierMask, Iso3, KeypointVec, Real, RigSet, SensorParams, Track, Vec2, Vec3};

/// Sentinel marking a missing mesh intersection.
pub fn bad_mesh_xyz() -> Vec3 {
    Vec3::repeat(1.0e+100)
}

/// Ray-mesh intersection provider.
///
/// Given a distorted pixel in a sensor with the given parameters and pose,
/// return where the corresponding ray first meets the mesh within
/// `[min_dist, max_dist]` meters from the camera center, or `None`.
pub trait RayMeshIntersector {
    fn intersect(
        &self,
        dist_pix: Vec2,
        params: &SensorParams,
        world_to_cam: &Iso3,
        min_dist: Real,
        max_dist: Real,
    ) -> Option<Vec3>;
}

/// Per-observation mesh intersections and per-track averages.
#[derive(Debug, Clone, Default)]
pub struct MeshCache {
    /// `pid -> cid -> fid -> intersection` ([`bad_mesh_xyz`] when missing).
    pub per_obs: Vec<BTreeMap<usize, BTreeMap<usize, Vec3>>>,
    /// Average of the valid intersections of each track.
    pub per_track: Vec<Vec3>,
}

impl MeshCache {
    pub fn obs_xyz(&self, pid: usize, cid: usize, fid: usize) -> Vec3 {
        self.per_obs[pid]
            .get(&cid)
            .and_then(|m| m.get(&fid))
            .copied()
            .unwrap_or_else(bad_mesh_xyz)
    }
}

/// Intersect the rays of every inlier observation with the mesh.
#[allow(clippy::too_many_arguments)]
pub fn mesh_triangulations(
    rig: &RigSet,
    cams: &[CamImage],
    world_to_cam: &[Iso3],
    tracks: &[Track],
    keypoints: &KeypointVec,
    inliers: &InlierMask,
    mesh: &dyn RayMeshIntersector,
    min_ray_dist: Real,
    max_ray_dist: Real,
) -> MeshCache {
    let mut cache = MeshCache {
        per_obs: vec![BTreeMap::new(); tracks.len()],
        per_track: vec![bad_mesh_xyz(); tracks.len()],
    };

    for (pid, track) in tracks.iter().enumerate() {
        let mut avg = Vec3::zeros();
        let mut num_intersections = 0;

        for (&cid, &fid) in track {
            cache.per_obs[pid]
                .entry(cid)
                .or_default()
                .insert(fid, bad_mesh_xyz());

            if !inliers.is_inlier(pid, cid, fid) {
                continue;
            }

            let (x, y) = keypoints[cid][fid];
            let params = &rig.sensors[cams[cid].sensor_id].params;
            if let Some(mesh_xyz) = mesh.intersect(
                Vec2::new(x as Real, y as Real),
                params,
                &world_to_cam[cid],
                min_ray_dist,
                max_ray_dist,
            ) {
                cache.per_obs[pid].entry(cid).or_default().insert(fid, mesh_xyz);
                avg += mesh_xyz;
                num_intersections += 1;
            }
        }

        if num_intersections >= 1 {
            cache.per_track[pid] = avg / num_intersections as Real;
        }
    }

    cache
}
