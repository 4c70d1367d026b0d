use anyhow::Result;
use log::trace;
use rand::distr::Uniform;
use rand::prelude::*;
use std::ops::Range;

use crate::body::Body;
use crate::sim_params::SimParams;
use crate::vecmath::Vec3;

/// A close-approach pair found during the velocity pass. Workers record
/// candidates instead of resolving them in place, because `j` may belong to
/// another worker's range; the driver applies the collision rule once per
/// unordered pair between the two phases.
#[derive(Copy, Clone, Debug)]
pub struct CollisionPair {
    pub i: usize,
    pub j: usize,
    pub dist: f64,
}

/// Phase 1 over `range`: accumulates pairwise gravitational acceleration
/// into each body's velocity and collects collision candidates.
///
/// Reads only the (immutable) snapshot and returns the new velocities for
/// the range, so it never touches state outside the caller's partition.
pub fn velocity_pass(
    range: Range<usize>,
    bodies: &[Body],
    params: &SimParams,
) -> (Vec<Vec3>, Vec<CollisionPair>) {
    let mut velocities = Vec::with_capacity(range.len());
    let mut collisions = Vec::new();

    for i in range {
        let body = &bodies[i];
        let mut velocity = body.velocity;

        for (j, other) in bodies.iter().enumerate() {
            if i == j {
                continue;
            }
            let delta = other.position.sub(body.position);
            let mut dist = delta.length();
            if dist < params.collision_threshold {
                collisions.push(CollisionPair { i, j, dist });
                continue;
            }
            // Singularity guard: floor the distance so a near-zero
            // separation cannot inject NaN/infinity into the array.
            if dist < params.min_distance {
                dist = params.min_distance;
            }
            let accel = params.gravitational_constant * other.mass / (dist * dist);
            velocity.accumulate(delta.scale(params.dt * accel / dist));
        }

        velocity.cap(params.max_speed);
        velocities.push(velocity);
    }

    (velocities, collisions)
}

/// Applies the collision rule to every recorded pair exactly once, in
/// deterministic (sorted) order. Candidates arrive from both sides of a
/// pair (the worker owning `i` records (i, j), the worker owning `j`
/// records (j, i)), so pairs are normalized and deduplicated first.
///
/// The rule is the literal one this simulation has always used, not a
/// momentum-conserving elastic response:
/// `combined = (v_i*m_i + v_j*m_j) / 2; v_i = combined/m_i; v_j = combined/m_j`.
pub fn apply_collisions(
    bodies: &mut [Body],
    mut pairs: Vec<CollisionPair>,
    params: &SimParams,
) -> usize {
    if pairs.is_empty() {
        return 0;
    }

    for pair in pairs.iter_mut() {
        if pair.i > pair.j {
            std::mem::swap(&mut pair.i, &mut pair.j);
        }
    }
    pairs.sort_unstable_by(|a, b| (a.i, a.j).cmp(&(b.i, b.j)));
    pairs.dedup_by_key(|pair| (pair.i, pair.j));

    for pair in &pairs {
        trace!(
            "collision between bodies {} and {} at distance {:.6}",
            pair.i,
            pair.j,
            pair.dist
        );
        let (mass_i, mass_j) = (bodies[pair.i].mass, bodies[pair.j].mass);
        let combined = bodies[pair.i]
            .velocity
            .scale(mass_i)
            .add(bodies[pair.j].velocity.scale(mass_j))
            .div(2.0);
        let mut velocity_i = combined.div(mass_i);
        let mut velocity_j = combined.div(mass_j);
        // The combined velocity can exceed the cap when a light body meets a
        // fast heavy one; re-clamp so the speed invariant holds into phase 2.
        velocity_i.cap(params.max_speed);
        velocity_j.cap(params.max_speed);
        bodies[pair.i].velocity = velocity_i;
        bodies[pair.j].velocity = velocity_j;
    }

    pairs.len()
}

/// Phase 2 over a worker's segment: first-order Euler position update, then
/// escape containment. A body beyond the escape radius is recalled to a
/// uniform random point in the respawn box and its velocity clamped to the
/// secondary cap.
pub fn position_pass(segment: &mut [Body], params: &SimParams, rng: &mut StdRng) -> Result<()> {
    let respawn = match params.escape_radius {
        Some(radius) => {
            let half = params.respawn_half_width;
            Some((radius, Uniform::new(-half, half)?))
        }
        None => None,
    };

    for body in segment.iter_mut() {
        body.position.accumulate(body.velocity.scale(params.dt));

        if let Some((radius, respawn_dist)) = respawn {
            if body.position.length() > radius {
                trace!("body escaped past radius {:.1}, recalling", radius);
                body.position = Vec3::new(
                    rng.sample(respawn_dist),
                    rng.sample(respawn_dist),
                    rng.sample(respawn_dist),
                );
                body.velocity.cap(params.secondary_speed_cap);
            }
        }
    }

    Ok(())
}
