//! Semi-implicit Euler integration, CCD sub-stepping and sleep bookkeeping.

use glam::{Quat, Vec3};

use super::params::SimParams;
use super::rigid_body::{BodyFlags, RigidBody};

/// Angular speed ceiling in rad/s.
pub const MAX_ANGULAR_SPEED: f32 = 50.0;
/// Linear and angular speed below which a body counts as resting.
pub const SLEEP_VELOCITY_THRESHOLD: f32 = 0.01;
/// Consecutive resting steps before a body is put to sleep.
pub const SLEEP_STEPS: u32 = 60;
/// Upper bound on CCD sub-steps per step.
pub const MAX_CCD_SUBSTEPS: u32 = 8;
/// Travel per sub-step, as a fraction of the body's characteristic size.
pub const CCD_TRAVEL_FRACTION: f32 = 0.5;
/// External forces weaker than this do not wake a sleeping body.
pub const FORCE_WAKE_EPSILON: f32 = 1e-4;

/// Advance one body by `dt` with semi-implicit Euler.
///
/// Velocity first (`v += a dt`, exponential damping, angular clamp), then
/// position and orientation from the updated velocity.
#[inline]
pub fn integrate_body(body: &mut RigidBody, gravity: Vec3, dt: f32) {
    let mut acceleration = body.force * body.inv_mass;
    if body.inv_mass > 0.0 {
        acceleration += gravity;
    }
    body.linear_velocity += acceleration * dt;

    body.linear_velocity *= (-body.linear_damping * dt).exp();
    body.angular_velocity *= (-body.angular_damping * dt).exp();
    body.angular_velocity = body.angular_velocity.clamp_length_max(MAX_ANGULAR_SPEED);

    body.position += body.linear_velocity * dt;
    body.orientation = integrate_orientation(body.orientation, body.angular_velocity, dt);
}

/// q' = normalize(q + 0.5 * dt * (omega, 0) * q)
#[inline]
pub fn integrate_orientation(rotation: Quat, omega: Vec3, dt: f32) -> Quat {
    if omega.length_squared() <= 1e-12 {
        return rotation;
    }
    let omega_quat = Quat::from_xyzw(omega.x, omega.y, omega.z, 0.0);
    let q_dot = omega_quat * rotation * 0.5;
    Quat::from_xyzw(
        rotation.x + q_dot.x * dt,
        rotation.y + q_dot.y * dt,
        rotation.z + q_dot.z * dt,
        rotation.w + q_dot.w * dt,
    )
    .normalize()
}

/// Number of equal sub-steps for this body.
///
/// 1 unless CCD is enabled globally and on the body and the projected travel
/// exceeds [`CCD_TRAVEL_FRACTION`] of its characteristic size.
pub fn ccd_substeps(body: &RigidBody, gravity: Vec3, dt: f32, ccd: bool) -> u32 {
    if !ccd || !body.flags.contains(BodyFlags::CCD) {
        return 1;
    }
    let limit = CCD_TRAVEL_FRACTION * body.shape.characteristic_size();
    if limit <= 0.0 {
        return 1;
    }
    let mut projected = body.linear_velocity + body.force * body.inv_mass * dt;
    if body.inv_mass > 0.0 {
        projected += gravity * dt;
    }
    let travel = projected.length() * dt;
    if travel <= limit {
        return 1;
    }
    ((travel / limit).ceil() as u32).clamp(1, MAX_CCD_SUBSTEPS)
}

/// Integrate every awake, non-static body.
///
/// A sleeping body with a non-trivial external force is woken first.
/// Forces stay accumulated; [`clear_forces`] drops them after the step.
pub fn integrate(bodies: &mut [RigidBody], params: &SimParams, dt: f32) {
    for body in bodies.iter_mut() {
        if body.is_static() {
            continue;
        }
        if body.is_sleeping() {
            if body.force.length() > FORCE_WAKE_EPSILON {
                body.wake();
            } else {
                continue;
            }
        }

        let substeps = ccd_substeps(body, params.gravity, dt, params.ccd);
        let h = dt / substeps as f32;
        for _ in 0..substeps {
            integrate_body(body, params.gravity, h);
        }
    }
}

/// Update sleep counters from the motion over the step.
///
/// Linear speed is the net displacement since `start_positions` divided by
/// `dt`, so a resting body whose contact bias and gravity cancel within the
/// step counts as still. Bodies resting for [`SLEEP_STEPS`] steps fall asleep
/// with zeroed velocities.
pub fn update_sleep_states(bodies: &mut [RigidBody], start_positions: &[Vec3], dt: f32) {
    if dt <= 0.0 {
        return;
    }
    for (body, start) in bodies.iter_mut().zip(start_positions) {
        if !body.is_active() {
            continue;
        }
        let linear_speed = (body.position - *start).length() / dt;
        let angular_speed = body.angular_velocity.length();

        if linear_speed < SLEEP_VELOCITY_THRESHOLD && angular_speed < SLEEP_VELOCITY_THRESHOLD {
            body.sleep_counter += 1;
            if body.sleep_counter >= SLEEP_STEPS {
                body.flags.insert(BodyFlags::SLEEPING);
                body.linear_velocity = Vec3::ZERO;
                body.angular_velocity = Vec3::ZERO;
            }
        } else {
            body.sleep_counter = 0;
        }
    }
}

/// Clear force accumulators on all bodies.
pub fn clear_forces(bodies: &mut [RigidBody]) {
    for body in bodies.iter_mut() {
        body.force = Vec3::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::rigid_body::BodyDescriptor;
    use approx::assert_abs_diff_eq;

    fn free_params() -> SimParams {
        SimParams {
            ccd: false,
            ..SimParams::default()
        }
    }

    #[test]
    fn test_free_fall() {
        let mut bodies = [BodyDescriptor::sphere(0.5)
            .with_position(Vec3::new(0.0, 10.0, 0.0))
            .with_damping(0.0, 0.0)
            .to_body()];
        let params = free_params();
        let dt = 1.0 / 60.0;

        for _ in 0..60 {
            integrate(&mut bodies, &params, dt);
        }

        // Semi-implicit Euler: y = 10 - g dt^2 n(n+1)/2
        let expected = 10.0 - 9.81 * dt * dt * (60.0 * 61.0) / 2.0;
        assert_abs_diff_eq!(bodies[0].position.y, expected, epsilon = 1e-3);
        assert_abs_diff_eq!(bodies[0].linear_velocity.y, -9.81, epsilon = 1e-3);
        assert_eq!(bodies[0].position.x, 0.0);
        assert_eq!(bodies[0].position.z, 0.0);
    }

    #[test]
    fn test_static_body_unaffected() {
        let mut bodies = [BodyDescriptor::cuboid(Vec3::ONE)
            .fixed()
            .with_position(Vec3::new(1.0, 2.0, 3.0))
            .to_body()];
        bodies[0].force = Vec3::new(100.0, 0.0, 0.0);
        for _ in 0..60 {
            integrate(&mut bodies, &free_params(), 1.0 / 60.0);
        }
        assert_eq!(bodies[0].position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(bodies[0].orientation, Quat::IDENTITY);
    }

    #[test]
    fn test_damping_is_exponential() {
        let mut body = BodyDescriptor::sphere(0.5)
            .with_linear_velocity(Vec3::X * 2.0)
            .with_damping(0.5, 0.0)
            .to_body();
        integrate_body(&mut body, Vec3::ZERO, 0.1);
        assert_abs_diff_eq!(body.linear_velocity.x, 2.0 * (-0.05f32).exp(), epsilon = 1e-6);
    }

    #[test]
    fn test_angular_speed_clamped() {
        let mut body = BodyDescriptor::sphere(0.5)
            .with_angular_velocity(Vec3::Y * 500.0)
            .with_damping(0.0, 0.0)
            .to_body();
        integrate_body(&mut body, Vec3::ZERO, 1.0 / 60.0);
        assert_abs_diff_eq!(body.angular_velocity.length(), MAX_ANGULAR_SPEED, epsilon = 1e-3);
        assert_abs_diff_eq!(body.orientation.length(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_orientation_follows_spin() {
        let mut q = Quat::IDENTITY;
        let omega = Vec3::Z * std::f32::consts::PI;
        for _ in 0..1000 {
            q = integrate_orientation(q, omega, 0.5 / 1000.0);
        }
        // Half a second at pi rad/s is a quarter turn.
        let x = q * Vec3::X;
        assert_abs_diff_eq!(x, Vec3::Y, epsilon = 1e-2);
    }

    #[test]
    fn test_ccd_substeps() {
        let slow = BodyDescriptor::sphere(0.5).to_body();
        assert_eq!(ccd_substeps(&slow, Vec3::ZERO, 1.0 / 60.0, true), 1);

        // 105 m/s at 60 Hz travels 1.75 m; 0.5 m per sub-step gives 4.
        let fast = BodyDescriptor::sphere(0.5)
            .with_linear_velocity(Vec3::X * 105.0)
            .to_body();
        assert_eq!(ccd_substeps(&fast, Vec3::ZERO, 1.0 / 60.0, true), 4);
        assert_eq!(ccd_substeps(&fast, Vec3::ZERO, 1.0 / 60.0, false), 1);

        let bullet = BodyDescriptor::sphere(0.01)
            .with_linear_velocity(Vec3::X * 1000.0)
            .to_body();
        assert_eq!(
            ccd_substeps(&bullet, Vec3::ZERO, 1.0 / 60.0, true),
            MAX_CCD_SUBSTEPS
        );

        let opted_out = BodyDescriptor::sphere(0.01)
            .with_linear_velocity(Vec3::X * 1000.0)
            .with_ccd(false)
            .to_body();
        assert_eq!(ccd_substeps(&opted_out, Vec3::ZERO, 1.0 / 60.0, true), 1);
    }

    #[test]
    fn test_ccd_matches_plain_integration_without_forces() {
        let desc = BodyDescriptor::sphere(0.05)
            .with_linear_velocity(Vec3::X * 30.0)
            .with_damping(0.0, 0.0);
        let mut plain = [desc.to_body()];
        let mut ccd = [desc.to_body()];
        let params = SimParams {
            gravity: Vec3::ZERO,
            ..SimParams::default()
        };
        integrate(&mut plain, &free_params(), 1.0 / 60.0);
        integrate(&mut ccd, &params, 1.0 / 60.0);
        assert_abs_diff_eq!(plain[0].position.x, 0.5, epsilon = 1e-5);
        assert_abs_diff_eq!(ccd[0].position.x, 0.5, epsilon = 1e-5);
    }

    #[test]
    fn test_sleep_after_rest() {
        let mut bodies = [BodyDescriptor::sphere(0.5).to_body()];
        let start = [Vec3::ZERO];
        for _ in 0..SLEEP_STEPS - 1 {
            update_sleep_states(&mut bodies, &start, 1.0 / 60.0);
        }
        assert!(!bodies[0].is_sleeping());
        update_sleep_states(&mut bodies, &start, 1.0 / 60.0);
        assert!(bodies[0].is_sleeping());
    }

    #[test]
    fn test_motion_resets_sleep_counter() {
        let mut bodies = [BodyDescriptor::sphere(0.5).to_body()];
        bodies[0].sleep_counter = SLEEP_STEPS - 1;
        bodies[0].position = Vec3::X;
        update_sleep_states(&mut bodies, &[Vec3::ZERO], 1.0 / 60.0);
        assert_eq!(bodies[0].sleep_counter, 0);
        assert!(!bodies[0].is_sleeping());
    }

    #[test]
    fn test_sleeping_body_skipped_until_forced() {
        let mut bodies = [BodyDescriptor::sphere(0.5)
            .with_position(Vec3::Y * 5.0)
            .to_body()];
        bodies[0].flags.insert(BodyFlags::SLEEPING);
        integrate(&mut bodies, &free_params(), 1.0 / 60.0);
        assert_eq!(bodies[0].position, Vec3::Y * 5.0);

        bodies[0].force = Vec3::X * 10.0;
        integrate(&mut bodies, &free_params(), 1.0 / 60.0);
        assert!(!bodies[0].is_sleeping());
        assert!(bodies[0].position.x > 0.0);
    }

    #[test]
    fn test_clear_forces() {
        let mut bodies = [BodyDescriptor::sphere(0.5).to_body()];
        bodies[0].force = Vec3::new(10.0, 20.0, 30.0);
        clear_forces(&mut bodies);
        assert_eq!(bodies[0].force, Vec3::ZERO);
    }
}
