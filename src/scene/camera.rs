use glam::{Mat4, Vec3};

const TUMBLE_SPEED: f32 = 0.004;
const PAN_SPEED: f32 = 0.01;
const ZOOM_SPEED: f32 = 0.01;
const NEAR_CLIP_FACTOR: f32 = 0.01;
const FAR_CLIP_FACTOR: f32 = 100.0;
const TILT_CLAMP: f32 = 0.98; // Avoid gimbal lock.
const DEFAULT_FOV: f32 = 45.0;

/// Orbit camera circling a target point.
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    up: Vec3,
    forward: Vec3,
    right: Vec3,
    width: u32,
    height: u32,
    near: f32,
    far: f32,
    pan_factor: f32,
    zoom_factor: f32,
}

impl Camera {
    pub fn new(width: u32, height: u32) -> Self {
        let mut camera = Self {
            position: Vec3::new(0.0, 0.0, 3.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            forward: Vec3::NEG_Z,
            right: Vec3::X,
            width: width.max(1),
            height: height.max(1),
            near: 0.1,
            far: 100.0,
            pan_factor: PAN_SPEED,
            zoom_factor: ZOOM_SPEED,
        };
        camera.update_basis();
        camera
    }

    /// Rotate around the target: world-Y yaw from `dx`, local-X tilt
    /// from `dy` with the tilt clamped short of the poles.
    pub fn tumble(&mut self, dx: i32, dy: i32) {
        {
            let offset = self.position - self.target;
            let angle = dx as f32 * TUMBLE_SPEED;
            let (sin, cos) = angle.sin_cos();
            let new_x = offset.x * cos - offset.z * sin;
            let new_z = offset.x * sin + offset.z * cos;
            self.position = self.target + Vec3::new(new_x, offset.y, new_z);
            self.update_basis();
        }

        {
            let original_position = self.position;
            let original_forward = self.forward;

            let offset = self.position - self.target;
            let angle = dy as f32 * TUMBLE_SPEED;
            let (sin, cos) = angle.sin_cos();

            let right_component = offset.dot(self.right);
            let up_component = offset.dot(self.up);
            let forward_component = offset.dot(self.forward);

            let new_up = up_component * cos - forward_component * sin;
            let new_forward = up_component * sin + forward_component * cos;

            let offset =
                self.right * right_component + self.up * new_up + self.forward * new_forward;
            self.position = self.target + offset;

            self.forward = (self.target - self.position).normalize();
            if self.forward.y.abs() > TILT_CLAMP {
                self.position = original_position;
                self.forward = original_forward;
            }
            self.update_basis();
        }
    }

    pub fn zoom(&mut self, dx: i32, dy: i32) {
        let delta = (-dx + dy) as f32 * self.zoom_factor;
        self.position += self.forward * delta;
    }

    pub fn pan(&mut self, dx: i32, dy: i32) {
        let delta_x = -dx as f32 * self.pan_factor;
        let delta_y = dy as f32 * self.pan_factor;
        let offset = self.up * delta_y + self.right * delta_x;
        self.position += offset;
        self.target += offset;
    }

    /// Frames the camera on a bounding box, sitting on +Z of its
    /// center at a distance where the whole box fits the view.
    pub fn reset_to_model(&mut self, mut bounds_min: Vec3, mut bounds_max: Vec3) {
        if bounds_max.cmple(bounds_min).any() {
            log::warn!("Invalid model bounds, defaulting to unit cube");
            bounds_min = Vec3::splat(-0.5);
            bounds_max = Vec3::splat(0.5);
        }

        let center = (bounds_min + bounds_max) * 0.5;
        let radius = (bounds_max - bounds_min).length() * 0.5;
        let distance = radius / (DEFAULT_FOV * 0.5).to_radians().sin();

        self.position = center + Vec3::new(0.0, 0.0, distance);
        self.target = center;
        self.near = radius * NEAR_CLIP_FACTOR;
        self.far = distance + radius * FAR_CLIP_FACTOR;
        self.pan_factor = radius * PAN_SPEED;
        self.zoom_factor = radius * ZOOM_SPEED;
        self.update_basis();
    }

    pub fn resize_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.width = width;
            self.height = height;
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        let aspect = self.width as f32 / self.height as f32;
        Mat4::perspective_rh(DEFAULT_FOV.to_radians(), aspect, self.near, self.far)
    }

    fn update_basis(&mut self) {
        self.forward = (self.target - self.position).normalize();
        self.right = self.forward.cross(Vec3::Y).normalize();
        self.up = self.right.cross(self.forward).normalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_camera_initialization() {
        let camera = Camera::new(800, 600);
        assert_eq!(camera.target, Vec3::ZERO);
        assert_relative_eq!(camera.forward.z, -1.0, epsilon = 0.001);
        assert_relative_eq!(camera.right.x, 1.0, epsilon = 0.001);
    }

    #[test]
    fn test_reset_to_model_frames_bounds() {
        let mut camera = Camera::new(800, 600);
        let bounds_min = Vec3::new(-1.0, -1.0, -1.0);
        let bounds_max = Vec3::new(1.0, 1.0, 1.0);
        camera.reset_to_model(bounds_min, bounds_max);

        let radius = (bounds_max - bounds_min).length() * 0.5;
        let expected_distance = radius / (22.5f32).to_radians().sin();

        assert_eq!(camera.target, Vec3::ZERO);
        assert_relative_eq!(camera.position.z, expected_distance, epsilon = 0.001);
        assert_relative_eq!(camera.near, radius * 0.01, epsilon = 0.001);
        assert!(camera.far > camera.near);
    }

    #[test]
    fn test_reset_to_model_rejects_empty_bounds() {
        let mut camera = Camera::new(800, 600);
        camera.reset_to_model(Vec3::ONE, Vec3::ONE);

        // Falls back to the unit cube centered at the origin.
        assert_eq!(camera.target, Vec3::ZERO);
        assert!(camera.position.z > 0.0);
    }

    #[test]
    fn test_tumble_preserves_target_distance() {
        let mut camera = Camera::new(800, 600);
        camera.reset_to_model(Vec3::splat(-1.0), Vec3::splat(1.0));
        let distance = (camera.position - camera.target).length();

        camera.tumble(120, 45);
        let after = (camera.position - camera.target).length();
        assert_relative_eq!(distance, after, epsilon = 0.001);
    }

    #[test]
    fn test_tilt_clamps_near_poles() {
        let mut camera = Camera::new(800, 600);
        camera.reset_to_model(Vec3::splat(-1.0), Vec3::splat(1.0));

        // Tilt far past vertical; forward must stay short of straight down.
        camera.tumble(0, 10_000);
        assert!(camera.forward.y.abs() <= TILT_CLAMP + 0.001);
    }

    #[test]
    fn test_pan_moves_position_and_target_together() {
        let mut camera = Camera::new(800, 600);
        let offset_before = camera.position - camera.target;
        camera.pan(50, -30);
        let offset_after = camera.position - camera.target;
        assert_relative_eq!(offset_before.x, offset_after.x, epsilon = 0.001);
        assert_relative_eq!(offset_before.y, offset_after.y, epsilon = 0.001);
        assert_relative_eq!(offset_before.z, offset_after.z, epsilon = 0.001);
    }

    #[test]
    fn test_zoom_moves_along_forward() {
        let mut camera = Camera::new(800, 600);
        let before = (camera.position - camera.target).length();
        camera.zoom(0, 100);
        let after = (camera.position - camera.target).length();
        assert!(after < before, "Zooming in should approach the target");
    }

    #[test]
    fn test_view_matrix_looks_at_target() {
        let mut camera = Camera::new(800, 600);
        camera.reset_to_model(Vec3::splat(-1.0), Vec3::splat(1.0));
        let view = camera.view_matrix();

        // The target lands on the view-space -Z axis.
        let target_view = view.transform_point3(camera.target);
        assert_relative_eq!(target_view.x, 0.0, epsilon = 0.001);
        assert_relative_eq!(target_view.y, 0.0, epsilon = 0.001);
        assert!(target_view.z < 0.0);
    }
}
