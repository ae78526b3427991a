use glam::{Vec3, Vec4};

#[derive(Debug, Default, Clone, Copy, PartialEq, bincode::Encode, bincode::Decode)]
pub struct BoundingSphere {
    center: [f32; 3],
    radius: f32,
}

impl BoundingSphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self {
            center: center.to_array(),
            radius,
        }
    }

    /// Sphere around the box of `points`, widened to reach the furthest point.
    /// Returns a zero sphere at the origin for an empty input.
    pub fn from_points(points: impl IntoIterator<Item = Vec3> + Clone) -> Self {
        let bounds = crate::Aabb::from_points(points.clone());
        if bounds.is_empty() {
            return Self::default();
        }
        let center = bounds.center();
        let radius = points
            .into_iter()
            .map(|p| p.distance(center))
            .fold(0.0f32, f32::max);

        Self::new(center, radius)
    }

    /// Smallest sphere this incremental scheme finds that contains every sphere.
    pub fn from_spheres<'a>(spheres: impl IntoIterator<Item = &'a BoundingSphere>) -> Self {
        let mut spheres = spheres.into_iter();
        let Some(first) = spheres.next() else {
            return Self::default();
        };
        let mut out = *first;
        for s in spheres {
            out.include_sphere(s);
        }
        out
    }

    pub fn center(&self) -> Vec3 {
        Vec3::from_array(self.center)
    }
    pub fn packed(&self) -> Vec4 {
        (self.center(), self.radius).into()
    }
    pub fn set_center(&mut self, center: Vec3) {
        self.center = center.to_array();
    }
    pub fn translate(&mut self, offset: Vec3) {
        self.set_center(self.center() + offset);
    }
    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// Wrapper around including a sphere with 0 radius
    pub fn include_point(&mut self, point: Vec3) {
        self.include_sphere(&BoundingSphere::new(point, 0.0))
    }

    /// Shift this bounding sphere so it completely envelops `other`, with the minimal increase in volume.
    pub fn include_sphere(&mut self, other: &BoundingSphere) {
        let towards_other = other.center() - self.center();
        let distance_towards_other = towards_other.length();

        let furthest_point = distance_towards_other + other.radius();

        let increase_needed = furthest_point - self.radius();

        #[cfg(debug_assertions)]
        let before_edit = *self;

        if increase_needed > 0.0 {
            // Floating point slack, scaled so large meshes stay monotonic
            let error = (furthest_point.abs() + self.center().abs().max_element()) * 4e-6 + 1e-6;

            let half_increase_needed = increase_needed / 2.0;

            if distance_towards_other >= half_increase_needed {
                let other_dir = towards_other / distance_towards_other;

                self.radius += half_increase_needed + error;
                self.translate(other_dir * half_increase_needed);
            } else {
                // Shift all the way to the other center, and increase radius further
                let rad_increase_needed = increase_needed - distance_towards_other;

                self.radius += rad_increase_needed + error;
                self.set_center(other.center());
            }
        }

        #[cfg(debug_assertions)]
        {
            self.assert_contains_sphere(other);
            self.assert_contains_sphere(&before_edit);
        }
    }

    pub fn contains_sphere(&self, sphere: &BoundingSphere, tolerance: f32) -> bool {
        let max_dist = self.center().distance(sphere.center()) + sphere.radius();
        max_dist <= self.radius + tolerance
    }

    pub fn assert_contains_sphere(&self, sphere: &BoundingSphere) {
        let tolerance = (self.radius.abs() + self.center().abs().max_element()) * 1e-6 + 1e-4;
        assert!(
            self.contains_sphere(sphere, tolerance),
            "{self:?} does not contain {sphere:?}"
        )
    }
}
