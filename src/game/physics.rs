//! Rigid-body physics capability and the arena implementation used by game instances

use std::collections::HashMap;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// 2D vector
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Unit vector pointing along `angle` (radians)
    pub fn from_angle(angle: f32) -> Self {
        Self::new(angle.cos(), angle.sin())
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn dot(self, other: Vec2) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// Unit vector in the same direction, or zero for a zero vector
    pub fn normalized(self) -> Self {
        let len = self.length();
        if len > 0.0 {
            self * (1.0 / len)
        } else {
            Vec2::ZERO
        }
    }

    pub fn rotated(self, angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(self.x * cos - self.y * sin, self.x * sin + self.y * cos)
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Vec2 {
    type Output = Vec2;
    fn neg(self) -> Vec2 {
        Vec2::new(-self.x, -self.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Vec2) {
        *self = *self + rhs;
    }
}

impl SubAssign for Vec2 {
    fn sub_assign(&mut self, rhs: Vec2) {
        *self = *self - rhs;
    }
}

/// Collision classes used to pick a handler for a contact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollisionType {
    /// Front of a truck
    Plow,
    /// Vulnerable rear of a living truck
    Core,
    ArenaBorder,
    /// Any shape of a dead truck
    DeadBody,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Geometry {
    /// Circle at `offset` from the body origin, rotated with the body
    Circle { offset: Vec2, radius: f32 },
    /// Axis-aligned box relative to the body origin (static bodies only)
    Rect { min: Vec2, max: Vec2 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub geometry: Geometry,
    pub collision_type: CollisionType,
    pub elasticity: f32,
}

impl Shape {
    pub fn circle(offset: Vec2, radius: f32, collision_type: CollisionType, elasticity: f32) -> Self {
        Self {
            geometry: Geometry::Circle { offset, radius },
            collision_type,
            elasticity,
        }
    }

    /// Box centred on `center` with the given full width and height
    pub fn rect(center: Vec2, width: f32, height: f32, collision_type: CollisionType, elasticity: f32) -> Self {
        let half = Vec2::new(width / 2.0, height / 2.0);
        Self {
            geometry: Geometry::Rect {
                min: center - half,
                max: center + half,
            },
            collision_type,
            elasticity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Dynamic,
    Static,
}

#[derive(Debug, Clone)]
pub struct Body {
    pub kind: BodyKind,
    pub position: Vec2,
    /// Heading in radians
    pub angle: f32,
    pub velocity: Vec2,
    pub angular_velocity: f32,
    pub mass: f32,
    /// Owner-defined grouping (team index for trucks)
    pub group: u32,
    pub shapes: Vec<Shape>,
}

impl Body {
    pub fn dynamic(mass: f32, position: Vec2, angle: f32, group: u32) -> Self {
        Self {
            kind: BodyKind::Dynamic,
            position,
            angle,
            velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            mass,
            group,
            shapes: Vec::new(),
        }
    }

    pub fn fixed() -> Self {
        Self {
            kind: BodyKind::Static,
            position: Vec2::ZERO,
            angle: 0.0,
            velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            mass: f32::INFINITY,
            group: u32::MAX,
            shapes: Vec::new(),
        }
    }

    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.shapes.push(shape);
        self
    }

    pub fn speed(&self) -> f32 {
        self.velocity.length()
    }

    fn inverse_mass(&self) -> f32 {
        match self.kind {
            BodyKind::Static => 0.0,
            BodyKind::Dynamic if self.mass > 0.0 => 1.0 / self.mass,
            BodyKind::Dynamic => 0.0,
        }
    }

    /// Set every shape of this body to `collision_type`
    pub fn reclassify(&mut self, collision_type: CollisionType) {
        for shape in &mut self.shapes {
            shape.collision_type = collision_type;
        }
    }
}

pub type BodyHandle = usize;

/// A contact passed to a collision handler.
///
/// `first` carries the handler's first collision type, `second` the other.
pub struct Arbiter<'a> {
    bodies: &'a mut [Body],
    pub first: BodyHandle,
    pub second: BodyHandle,
    restitution: f32,
    flagged: &'a mut Vec<BodyHandle>,
}

impl Arbiter<'_> {
    pub fn body(&self, handle: BodyHandle) -> &Body {
        &self.bodies[handle]
    }

    pub fn body_mut(&mut self, handle: BodyHandle) -> &mut Body {
        &mut self.bodies[handle]
    }

    pub fn restitution(&self) -> f32 {
        self.restitution
    }

    pub fn set_restitution(&mut self, restitution: f32) {
        self.restitution = restitution;
    }

    /// Report a body back to the caller of [`PhysicsWorld::step`]
    pub fn flag(&mut self, handle: BodyHandle) {
        if !self.flagged.contains(&handle) {
            self.flagged.push(handle);
        }
    }
}

/// Called before a contact is resolved. Returning `false` lets the shapes pass through.
pub type CollisionHandler = Box<dyn FnMut(&mut Arbiter<'_>) -> bool + Send>;

/// Physics capability a game instance simulates against
pub trait PhysicsWorld: Send {
    fn add_body(&mut self, body: Body) -> BodyHandle;

    fn body(&self, handle: BodyHandle) -> Option<&Body>;

    fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut Body>;

    /// Handle contacts between shapes of type `a` and `b`, in that argument order
    fn register_collision_handler(&mut self, a: CollisionType, b: CollisionType, handler: CollisionHandler);

    /// Advance positions and resolve contacts. Returns bodies flagged by handlers.
    fn step(&mut self, dt: f32) -> Vec<BodyHandle>;
}

#[derive(Debug, Clone, Copy)]
struct Contact {
    a: BodyHandle,
    shape_a: usize,
    b: BodyHandle,
    shape_b: usize,
    /// Unit normal pointing from `a` towards `b`
    normal: Vec2,
    depth: f32,
}

/// Arena physics: circle hitboxes on dynamic bodies, boxes on static ones,
/// impulse resolution with restitution equal to the product of shape elasticities.
#[derive(Default)]
pub struct ArenaSpace {
    bodies: Vec<Body>,
    handlers: HashMap<(CollisionType, CollisionType), CollisionHandler>,
}

impl ArenaSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlapping shape pairs. `previous` holds each body's position before this step.
    fn find_contacts(&self, previous: &[Vec2]) -> Vec<Contact> {
        let mut contacts = Vec::new();
        for i in 0..self.bodies.len() {
            for j in (i + 1)..self.bodies.len() {
                let (a, b) = (&self.bodies[i], &self.bodies[j]);
                if a.kind == BodyKind::Static && b.kind == BodyKind::Static {
                    continue;
                }
                for (si, sa) in a.shapes.iter().enumerate() {
                    for (sj, sb) in b.shapes.iter().enumerate() {
                        if let Some((normal, depth)) = overlap(a, sa, b, sb) {
                            let (normal, depth) = uncross((a, sa, previous[i]), (b, sb, previous[j]), (normal, depth));
                            contacts.push(Contact {
                                a: i,
                                shape_a: si,
                                b: j,
                                shape_b: sj,
                                normal,
                                depth,
                            });
                        }
                    }
                }
            }
        }
        contacts
    }

    fn resolve(bodies: &mut [Body], contact: &Contact, restitution: f32) {
        let inv_a = bodies[contact.a].inverse_mass();
        let inv_b = bodies[contact.b].inverse_mass();
        let total = inv_a + inv_b;
        if total <= 0.0 {
            return;
        }

        let n = contact.normal;
        bodies[contact.a].position -= n * (contact.depth * inv_a / total);
        bodies[contact.b].position += n * (contact.depth * inv_b / total);

        let closing = (bodies[contact.b].velocity - bodies[contact.a].velocity).dot(n);
        if closing >= 0.0 {
            return;
        }
        let impulse = -(1.0 + restitution.max(0.0)) * closing / total;
        bodies[contact.a].velocity -= n * (impulse * inv_a);
        bodies[contact.b].velocity += n * (impulse * inv_b);
    }
}

impl PhysicsWorld for ArenaSpace {
    fn add_body(&mut self, body: Body) -> BodyHandle {
        self.bodies.push(body);
        self.bodies.len() - 1
    }

    fn body(&self, handle: BodyHandle) -> Option<&Body> {
        self.bodies.get(handle)
    }

    fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut Body> {
        self.bodies.get_mut(handle)
    }

    fn register_collision_handler(&mut self, a: CollisionType, b: CollisionType, handler: CollisionHandler) {
        self.handlers.insert((a, b), handler);
    }

    fn step(&mut self, dt: f32) -> Vec<BodyHandle> {
        let previous: Vec<Vec2> = self.bodies.iter().map(|b| b.position).collect();
        for body in self.bodies.iter_mut().filter(|b| b.kind == BodyKind::Dynamic) {
            body.position += body.velocity * dt;
            body.angle += body.angular_velocity * dt;
        }

        let contacts = self.find_contacts(&previous);
        let Self { bodies, handlers } = self;
        let mut flagged = Vec::new();

        for contact in &contacts {
            // Types are read now, not at detection, since a handler may have
            // reclassified a shape earlier in this step.
            let sa = &bodies[contact.a].shapes[contact.shape_a];
            let sb = &bodies[contact.b].shapes[contact.shape_b];
            let (ta, tb) = (sa.collision_type, sb.collision_type);
            let mut restitution = sa.elasticity * sb.elasticity;

            let (key, first, second) = if handlers.contains_key(&(ta, tb)) {
                ((ta, tb), contact.a, contact.b)
            } else {
                ((tb, ta), contact.b, contact.a)
            };

            if let Some(handler) = handlers.get_mut(&key) {
                let mut arbiter = Arbiter {
                    bodies: &mut bodies[..],
                    first,
                    second,
                    restitution,
                    flagged: &mut flagged,
                };
                if !handler(&mut arbiter) {
                    continue;
                }
                restitution = arbiter.restitution;
            }

            Self::resolve(bodies, contact, restitution);
        }

        flagged
    }
}

/// Penetration normal (from `a` to `b`) and depth, if the shapes overlap
fn overlap(a: &Body, sa: &Shape, b: &Body, sb: &Shape) -> Option<(Vec2, f32)> {
    match (sa.geometry, sb.geometry) {
        (Geometry::Circle { offset: oa, radius: ra }, Geometry::Circle { offset: ob, radius: rb }) => {
            let ca = a.position + oa.rotated(a.angle);
            let cb = b.position + ob.rotated(b.angle);
            let delta = cb - ca;
            let dist = delta.length();
            if dist >= ra + rb {
                return None;
            }
            let normal = if dist > 1e-6 { delta * (1.0 / dist) } else { Vec2::new(1.0, 0.0) };
            Some((normal, ra + rb - dist))
        }
        (Geometry::Circle { offset, radius }, Geometry::Rect { min, max }) => {
            circle_rect(a.position + offset.rotated(a.angle), radius, b.position + min, b.position + max)
        }
        (Geometry::Rect { min, max }, Geometry::Circle { offset, radius }) => {
            circle_rect(b.position + offset.rotated(b.angle), radius, a.position + min, a.position + max)
                .map(|(normal, depth)| (-normal, depth))
        }
        (Geometry::Rect { .. }, Geometry::Rect { .. }) => None,
    }
}

/// Two circles whose centres passed each other during the step would be pushed
/// out the far side. Keep the side they approached from instead.
fn uncross(
    (a, sa, a_before): (&Body, &Shape, Vec2),
    (b, sb, b_before): (&Body, &Shape, Vec2),
    (normal, depth): (Vec2, f32),
) -> (Vec2, f32) {
    let (Geometry::Circle { offset: oa, radius: ra }, Geometry::Circle { offset: ob, radius: rb }) =
        (sa.geometry, sb.geometry)
    else {
        return (normal, depth);
    };

    let before = (b_before + ob.rotated(b.angle)) - (a_before + oa.rotated(a.angle));
    if before.dot(normal) >= 0.0 {
        return (normal, depth);
    }
    let approach = before.normalized();
    let now = (b.position + ob.rotated(b.angle)) - (a.position + oa.rotated(a.angle));
    (approach, ra + rb - now.dot(approach))
}

/// Normal points from the circle into the box
fn circle_rect(center: Vec2, radius: f32, min: Vec2, max: Vec2) -> Option<(Vec2, f32)> {
    let closest = Vec2::new(center.x.clamp(min.x, max.x), center.y.clamp(min.y, max.y));
    let delta = closest - center;
    let dist = delta.length();

    if dist > 1e-6 {
        if dist >= radius {
            return None;
        }
        return Some((delta * (1.0 / dist), radius - dist));
    }

    // Centre inside the box: leave through the nearest side
    let exits = [
        (center.x - min.x, Vec2::new(1.0, 0.0)),
        (max.x - center.x, Vec2::new(-1.0, 0.0)),
        (center.y - min.y, Vec2::new(0.0, 1.0)),
        (max.y - center.y, Vec2::new(0.0, -1.0)),
    ];
    exits
        .iter()
        .min_by(|l, r| l.0.total_cmp(&r.0))
        .map(|&(gap, normal)| (normal, gap + radius))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ball(x: f32, vx: f32, collision_type: CollisionType, group: u32) -> Body {
        let mut body = Body::dynamic(1.0, Vec2::new(x, 0.0), 0.0, group)
            .with_shape(Shape::circle(Vec2::ZERO, 5.0, collision_type, 1.0));
        body.velocity = Vec2::new(vx, 0.0);
        body
    }

    #[test]
    fn free_bodies_integrate_velocity() {
        let mut space = ArenaSpace::new();
        let h = space.add_body(ball(0.0, 10.0, CollisionType::Core, 0));
        space.step(0.5);
        assert_eq!(space.body(h).unwrap().position, Vec2::new(5.0, 0.0));
    }

    #[test]
    fn head_on_elastic_contact_swaps_velocities() {
        let mut space = ArenaSpace::new();
        let a = space.add_body(ball(0.0, 10.0, CollisionType::Core, 0));
        let b = space.add_body(ball(9.0, -10.0, CollisionType::Core, 1));
        space.step(0.01);

        assert!(space.body(a).unwrap().velocity.x < 0.0);
        assert!(space.body(b).unwrap().velocity.x > 0.0);
        let gap = space.body(b).unwrap().position.x - space.body(a).unwrap().position.x;
        assert!(gap >= 9.99);
    }

    #[test]
    fn wall_stops_body_and_reflects_with_restitution() {
        let mut space = ArenaSpace::new();
        space.add_body(Body::fixed().with_shape(Shape::rect(
            Vec2::new(20.0, 0.0),
            10.0,
            100.0,
            CollisionType::ArenaBorder,
            0.5,
        )));
        let h = space.add_body(ball(12.0, 10.0, CollisionType::Core, 0));
        space.step(0.01);

        let body = space.body(h).unwrap();
        assert!((body.velocity.x + 5.0).abs() < 1e-3);
        assert!(body.position.x <= 10.0 + 1e-3);
    }

    #[test]
    fn handler_receives_bodies_in_registered_order() {
        let mut space = ArenaSpace::new();
        let core = space.add_body(ball(0.0, 0.0, CollisionType::Core, 0));
        let plow = space.add_body(ball(8.0, 0.0, CollisionType::Plow, 1));

        space.register_collision_handler(
            CollisionType::Plow,
            CollisionType::Core,
            Box::new(move |arb| {
                assert_eq!(arb.first, plow);
                assert_eq!(arb.second, core);
                let victim = arb.second;
                arb.body_mut(victim).reclassify(CollisionType::DeadBody);
                arb.flag(victim);
                true
            }),
        );

        let flagged = space.step(0.01);
        assert_eq!(flagged, vec![core]);
        assert_eq!(
            space.body(core).unwrap().shapes[0].collision_type,
            CollisionType::DeadBody
        );
    }

    #[test]
    fn handler_returning_false_skips_resolution() {
        let mut space = ArenaSpace::new();
        let a = space.add_body(ball(0.0, 10.0, CollisionType::Plow, 0));
        space.add_body(ball(8.0, 0.0, CollisionType::Plow, 0));

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        space.register_collision_handler(
            CollisionType::Plow,
            CollisionType::Plow,
            Box::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                false
            }),
        );

        space.step(0.01);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(space.body(a).unwrap().velocity, Vec2::new(10.0, 0.0));
    }

    #[test]
    fn restitution_is_the_uncapped_elasticity_product() {
        let mut space = ArenaSpace::new();
        let mut plow = ball(0.0, 10.0, CollisionType::Plow, 0);
        plow.shapes[0].elasticity = 1.5;
        let mut core = ball(9.0, 0.0, CollisionType::Core, 1);
        core.shapes[0].elasticity = 5.0;
        let a = space.add_body(plow);
        let b = space.add_body(core);
        space.step(0.01);

        // Equal masses, e = 7.5: the struck body leaves at (1 + e) / 2 of the closing speed
        let struck = space.body(b).unwrap().velocity.x;
        assert!((struck - 42.5).abs() < 1e-3, "struck body at {struck}");
        assert!(space.body(a).unwrap().velocity.x < -30.0);
    }

    #[test]
    fn body_that_passed_through_is_pushed_back_the_way_it_came() {
        let mut space = ArenaSpace::new();
        let plow = space.add_body(ball(0.0, 100.0, CollisionType::Plow, 0));
        let core = space.add_body(ball(8.0, 0.0, CollisionType::Core, 1));

        // The plow's centre ends the step past the core's centre
        space.step(0.15);

        let (p, c) = (space.body(plow).unwrap(), space.body(core).unwrap());
        assert!((c.velocity.x - 100.0).abs() < 1e-3);
        assert!(p.velocity.x.abs() < 1e-3);
        assert!(c.position.x - p.position.x >= 9.99);
    }

    #[test]
    fn shapes_on_the_same_body_never_collide() {
        let mut space = ArenaSpace::new();
        let h = space.add_body(
            Body::dynamic(1.0, Vec2::ZERO, 0.0, 0)
                .with_shape(Shape::circle(Vec2::new(5.0, 0.0), 6.0, CollisionType::Plow, 1.0))
                .with_shape(Shape::circle(Vec2::new(-5.0, 0.0), 6.0, CollisionType::Core, 1.0)),
        );
        assert!(space.step(0.01).is_empty());
        assert_eq!(space.body(h).unwrap().position, Vec2::ZERO);
    }
}
