//! Drawing surface abstraction.
//!
//! Engines emit [`DrawCommand`]s in canvas coordinates: origin at the top-left
//! corner, y growing downwards. Hosts translate them to their own renderer.

/// Linear RGBA color, components in 0.0 - 1.0
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const WHITE: Rgba = Rgba::new(1.0, 1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque color from `0xRRGGBB`
    pub fn from_hex(hex: u32) -> Self {
        Self::new(
            ((hex >> 16) & 0xff) as f32 / 255.0,
            ((hex >> 8) & 0xff) as f32 / 255.0,
            (hex & 0xff) as f32 / 255.0,
            1.0,
        )
    }

    pub fn with_alpha(self, a: f32) -> Self {
        Self {
            a: a.clamp(0.0, 1.0),
            ..self
        }
    }

    /// Blend towards white by `amount`
    pub fn lighten(self, amount: f32) -> Self {
        let t = amount.clamp(0.0, 1.0);
        Self::new(
            self.r + (1.0 - self.r) * t,
            self.g + (1.0 - self.g) * t,
            self.b + (1.0 - self.b) * t,
            self.a,
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn midpoint(self, other: Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Fill {
    Solid(Rgba),
    /// Blend from `top` at the top edge to `bottom` at the bottom edge
    VerticalGradient { top: Rgba, bottom: Rgba },
}

/// Soft halo drawn behind a shape
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Glow {
    pub color: Rgba,
    pub radius: f32,
}

impl Glow {
    /// A glow of `radius` pixels, or none if it would be invisible
    pub fn new(color: Rgba, radius: f32) -> Option<Self> {
        (radius > 0.5).then_some(Self { color, radius })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PathSegment {
    MoveTo(Point),
    LineTo(Point),
    QuadTo { control: Point, to: Point },
}

#[derive(Clone, Debug, PartialEq)]
pub enum DrawCommand {
    Rect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        fill: Fill,
        glow: Option<Glow>,
    },
    Circle {
        center: Point,
        radius: f32,
        color: Rgba,
        glow: Option<Glow>,
    },
    StrokeCircle {
        center: Point,
        radius: f32,
        color: Rgba,
        width: f32,
    },
    Line {
        from: Point,
        to: Point,
        color: Rgba,
        width: f32,
    },
    Path {
        segments: Vec<PathSegment>,
        color: Rgba,
        width: f32,
        glow: Option<Glow>,
    },
}

/// Where engines paint
pub trait Surface {
    /// Width and height in pixels
    fn size(&self) -> (f32, f32);

    fn draw(&mut self, command: DrawCommand);
}

/// Surface that records commands for later replay
#[derive(Clone, Debug, Default)]
pub struct DrawList {
    width: f32,
    height: f32,
    commands: Vec<DrawCommand>,
}

impl DrawList {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            commands: Vec::new(),
        }
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        self.width = width;
        self.height = height;
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Take the recorded commands, leaving the list empty
    pub fn take(&mut self) -> Vec<DrawCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

impl Surface for DrawList {
    fn size(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    fn draw(&mut self, command: DrawCommand) {
        self.commands.push(command);
    }
}

/// Turn path segments into polylines, one per `MoveTo`.
///
/// Quadratic segments are sampled with `steps` line pieces each.
pub fn flatten_path(segments: &[PathSegment], steps: usize) -> Vec<Vec<Point>> {
    let steps = steps.max(1);
    let mut lines: Vec<Vec<Point>> = Vec::new();
    let mut current: Vec<Point> = Vec::new();

    for segment in segments {
        match *segment {
            PathSegment::MoveTo(p) => {
                if current.len() > 1 {
                    lines.push(std::mem::take(&mut current));
                }
                current.clear();
                current.push(p);
            }
            PathSegment::LineTo(p) => current.push(p),
            PathSegment::QuadTo { control, to } => {
                let Some(&start) = current.last() else {
                    current.push(to);
                    continue;
                };
                for i in 1..=steps {
                    let t = i as f32 / steps as f32;
                    let u = 1.0 - t;
                    current.push(Point::new(
                        u * u * start.x + 2.0 * u * t * control.x + t * t * to.x,
                        u * u * start.y + 2.0 * u * t * control.y + t * t * to.y,
                    ));
                }
            }
        }
    }
    if current.len() > 1 {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_hex() {
        let c = Rgba::from_hex(0xff8000);
        assert_eq!(c.r, 1.0);
        assert!((c.g - 128.0 / 255.0).abs() < 1e-6);
        assert_eq!(c.b, 0.0);
        assert_eq!(c.a, 1.0);
    }

    #[test]
    fn test_flatten_quad_hits_endpoints() {
        let segments = [
            PathSegment::MoveTo(Point::new(0.0, 0.0)),
            PathSegment::QuadTo {
                control: Point::new(5.0, 10.0),
                to: Point::new(10.0, 0.0),
            },
        ];
        let lines = flatten_path(&segments, 8);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 9);
        assert_eq!(lines[0][8], Point::new(10.0, 0.0));
        // Apex of the curve is halfway to the control point
        assert!((lines[0][4].y - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_flatten_splits_subpaths() {
        let segments = [
            PathSegment::MoveTo(Point::new(0.0, 0.0)),
            PathSegment::LineTo(Point::new(1.0, 0.0)),
            PathSegment::MoveTo(Point::new(5.0, 5.0)),
            PathSegment::LineTo(Point::new(6.0, 5.0)),
            PathSegment::MoveTo(Point::new(9.0, 9.0)),
        ];
        assert_eq!(flatten_path(&segments, 4).len(), 2);
    }

    #[test]
    fn test_glow_skips_tiny_radius() {
        assert!(Glow::new(Rgba::WHITE, 0.1).is_none());
        assert!(Glow::new(Rgba::WHITE, 4.0).is_some());
    }
}
