//! Replays recorded draw commands onto a nannou `Draw`.
//!
//! Commands arrive in canvas coordinates (top-left origin, y down) and are
//! mapped onto the window rect, whose origin is the center with y up.

use beat_viz_core::renderer::{flatten_path, DrawCommand, Fill, Glow, Point, Rgba};
use nannou::prelude::*;

/// Horizontal strips used to approximate a vertical gradient
const GRADIENT_STRIPS: usize = 20;
/// Translucent layers stacked to fake a glow
const GLOW_LAYERS: usize = 3;
/// Line pieces per quadratic curve segment
const CURVE_STEPS: usize = 8;

#[derive(Clone, Copy, Debug)]
pub struct Canvas {
    bounds: Rect,
}

impl Canvas {
    pub fn new(bounds: Rect) -> Self {
        Self { bounds }
    }

    pub fn point(&self, p: Point) -> Point2 {
        pt2(self.bounds.left() + p.x, self.bounds.top() - p.y)
    }

    /// Center of a canvas rect given by its top-left corner and size
    pub fn rect_center(&self, x: f32, y: f32, width: f32, height: f32) -> Point2 {
        self.point(Point::new(x + width / 2.0, y + height / 2.0))
    }

    pub fn replay(&self, draw: &Draw, commands: &[DrawCommand]) {
        for command in commands {
            self.draw_command(draw, command);
        }
    }

    fn draw_command(&self, draw: &Draw, command: &DrawCommand) {
        match command {
            DrawCommand::Rect {
                x,
                y,
                width,
                height,
                fill,
                glow,
            } => {
                if let Some(glow) = glow {
                    for (spread, alpha) in glow_layers(glow) {
                        draw.rect()
                            .xy(self.rect_center(*x, *y, *width, *height))
                            .w_h(width + spread * 2.0, height + spread * 2.0)
                            .color(color(glow.color.with_alpha(alpha)));
                    }
                }
                match fill {
                    Fill::Solid(c) => {
                        draw.rect()
                            .xy(self.rect_center(*x, *y, *width, *height))
                            .w_h(*width, *height)
                            .color(color(*c));
                    }
                    Fill::VerticalGradient { top, bottom } => {
                        for (strip_y, strip_h, c) in gradient_strips(*y, *height, *top, *bottom) {
                            draw.rect()
                                .xy(self.rect_center(*x, strip_y, *width, strip_h))
                                .w_h(*width, strip_h)
                                .color(color(c));
                        }
                    }
                }
            }
            DrawCommand::Circle {
                center,
                radius,
                color: c,
                glow,
            } => {
                let center = self.point(*center);
                if let Some(glow) = glow {
                    for (spread, alpha) in glow_layers(glow) {
                        draw.ellipse()
                            .xy(center)
                            .radius(radius + spread)
                            .color(color(glow.color.with_alpha(alpha)));
                    }
                }
                draw.ellipse().xy(center).radius(*radius).color(color(*c));
            }
            DrawCommand::StrokeCircle {
                center,
                radius,
                color: c,
                width,
            } => {
                draw.ellipse()
                    .xy(self.point(*center))
                    .radius(*radius)
                    .no_fill()
                    .stroke(color(*c))
                    .stroke_weight(*width);
            }
            DrawCommand::Line {
                from,
                to,
                color: c,
                width,
            } => {
                draw.line()
                    .start(self.point(*from))
                    .end(self.point(*to))
                    .weight(*width)
                    .color(color(*c));
            }
            DrawCommand::Path {
                segments,
                color: c,
                width,
                glow,
            } => {
                for line in flatten_path(segments, CURVE_STEPS) {
                    let points: Vec<Point2> = line.iter().map(|p| self.point(*p)).collect();
                    if let Some(glow) = glow {
                        for (spread, alpha) in glow_layers(glow) {
                            draw.polyline()
                                .weight(width + spread)
                                .points(points.iter().copied())
                                .color(color(glow.color.with_alpha(alpha)));
                        }
                    }
                    draw.polyline()
                        .weight(*width)
                        .points(points)
                        .color(color(*c));
                }
            }
        }
    }
}

fn color(c: Rgba) -> Srgba {
    srgba(c.r, c.g, c.b, c.a)
}

/// Spread and alpha of each glow layer, widest and faintest first
fn glow_layers(glow: &Glow) -> impl Iterator<Item = (f32, f32)> + '_ {
    (1..=GLOW_LAYERS).rev().map(move |layer| {
        let t = layer as f32 / GLOW_LAYERS as f32;
        (glow.radius * t, glow.color.a * 0.25 * (1.0 - t * 0.7))
    })
}

/// Split a gradient rect into strips: (top y, height, color)
fn gradient_strips(y: f32, height: f32, top: Rgba, bottom: Rgba) -> Vec<(f32, f32, Rgba)> {
    let strip = height / GRADIENT_STRIPS as f32;
    (0..GRADIENT_STRIPS)
        .map(|i| {
            let t = (i as f32 + 0.5) / GRADIENT_STRIPS as f32;
            let c = Rgba::new(
                top.r + (bottom.r - top.r) * t,
                top.g + (bottom.g - top.g) * t,
                top.b + (bottom.b - top.b) * t,
                top.a + (bottom.a - top.a) * t,
            );
            (y + strip * i as f32, strip, c)
        })
        .collect()
}
