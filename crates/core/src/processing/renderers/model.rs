//! Software renderer for triangle meshes.
//!
//! The mesh is fitted into the bi-unit cube, normals are smoothed across
//! edges sharper than a fixed threshold, and the result is rasterized with a
//! z-buffer and Phong shading from a fixed camera.

use std::collections::HashMap;
use std::io::Cursor;

use cgmath::{Deg, EuclideanSpace, InnerSpace, Matrix4, Point3, Rad, Vector3, Vector4, perspective};
use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgb, RgbImage};
use stockroom_api::Asset;

use crate::config::{RenderConfig, parse_hex_color, render_target_size};
use crate::error::{Result, StockroomError};
use crate::processing::{ProcessContext, Renderer, render_name};

type Vec3 = Vector3<f64>;

const SMOOTHING_THRESHOLD_DEG: f64 = 30.0;
const AMBIENT: f64 = 0.2;
const DIFFUSE: f64 = 0.8;
const SPECULAR: f64 = 1.0;
const SPECULAR_POWER: i32 = 32;

#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    pub vertices: [Vec3; 3],
    pub normals: [Vec3; 3],
}

#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub triangles: Vec<Triangle>,
}

impl Mesh {
    /// Parse binary or ASCII STL.
    pub fn from_stl(bytes: &[u8]) -> Result<Self> {
        let mesh = if is_binary_stl(bytes) {
            parse_binary_stl(bytes)?
        } else if bytes.trim_ascii_start().starts_with(b"solid") {
            parse_ascii_stl(bytes)?
        } else {
            return Err(StockroomError::Decode("not an STL file".into()));
        };
        if mesh.triangles.is_empty() {
            return Err(StockroomError::Decode("STL contains no triangles".into()));
        }
        Ok(mesh)
    }

    fn from_vertices(vertices: Vec<Vec3>) -> Self {
        let triangles = vertices
            .chunks_exact(3)
            .map(|c| {
                let n = face_normal(c[0], c[1], c[2]);
                Triangle {
                    vertices: [c[0], c[1], c[2]],
                    normals: [n, n, n],
                }
            })
            .collect();
        Self { triangles }
    }

    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let mut iter = self.triangles.iter().flat_map(|t| t.vertices.iter());
        let first = *iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), v| {
            (
                Vec3::new(lo.x.min(v.x), lo.y.min(v.y), lo.z.min(v.z)),
                Vec3::new(hi.x.max(v.x), hi.y.max(v.y), hi.z.max(v.z)),
            )
        }))
    }

    /// Center on the origin and scale uniformly to fit inside [-1, 1]^3.
    pub fn fit_bi_unit_cube(&mut self) {
        let Some((lo, hi)) = self.bounds() else {
            return;
        };
        let size = hi - lo;
        let extent = size.x.max(size.y).max(size.z);
        let scale = if extent > 0.0 { 2.0 / extent } else { 1.0 };
        let center = (lo + hi) * 0.5;
        for tri in &mut self.triangles {
            for v in &mut tri.vertices {
                *v = (*v - center) * scale;
            }
        }
    }

    /// Average face normals around each vertex, ignoring faces that meet at
    /// an angle wider than `threshold`.
    pub fn smooth_normals(&mut self, threshold: Rad<f64>) {
        let cos_threshold = threshold.0.cos();
        let faces: Vec<Vec3> = self
            .triangles
            .iter()
            .map(|t| face_normal(t.vertices[0], t.vertices[1], t.vertices[2]))
            .collect();

        let mut around: HashMap<(i64, i64, i64), Vec<usize>> = HashMap::new();
        for (i, tri) in self.triangles.iter().enumerate() {
            for v in &tri.vertices {
                around.entry(vertex_key(*v)).or_default().push(i);
            }
        }

        for (i, tri) in self.triangles.iter_mut().enumerate() {
            let own = faces[i];
            for (corner, v) in tri.vertices.iter().enumerate() {
                let mut sum = Vec3::new(0.0, 0.0, 0.0);
                if let Some(neighbours) = around.get(&vertex_key(*v)) {
                    for &j in neighbours {
                        if own.dot(faces[j]) >= cos_threshold {
                            sum += faces[j];
                        }
                    }
                }
                tri.normals[corner] = if sum.magnitude2() > 0.0 { sum.normalize() } else { own };
            }
        }
    }
}

fn vertex_key(v: Vec3) -> (i64, i64, i64) {
    let q = |x: f64| (x * 1e6).round() as i64;
    (q(v.x), q(v.y), q(v.z))
}

fn face_normal(a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let n = (b - a).cross(c - a);
    if n.magnitude2() > 0.0 { n.normalize() } else { n }
}

fn is_binary_stl(bytes: &[u8]) -> bool {
    if bytes.len() < 84 {
        return false;
    }
    let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]) as usize;
    count.checked_mul(50).and_then(|n| n.checked_add(84)) == Some(bytes.len())
}

fn parse_binary_stl(bytes: &[u8]) -> Result<Mesh> {
    let read_f32 = |at: usize| f32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    let mut vertices = Vec::new();
    for record in (84..bytes.len()).step_by(50) {
        // 12 bytes of stored normal are skipped, normals are recomputed
        for corner in 0..3 {
            let at = record + 12 + corner * 12;
            vertices.push(Vec3::new(
                f64::from(read_f32(at)),
                f64::from(read_f32(at + 4)),
                f64::from(read_f32(at + 8)),
            ));
        }
    }
    Ok(Mesh::from_vertices(vertices))
}

fn parse_ascii_stl(bytes: &[u8]) -> Result<Mesh> {
    let text = String::from_utf8_lossy(bytes);
    let mut vertices = Vec::new();
    let mut tokens = text.split_whitespace();
    while let Some(token) = tokens.next() {
        if token != "vertex" {
            continue;
        }
        let mut coords = [0.0f64; 3];
        for slot in &mut coords {
            let raw = tokens
                .next()
                .ok_or_else(|| StockroomError::Decode("truncated vertex".into()))?;
            *slot = raw
                .parse()
                .map_err(|_| StockroomError::Decode(format!("invalid coordinate: {}", raw)))?;
        }
        vertices.push(Vec3::new(coords[0], coords[1], coords[2]));
    }
    if vertices.len() % 3 != 0 {
        return Err(StockroomError::Decode("vertex count is not a multiple of 3".into()));
    }
    Ok(Mesh::from_vertices(vertices))
}

/// Camera, light and output parameters.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    pub supersample: u32,
    pub fovy: f64,
    pub near: f64,
    pub far: f64,
    pub eye: Point3<f64>,
    pub center: Point3<f64>,
    pub up: Vec3,
    pub light: Vec3,
    pub model_color: [u8; 3],
    pub background: [u8; 3],
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            supersample: 1,
            fovy: 30.0,
            near: 1.0,
            far: 10.0,
            eye: Point3::new(-3.0, -3.0, -0.75),
            center: Point3::new(0.0, -0.07, 0.0),
            up: Vec3::new(0.0, 0.0, 1.0),
            light: Vec3::new(-0.75, -5.0, 0.25).normalize(),
            model_color: [0x16, 0x7D, 0xF0],
            background: [0xFF, 0xFF, 0xFF],
        }
    }
}

impl RenderSettings {
    pub fn from_config(config: &RenderConfig) -> Result<Self> {
        Ok(Self {
            width: config.width,
            height: config.height,
            supersample: config.supersample.max(1),
            model_color: parse_hex_color(&config.model_color)?,
            background: parse_hex_color(&config.background_color)?,
            ..Self::default()
        })
    }
}

/// Renders STL meshes to PNG previews.
pub struct ModelRenderer {
    settings: RenderSettings,
}

impl ModelRenderer {
    pub fn new(settings: RenderSettings) -> Self {
        Self { settings }
    }

    pub fn from_config(config: &RenderConfig) -> Result<Self> {
        Ok(Self::new(RenderSettings::from_config(config)?))
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Normalize, smooth and rasterize a mesh at the configured size.
    pub fn render_mesh(&self, mut mesh: Mesh) -> Result<RgbImage> {
        let s = &self.settings;
        let (width, height) = render_target_size(s.width, s.height, s.supersample)?;

        mesh.fit_bi_unit_cube();
        mesh.smooth_normals(Deg(SMOOTHING_THRESHOLD_DEG).into());

        let aspect = f64::from(s.width) / f64::from(s.height);
        let view = Matrix4::look_at_rh(s.eye, s.center, s.up);
        let projection = perspective(Deg(s.fovy), aspect, s.near, s.far);
        let mvp = projection * view;

        let mut target = Raster::new(width, height, s.background);
        for tri in &mesh.triangles {
            target.draw(tri, &mvp, s);
        }

        let image = target.into_image();
        Ok(if s.supersample > 1 {
            imageops::resize(&image, s.width, s.height, FilterType::Triangle)
        } else {
            image
        })
    }
}

struct Raster {
    width: u32,
    height: u32,
    color: RgbImage,
    depth: Vec<f64>,
}

struct ScreenVertex {
    x: f64,
    y: f64,
    z: f64,
}

impl Raster {
    fn new(width: u32, height: u32, background: [u8; 3]) -> Self {
        Self {
            width,
            height,
            color: RgbImage::from_pixel(width, height, Rgb(background)),
            depth: vec![f64::INFINITY; width as usize * height as usize],
        }
    }

    fn project(&self, mvp: &Matrix4<f64>, v: Vec3) -> Option<ScreenVertex> {
        let clip: Vector4<f64> = *mvp * v.extend(1.0);
        if clip.w <= 1e-9 {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        Some(ScreenVertex {
            x: (ndc.x + 1.0) * 0.5 * f64::from(self.width),
            y: (1.0 - ndc.y) * 0.5 * f64::from(self.height),
            z: ndc.z,
        })
    }

    fn draw(&mut self, tri: &Triangle, mvp: &Matrix4<f64>, s: &RenderSettings) {
        let (Some(a), Some(b), Some(c)) = (
            self.project(mvp, tri.vertices[0]),
            self.project(mvp, tri.vertices[1]),
            self.project(mvp, tri.vertices[2]),
        ) else {
            return;
        };

        let area = edge(&a, &b, c.x, c.y);
        if area.abs() < 1e-12 {
            return;
        }

        let max_x = f64::from(self.width - 1);
        let max_y = f64::from(self.height - 1);
        let x0 = a.x.min(b.x).min(c.x).floor().clamp(0.0, max_x) as u32;
        let x1 = a.x.max(b.x).max(c.x).ceil().clamp(0.0, max_x) as u32;
        let y0 = a.y.min(b.y).min(c.y).floor().clamp(0.0, max_y) as u32;
        let y1 = a.y.max(b.y).max(c.y).ceil().clamp(0.0, max_y) as u32;

        for y in y0..=y1 {
            for x in x0..=x1 {
                let px = f64::from(x) + 0.5;
                let py = f64::from(y) + 0.5;
                let w0 = edge(&b, &c, px, py) / area;
                let w1 = edge(&c, &a, px, py) / area;
                let w2 = 1.0 - w0 - w1;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }

                let z = w0 * a.z + w1 * b.z + w2 * c.z;
                if !(-1.0..=1.0).contains(&z) {
                    continue;
                }
                let idx = (y * self.width + x) as usize;
                if z >= self.depth[idx] {
                    continue;
                }
                self.depth[idx] = z;

                let position = tri.vertices[0] * w0 + tri.vertices[1] * w1 + tri.vertices[2] * w2;
                let normal = tri.normals[0] * w0 + tri.normals[1] * w1 + tri.normals[2] * w2;
                self.color.put_pixel(x, y, Rgb(shade(position, normal, s)));
            }
        }
    }

    fn into_image(self) -> RgbImage {
        self.color
    }
}

fn edge(a: &ScreenVertex, b: &ScreenVertex, px: f64, py: f64) -> f64 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

fn shade(position: Vec3, normal: Vec3, s: &RenderSettings) -> [u8; 3] {
    let to_camera = (s.eye.to_vec() - position).normalize();
    let mut n = if normal.magnitude2() > 0.0 { normal.normalize() } else { to_camera };
    // Light both sides of open or inverted meshes
    if n.dot(to_camera) < 0.0 {
        n = -n;
    }

    let mut light = AMBIENT;
    let diffuse = n.dot(s.light).max(0.0);
    if diffuse > 0.0 {
        let reflected = n * (2.0 * n.dot(s.light)) - s.light;
        light += SPECULAR * to_camera.dot(reflected).max(0.0).powi(SPECULAR_POWER);
    }
    light += DIFFUSE * diffuse;

    s.model_color.map(|c| (f64::from(c) * light).clamp(0.0, 255.0).round() as u8)
}

impl Renderer for ModelRenderer {
    fn name(&self) -> &'static str {
        "model"
    }

    fn render(&self, ctx: &ProcessContext, asset: &Asset) -> Result<Asset> {
        let generated = ctx.generated()?;
        let name = render_name(asset);
        if generated.exists(&name) {
            return Ok(ctx.generated_asset(generated.as_ref(), &name, &asset.label, asset));
        }

        tracing::info!("rendering {} to {}", asset.path_str(), name);
        let mesh = Mesh::from_stl(&ctx.source_bytes(asset)?)?;
        let image = self.render_mesh(mesh)?;

        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        ctx.store_generated(&name, &png, &asset.label, asset)
    }
}
