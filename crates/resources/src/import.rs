//! CPU-side glTF import.
//!
//! [`SceneAsset::load`] reads a `.gltf` or `.glb` file and flattens it into
//! plain data the renderer can upload: decoded RGBA8 images, sampler
//! filters, material factors, concatenated mesh buffers and the node
//! hierarchy. Nothing here touches the GPU.

use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;

use ash::vk;
use blackhole_rhi::sampler::SamplerDesc;
use blackhole_rhi::vertex::Vertex;
use blackhole_scene::{Bounds, MaterialPass, Transform};
use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use gltf::image::Format;
use gltf::material::AlphaMode;
use gltf::texture::{MagFilter, MinFilter};
use tracing::{debug, info, warn};

use crate::error::{ResourceError, ResourceResult};
use crate::image_utils::premultiply_alpha;

/// Decoded image with premultiplied RGBA8 pixels.
#[derive(Clone, Debug)]
pub struct ImageData {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Image and sampler indices into the owning [`SceneAsset`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureRef {
    pub image: usize,
    pub sampler: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MaterialData {
    pub name: String,
    pub base_color_factor: Vec4,
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub base_color_texture: Option<TextureRef>,
    pub metal_rough_texture: Option<TextureRef>,
    pub pass: MaterialPass,
}

/// White, untextured, opaque. Used for scenes without materials.
impl Default for MaterialData {
    fn default() -> Self {
        Self {
            name: "default".to_owned(),
            base_color_factor: Vec4::ONE,
            metallic_factor: 1.0,
            roughness_factor: 0.5,
            base_color_texture: None,
            metal_rough_texture: None,
            pass: MaterialPass::MainColor,
        }
    }
}

/// Index range of one primitive inside its mesh's index buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceData {
    pub start_index: u32,
    pub count: u32,
    /// `None` means the engine's default material.
    pub material: Option<usize>,
    pub bounds: Bounds,
}

#[derive(Clone, Debug)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub surfaces: Vec<SurfaceData>,
}

impl MeshData {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

#[derive(Clone, Debug)]
pub struct NodeData {
    pub name: String,
    pub mesh: Option<usize>,
    pub local_transform: Mat4,
    pub children: Vec<usize>,
}

/// Everything the renderer needs from one glTF file.
#[derive(Clone, Debug, Default)]
pub struct SceneAsset {
    pub samplers: Vec<SamplerDesc>,
    /// `None` for images that failed to decode.
    pub images: Vec<Option<ImageData>>,
    pub materials: Vec<MaterialData>,
    pub meshes: Vec<MeshData>,
    pub nodes: Vec<NodeData>,
}

impl SceneAsset {
    /// Loads a glTF or GLB file.
    ///
    /// Buffers are resolved relative to the file's directory. A broken image
    /// is logged and recorded as `None` instead of failing the load.
    ///
    /// # Errors
    ///
    /// Returns an error if the document or its buffers cannot be read, or if
    /// a primitive has no positions.
    pub fn load(path: impl AsRef<Path>) -> ResourceResult<Self> {
        let path = path.as_ref();
        let start = Instant::now();
        info!("Loading glTF: {}", path.display());

        let gltf_error = |source| ResourceError::Gltf {
            path: path.to_path_buf(),
            source,
        };
        let gltf::Gltf { document, blob } = gltf::Gltf::open(path).map_err(gltf_error)?;
        let base = path.parent();
        let buffers = gltf::import_buffers(&document, base, blob).map_err(gltf_error)?;

        let samplers = load_samplers(&document);
        let images = load_images(&document, base, &buffers);
        let materials = load_materials(&document);
        let meshes = load_meshes(&document, &buffers, !materials.is_empty())?;
        let nodes = load_nodes(&document);

        info!(
            "Loaded '{}' in {:.1?}: {} meshes, {} materials, {} images, {} nodes",
            path.display(),
            start.elapsed(),
            meshes.len(),
            materials.len(),
            images.len(),
            nodes.len()
        );

        Ok(Self {
            samplers,
            images,
            materials,
            meshes,
            nodes,
        })
    }

    /// Nodes that are nobody's child, in file order.
    pub fn roots(&self) -> Vec<usize> {
        let mut is_child = vec![false; self.nodes.len()];
        for node in &self.nodes {
            for &child in &node.children {
                if let Some(flag) = is_child.get_mut(child) {
                    *flag = true;
                }
            }
        }
        (0..self.nodes.len()).filter(|&i| !is_child[i]).collect()
    }
}

fn load_samplers(document: &gltf::Document) -> Vec<SamplerDesc> {
    let mut samplers: Vec<SamplerDesc> = document
        .samplers()
        .map(|sampler| SamplerDesc {
            mag_filter: match sampler.mag_filter() {
                Some(MagFilter::Linear) => vk::Filter::LINEAR,
                Some(MagFilter::Nearest) | None => vk::Filter::NEAREST,
            },
            min_filter: min_filter(sampler.min_filter()),
            mipmap_mode: mipmap_mode(sampler.min_filter()),
        })
        .collect();

    if samplers.is_empty() {
        samplers.push(SamplerDesc::LINEAR);
    }
    samplers
}

fn min_filter(filter: Option<MinFilter>) -> vk::Filter {
    match filter {
        Some(MinFilter::Linear | MinFilter::LinearMipmapNearest | MinFilter::LinearMipmapLinear) => {
            vk::Filter::LINEAR
        }
        _ => vk::Filter::NEAREST,
    }
}

fn mipmap_mode(filter: Option<MinFilter>) -> vk::SamplerMipmapMode {
    match filter {
        Some(MinFilter::NearestMipmapLinear | MinFilter::LinearMipmapLinear) => {
            vk::SamplerMipmapMode::LINEAR
        }
        _ => vk::SamplerMipmapMode::NEAREST,
    }
}

fn load_images(
    document: &gltf::Document,
    base: Option<&Path>,
    buffers: &[gltf::buffer::Data],
) -> Vec<Option<ImageData>> {
    let mut names = UniqueNames::default();
    document
        .images()
        .map(|image| {
            let name = names.claim(image.name(), "image", image.index());
            let decoded = gltf::image::Data::from_source(image.source(), base, buffers)
                .map_err(|source| ResourceError::Gltf {
                    path: base.map(Path::to_path_buf).unwrap_or_default(),
                    source,
                })
                .and_then(|data| to_rgba8(&name, data));
            match decoded {
                Ok(mut data) => {
                    premultiply_alpha(&mut data.pixels);
                    debug!("Decoded image '{}' ({}x{})", data.name, data.width, data.height);
                    Some(data)
                }
                Err(e) => {
                    warn!("Failed to load image '{}': {}", name, e);
                    None
                }
            }
        })
        .collect()
}

fn to_rgba8(name: &str, data: gltf::image::Data) -> ResourceResult<ImageData> {
    let (width, height) = (data.width, data.height);
    let unsupported = || ResourceError::UnsupportedImage {
        name: name.to_string(),
        reason: format!("{:?} pixels do not match {}x{}", data.format, width, height),
    };

    let image = match data.format {
        Format::R8 => image::GrayImage::from_raw(width, height, data.pixels)
            .map(image::DynamicImage::ImageLuma8),
        Format::R8G8 => image::GrayAlphaImage::from_raw(width, height, data.pixels)
            .map(image::DynamicImage::ImageLumaA8),
        Format::R8G8B8 => image::RgbImage::from_raw(width, height, data.pixels)
            .map(image::DynamicImage::ImageRgb8),
        Format::R8G8B8A8 => image::RgbaImage::from_raw(width, height, data.pixels)
            .map(image::DynamicImage::ImageRgba8),
        Format::R16 => image::ImageBuffer::from_raw(width, height, to_u16(&data.pixels))
            .map(image::DynamicImage::ImageLuma16),
        Format::R16G16 => image::ImageBuffer::from_raw(width, height, to_u16(&data.pixels))
            .map(image::DynamicImage::ImageLumaA16),
        Format::R16G16B16 => image::ImageBuffer::from_raw(width, height, to_u16(&data.pixels))
            .map(image::DynamicImage::ImageRgb16),
        Format::R16G16B16A16 => image::ImageBuffer::from_raw(width, height, to_u16(&data.pixels))
            .map(image::DynamicImage::ImageRgba16),
        Format::R32G32B32FLOAT => image::ImageBuffer::from_raw(width, height, to_f32(&data.pixels))
            .map(image::DynamicImage::ImageRgb32F),
        Format::R32G32B32A32FLOAT => {
            image::ImageBuffer::from_raw(width, height, to_f32(&data.pixels))
                .map(image::DynamicImage::ImageRgba32F)
        }
    };

    let rgba = image.ok_or_else(unsupported)?.to_rgba8();
    Ok(ImageData {
        name: name.to_string(),
        width,
        height,
        pixels: rgba.into_raw(),
    })
}

fn to_u16(bytes: &[u8]) -> Vec<u16> {
    bytemuck::pod_collect_to_vec(bytes)
}

fn to_f32(bytes: &[u8]) -> Vec<f32> {
    bytemuck::pod_collect_to_vec(bytes)
}

fn texture_ref(texture: gltf::Texture<'_>) -> TextureRef {
    TextureRef {
        image: texture.source().index(),
        sampler: texture.sampler().index().unwrap_or(0),
    }
}

fn load_materials(document: &gltf::Document) -> Vec<MaterialData> {
    let mut names = UniqueNames::default();
    document
        .materials()
        .enumerate()
        .map(|(i, material)| {
            let pbr = material.pbr_metallic_roughness();
            MaterialData {
                name: names.claim(material.name(), "material", i),
                base_color_factor: Vec4::from_array(pbr.base_color_factor()),
                metallic_factor: pbr.metallic_factor(),
                roughness_factor: pbr.roughness_factor(),
                base_color_texture: pbr.base_color_texture().map(|info| texture_ref(info.texture())),
                metal_rough_texture: pbr
                    .metallic_roughness_texture()
                    .map(|info| texture_ref(info.texture())),
                pass: match material.alpha_mode() {
                    AlphaMode::Blend => MaterialPass::Transparent,
                    AlphaMode::Opaque | AlphaMode::Mask => MaterialPass::MainColor,
                },
            }
        })
        .collect()
}

fn load_meshes(
    document: &gltf::Document,
    buffers: &[gltf::buffer::Data],
    has_materials: bool,
) -> ResourceResult<Vec<MeshData>> {
    let mut names = UniqueNames::default();
    let mut meshes = Vec::new();

    for mesh in document.meshes() {
        let name = names.claim(mesh.name(), "mesh", mesh.index());
        let mut vertices: Vec<Vertex> = Vec::new();
        let mut indices: Vec<u32> = Vec::new();
        let mut surfaces = Vec::new();

        for (p, primitive) in mesh.primitives().enumerate() {
            let reader =
                primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));

            let base_vertex = vertices.len();
            let positions = reader.read_positions().ok_or_else(|| ResourceError::MissingData {
                mesh: name.clone(),
                primitive: p,
                message: "no POSITION attribute",
            })?;
            vertices.extend(positions.map(|pos| Vertex {
                position: Vec3::from_array(pos),
                ..Vertex::default()
            }));
            let primitive_vertices = &mut vertices[base_vertex..];

            if let Some(normals) = reader.read_normals() {
                for (vertex, normal) in primitive_vertices.iter_mut().zip(normals) {
                    vertex.normal = Vec3::from_array(normal);
                }
            }
            if let Some(uvs) = reader.read_tex_coords(0) {
                for (vertex, uv) in primitive_vertices.iter_mut().zip(uvs.into_f32()) {
                    let uv = Vec2::from_array(uv);
                    vertex.uv_x = uv.x;
                    vertex.uv_y = uv.y;
                }
            }
            if let Some(colors) = reader.read_colors(0) {
                for (vertex, color) in primitive_vertices.iter_mut().zip(colors.into_rgba_f32()) {
                    vertex.color = Vec4::from_array(color);
                }
            }

            let start_index = indices.len();
            let vertex_count = primitive_vertices.len() as u32;
            let offset = base_vertex as u32;
            match reader.read_indices() {
                Some(read) => indices.extend(read.into_u32().map(|i| i + offset)),
                None => indices.extend((0..vertex_count).map(|i| i + offset)),
            }

            let material = primitive
                .material()
                .index()
                .or(has_materials.then_some(0));

            surfaces.push(SurfaceData {
                start_index: start_index as u32,
                count: (indices.len() - start_index) as u32,
                material,
                bounds: Bounds::from_points(vertices[base_vertex..].iter().map(|v| v.position)),
            });
        }

        debug!(
            "Mesh '{}': {} vertices, {} indices, {} surfaces",
            name,
            vertices.len(),
            indices.len(),
            surfaces.len()
        );
        meshes.push(MeshData {
            name,
            vertices,
            indices,
            surfaces,
        });
    }

    Ok(meshes)
}

fn load_nodes(document: &gltf::Document) -> Vec<NodeData> {
    let mut names = UniqueNames::default();
    document
        .nodes()
        .map(|node| NodeData {
            name: names.claim(node.name(), "node", node.index()),
            mesh: node.mesh().map(|mesh| mesh.index()),
            local_transform: local_matrix(node.transform()),
            children: node.children().map(|child| child.index()).collect(),
        })
        .collect()
}

/// Node matrix, composed as `T * R * S` when given as TRS.
fn local_matrix(transform: gltf::scene::Transform) -> Mat4 {
    match transform {
        gltf::scene::Transform::Matrix { matrix } => Mat4::from_cols_array_2d(&matrix),
        gltf::scene::Transform::Decomposed {
            translation,
            rotation,
            scale,
        } => Transform::new()
            .with_translation(Vec3::from_array(translation))
            .with_rotation(Quat::from_array(rotation))
            .with_scale(Vec3::from_array(scale))
            .local_matrix(),
    }
}

/// Hands out names that are unique within one category.
#[derive(Default)]
pub(crate) struct UniqueNames {
    used: HashSet<String>,
}

impl UniqueNames {
    /// Returns `name`, or `name (n)` with the smallest free `n` if it is
    /// taken. Missing or empty names become `<prefix>_<index>`.
    pub(crate) fn claim(&mut self, name: Option<&str>, prefix: &str, index: usize) -> String {
        let base = match name {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("{prefix}_{index}"),
        };

        let mut candidate = base.clone();
        let mut n = 1;
        while self.used.contains(&candidate) {
            candidate = format!("{base} ({n})");
            n += 1;
        }
        if candidate != base {
            warn!("{} name '{}' already in use, renaming to '{}'", prefix, base, candidate);
        }
        self.used.insert(candidate.clone());
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_names() {
        let mut names = UniqueNames::default();
        assert_eq!(names.claim(Some("Cube"), "mesh", 0), "Cube");
        assert_eq!(names.claim(Some("Cube"), "mesh", 1), "Cube (1)");
        assert_eq!(names.claim(Some("Cube"), "mesh", 2), "Cube (2)");
        assert_eq!(names.claim(None, "mesh", 3), "mesh_3");
        assert_eq!(names.claim(Some(""), "mesh", 4), "mesh_4");
    }

    #[test]
    fn test_sampler_filters() {
        assert_eq!(min_filter(None), vk::Filter::NEAREST);
        assert_eq!(min_filter(Some(MinFilter::LinearMipmapNearest)), vk::Filter::LINEAR);
        assert_eq!(min_filter(Some(MinFilter::NearestMipmapLinear)), vk::Filter::NEAREST);
        assert_eq!(
            mipmap_mode(Some(MinFilter::NearestMipmapLinear)),
            vk::SamplerMipmapMode::LINEAR
        );
        assert_eq!(mipmap_mode(Some(MinFilter::Linear)), vk::SamplerMipmapMode::NEAREST);
    }

    #[test]
    fn test_roots() {
        let node = |children: Vec<usize>| NodeData {
            name: String::new(),
            mesh: None,
            local_transform: Mat4::IDENTITY,
            children,
        };
        let asset = SceneAsset {
            nodes: vec![node(vec![2]), node(vec![]), node(vec![3]), node(vec![])],
            ..SceneAsset::default()
        };
        assert_eq!(asset.roots(), vec![0, 1]);
    }

    #[test]
    fn test_rgba8_conversion() {
        let data = gltf::image::Data {
            pixels: vec![10, 20, 30, 40, 50, 60],
            format: Format::R8G8B8,
            width: 2,
            height: 1,
        };
        let image = to_rgba8("rgb", data).unwrap();
        assert_eq!(image.pixels, vec![10, 20, 30, 255, 40, 50, 60, 255]);

        let short = gltf::image::Data {
            pixels: vec![1, 2, 3],
            format: Format::R8G8B8A8,
            width: 1,
            height: 1,
        };
        assert!(matches!(
            to_rgba8("short", short),
            Err(ResourceError::UnsupportedImage { .. })
        ));
    }
}
