//! glTF scenes uploaded to the GPU.
//!
//! A [`LoadedScene`] owns everything it uploads: mesh buffers, textures,
//! samplers, the material constant buffer and the descriptor pools its
//! material sets come from. Default textures are only borrowed through
//! shared handles. Drop a scene only once the GPU is idle.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use glam::Mat4;
use tracing::{debug, info, warn};

use blackhole_resources::{MaterialData, MeshData, NodeData, SceneAsset};
use blackhole_rhi::buffer::{AllocatedBuffer, MemoryUsage};
use blackhole_rhi::descriptor::PoolSizeRatio;
use blackhole_rhi::descriptor_allocator::GrowableDescriptorAllocator;
use blackhole_rhi::device::Device;
use blackhole_rhi::image::AllocatedImage;
use blackhole_rhi::sampler::Sampler;
use blackhole_scene::{
    Bounds, DrawContext, MaterialInstance, NodeKind, RenderObject, Renderable, SceneGraph,
};

use crate::defaults::DefaultResources;
use crate::gpu_types::MaterialConstants;
use crate::material::{MaterialResources, MetallicRoughness};
use crate::upload::{GpuMeshBuffers, UploadContext};

/// Pool ratios for scene material sets.
pub const SCENE_POOL_RATIOS: [PoolSizeRatio; 3] = [
    PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::STORAGE_BUFFER, 1.0),
];

/// A range of a mesh's index buffer drawn with one material.
pub struct GeoSurface {
    pub start_index: u32,
    pub count: u32,
    pub bounds: Bounds,
    pub material: Arc<MaterialInstance>,
}

pub struct MeshAsset {
    pub name: String,
    pub surfaces: Vec<GeoSurface>,
    pub buffers: GpuMeshBuffers,
}

impl MeshAsset {
    pub fn triangle_count(&self) -> u32 {
        self.surfaces.iter().map(|s| s.count / 3).sum()
    }
}

impl Renderable for MeshAsset {
    fn draw(&self, world: &Mat4, ctx: &mut DrawContext) {
        for surface in &self.surfaces {
            ctx.push(RenderObject {
                index_count: surface.count,
                first_index: surface.start_index,
                index_buffer: self.buffers.index_buffer.handle(),
                material: surface.material.clone(),
                bounds: surface.bounds,
                transform: *world,
                vertex_buffer_address: self.buffers.vertex_buffer_address,
            });
        }
    }
}

/// Views and samplers a material can be bound with.
struct TextureTable<'a> {
    images: &'a [Option<vk::ImageView>],
    samplers: &'a [vk::Sampler],
    white: vk::ImageView,
    error: vk::ImageView,
    default_sampler: vk::Sampler,
}

impl TextureTable<'_> {
    /// Resolves an optional texture reference.
    ///
    /// No reference binds white. A reference to an image that failed to
    /// load binds the error checkerboard.
    fn resolve(&self, texture: Option<blackhole_resources::TextureRef>) -> (vk::ImageView, vk::Sampler) {
        let Some(texture) = texture else {
            return (self.white, self.default_sampler);
        };
        let view = match self.images.get(texture.image) {
            Some(Some(view)) => *view,
            _ => self.error,
        };
        let sampler = self
            .samplers
            .get(texture.sampler)
            .copied()
            .unwrap_or(self.default_sampler);
        (view, sampler)
    }

    fn material_resources(
        &self,
        material: &MaterialData,
        data_buffer: vk::Buffer,
        index: usize,
    ) -> MaterialResources {
        let (color_image, color_sampler) = self.resolve(material.base_color_texture);
        let (metal_rough_image, metal_rough_sampler) = self.resolve(material.metal_rough_texture);
        MaterialResources {
            color_image,
            color_sampler,
            metal_rough_image,
            metal_rough_sampler,
            data_buffer,
            data_buffer_offset: material_offset(index),
        }
    }
}

/// Byte offset of material `index` inside the shared constant buffer.
pub fn material_offset(index: usize) -> vk::DeviceSize {
    (index * MaterialConstants::SIZE) as vk::DeviceSize
}

fn material_constants(material: &MaterialData) -> MaterialConstants {
    MaterialConstants::new(
        material.base_color_factor,
        material.metallic_factor,
        material.roughness_factor,
    )
}

/// Builds the node hierarchy. Mesh nodes get a clone of `meshes[i]`;
/// nodes pointing at a missing mesh become empty.
pub fn build_graph<M: Clone>(nodes: &[NodeData], meshes: &[M]) -> SceneGraph<M> {
    let mut graph = SceneGraph::new();

    let ids: Vec<_> = nodes
        .iter()
        .map(|node| {
            let kind = match node.mesh.and_then(|i| meshes.get(i)) {
                Some(mesh) => NodeKind::Mesh(mesh.clone()),
                None => NodeKind::Empty,
            };
            graph.add_node(node.name.clone(), node.local_transform, kind)
        })
        .collect();

    for (parent, node) in nodes.iter().enumerate() {
        for &child in &node.children {
            if let Some(&child_id) = ids.get(child) {
                graph.set_parent(child_id, ids[parent]);
            }
        }
    }

    graph.refresh_transforms(Mat4::IDENTITY);
    graph
}

pub struct LoadedScene {
    pub name: String,
    graph: SceneGraph<Arc<MeshAsset>>,
    meshes: Vec<Arc<MeshAsset>>,
    materials: Vec<Arc<MaterialInstance>>,
    descriptors: GrowableDescriptorAllocator<Arc<Device>>,
    _material_buffer: AllocatedBuffer,
    _samplers: Vec<Sampler>,
    _images: Vec<AllocatedImage>,
    _defaults: DefaultResources,
}

impl LoadedScene {
    /// Imports a glTF file and uploads it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be imported or any upload fails.
    pub fn load(
        upload: &UploadContext,
        pipelines: &mut MetallicRoughness,
        defaults: &DefaultResources,
        path: &Path,
    ) -> blackhole_core::Result<Self> {
        let asset = SceneAsset::load(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scene".to_owned());
        Ok(Self::from_asset(upload, pipelines, defaults, asset, name)?)
    }

    /// Uploads an imported asset.
    ///
    /// # Errors
    ///
    /// Returns the first upload or descriptor allocation error.
    pub fn from_asset(
        upload: &UploadContext,
        pipelines: &mut MetallicRoughness,
        defaults: &DefaultResources,
        asset: SceneAsset,
        name: String,
    ) -> blackhole_rhi::RhiResult<Self> {
        let device = upload.device().clone();

        let samplers = asset
            .samplers
            .iter()
            .map(|desc| Sampler::new(device.clone(), *desc))
            .collect::<Result<Vec<_>, _>>()?;

        let mut images = Vec::new();
        let mut image_views = Vec::with_capacity(asset.images.len());
        for image in &asset.images {
            let Some(image) = image else {
                image_views.push(None);
                continue;
            };
            let extent = vk::Extent2D {
                width: image.width,
                height: image.height,
            };
            match upload.create_image_with_data(
                &image.pixels,
                extent,
                vk::Format::R8G8B8A8_UNORM,
                vk::ImageUsageFlags::SAMPLED,
                true,
                &image.name,
            ) {
                Ok(uploaded) => {
                    image_views.push(Some(uploaded.view()));
                    images.push(uploaded);
                }
                Err(e) => {
                    warn!("Image '{}' not uploaded, using error texture: {}", image.name, e);
                    image_views.push(None);
                }
            }
        }

        // Every material gets a slot; one default slot covers scenes
        // without materials.
        let material_data: Vec<MaterialData> = if asset.materials.is_empty() {
            vec![MaterialData::default()]
        } else {
            asset.materials
        };

        let material_buffer = upload.create_buffer(
            material_offset(material_data.len()),
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryUsage::CpuToGpu,
            &format!("{name} materials"),
        )?;
        let constants: Vec<MaterialConstants> =
            material_data.iter().map(material_constants).collect();
        material_buffer.write(0, bytemuck::cast_slice(&constants))?;

        let mut descriptors = GrowableDescriptorAllocator::init(
            device.clone(),
            material_data.len() as u32,
            &SCENE_POOL_RATIOS,
        )?;

        let sampler_handles: Vec<vk::Sampler> = samplers.iter().map(Sampler::handle).collect();
        let table = TextureTable {
            images: &image_views,
            samplers: &sampler_handles,
            white: defaults.white.view(),
            error: defaults.error_checkerboard.view(),
            default_sampler: defaults.linear.handle(),
        };

        let materials = material_data
            .iter()
            .enumerate()
            .map(|(index, material)| {
                let resources = table.material_resources(material, material_buffer.handle(), index);
                pipelines
                    .write_material(material.pass, &resources, &mut descriptors)
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let meshes = asset
            .meshes
            .iter()
            .map(|mesh| Self::upload_mesh(upload, mesh, &materials).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        let graph = build_graph(&asset.nodes, &meshes);

        info!(
            "Scene '{}' loaded: {} meshes, {} materials, {} images, {} nodes",
            name,
            meshes.len(),
            materials.len(),
            images.len(),
            graph.len()
        );

        Ok(Self {
            name,
            graph,
            meshes,
            materials,
            descriptors,
            _material_buffer: material_buffer,
            _samplers: samplers,
            _images: images,
            _defaults: defaults.clone(),
        })
    }

    fn upload_mesh(
        upload: &UploadContext,
        mesh: &MeshData,
        materials: &[Arc<MaterialInstance>],
    ) -> blackhole_rhi::RhiResult<MeshAsset> {
        let buffers = upload.upload_mesh(&mesh.indices, &mesh.vertices, &mesh.name)?;

        let surfaces = mesh
            .surfaces
            .iter()
            .map(|surface| GeoSurface {
                start_index: surface.start_index,
                count: surface.count,
                bounds: surface.bounds,
                material: materials[surface.material.unwrap_or(0).min(materials.len() - 1)]
                    .clone(),
            })
            .collect();

        debug!("Mesh '{}' uploaded", mesh.name);

        Ok(MeshAsset {
            name: mesh.name.clone(),
            surfaces,
            buffers,
        })
    }

    /// Emits every surface reachable from the roots with `top × world`.
    pub fn draw(&self, top_matrix: &Mat4, ctx: &mut DrawContext) {
        self.graph.draw(top_matrix, ctx);
    }

    pub fn graph(&self) -> &SceneGraph<Arc<MeshAsset>> {
        &self.graph
    }

    pub fn meshes(&self) -> &[Arc<MeshAsset>] {
        &self.meshes
    }

    pub fn materials(&self) -> &[Arc<MaterialInstance>] {
        &self.materials
    }

    pub fn material_pools(&self) -> usize {
        self.descriptors.ready_pools().len() + self.descriptors.full_pools().len()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use ash::vk::Handle;
    use blackhole_resources::TextureRef;
    use glam::{Vec3, Vec4};

    use super::*;

    fn node(name: &str, mesh: Option<usize>, x: f32, children: Vec<usize>) -> NodeData {
        NodeData {
            name: name.to_owned(),
            mesh,
            local_transform: Mat4::from_translation(Vec3::new(x, 0.0, 0.0)),
            children,
        }
    }

    fn table<'a>(images: &'a [Option<vk::ImageView>], samplers: &'a [vk::Sampler]) -> TextureTable<'a> {
        TextureTable {
            images,
            samplers,
            white: vk::ImageView::from_raw(100),
            error: vk::ImageView::from_raw(666),
            default_sampler: vk::Sampler::from_raw(200),
        }
    }

    #[test]
    fn test_build_graph_links_children() {
        let nodes = vec![
            node("root", Some(0), 1.0, vec![1]),
            node("child", Some(1), 2.0, vec![]),
            node("lonely", Some(7), 0.0, vec![9]),
        ];
        let graph = build_graph(&nodes, &["a", "b"]);

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.roots().count(), 2);

        let child = graph.find("child").unwrap();
        let node = graph.node(child).unwrap();
        assert!(matches!(node.kind, NodeKind::Mesh("b")));
        assert_relative_eq!(node.world_transform.transform_point3(Vec3::ZERO).x, 3.0);

        let lonely = graph.find("lonely").unwrap();
        assert!(matches!(graph.node(lonely).unwrap().kind, NodeKind::Empty));
    }

    #[test]
    fn test_resolve_texture_fallbacks() {
        let images = [Some(vk::ImageView::from_raw(1)), None];
        let samplers = [vk::Sampler::from_raw(2)];
        let table = table(&images, &samplers);

        let (view, sampler) = table.resolve(None);
        assert_eq!((view.as_raw(), sampler.as_raw()), (100, 200));

        let (view, sampler) = table.resolve(Some(TextureRef { image: 0, sampler: 0 }));
        assert_eq!((view.as_raw(), sampler.as_raw()), (1, 2));

        let (view, _) = table.resolve(Some(TextureRef { image: 1, sampler: 0 }));
        assert_eq!(view.as_raw(), 666, "failed image uses the error texture");

        let (view, sampler) = table.resolve(Some(TextureRef { image: 5, sampler: 3 }));
        assert_eq!((view.as_raw(), sampler.as_raw()), (666, 200));
    }

    #[test]
    fn test_material_resources_offsets() {
        let table = table(&[], &[]);
        let material = MaterialData::default();
        let resources = table.material_resources(&material, vk::Buffer::from_raw(9), 3);
        assert_eq!(resources.data_buffer_offset, 768);
        assert_eq!(resources.color_image.as_raw(), 100);
        assert_eq!(resources.data_buffer.as_raw(), 9);
    }

    #[test]
    fn test_material_constants_from_data() {
        let material = MaterialData {
            base_color_factor: Vec4::new(0.5, 0.25, 1.0, 1.0),
            metallic_factor: 0.1,
            roughness_factor: 0.9,
            ..Default::default()
        };
        let constants = material_constants(&material);
        assert_eq!(constants.color_factors, material.base_color_factor);
        assert_relative_eq!(constants.metal_rough_factors.x, 0.1);
        assert_relative_eq!(constants.metal_rough_factors.y, 0.9);
    }
}
