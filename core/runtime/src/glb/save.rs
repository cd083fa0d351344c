// Copyright (c) 2024 the Kiln contributors.
// SPDX-License-Identifier: AGPL-3.0-or-later
//
// This file is part of Kiln.
//
// Kiln is free software: you can redistribute it and/or modify it under the
// terms of the GNU Affero General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Kiln is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with Kiln. If not, see <https://www.gnu.org/licenses/>.

use std::{borrow::Cow, collections::BTreeMap, collections::HashMap, io::Cursor, sync::Arc};

use anyhow::{anyhow, bail, Context};
use glam::{Mat2, Mat4, Vec2};
use gltf::json::{self, validation::Checked::Valid, validation::USize64};
use kiln_schema::{
    AttributeBuffer, AttributeName, ElementType, GeometryGroup, TextureRole, UvTransform,
};
use tracing::debug;

use crate::{
    geometry::Geometry,
    material::{ImageSource, Material, Texture, TextureImage},
    scene::*,
};

/// Serializes the subtrees under `roots` into a GLB.
///
/// Helper nodes and everything below them are left out. Every bone used by an
/// exported skinned mesh must be inside one of the subtrees.
pub fn save_glb(scene: &Scene, roots: &[NodeId], generator: &str) -> anyhow::Result<Vec<u8>> {
    let mut writer = Writer {
        scene,
        root: json::Root::default(),
        bin: Vec::new(),
        nodes: HashMap::new(),
        materials: HashMap::new(),
        textures: HashMap::new(),
        images: HashMap::new(),
        sampler: None,
        skins: Vec::new(),
        pending_skins: Vec::new(),
        texture_transforms: false,
    };

    writer.root.asset = json::Asset {
        version: "2.0".to_string(),
        generator: Some(generator.to_string()),
        ..Default::default()
    };

    let mut scene_nodes = Vec::new();
    for root in roots {
        if let Some(index) = writer.node(*root)? {
            scene_nodes.push(index);
        }
    }

    for (node, skinned) in std::mem::take(&mut writer.pending_skins) {
        let skin = writer.skin(skinned)?;
        writer.root.nodes[node.value()].skin = Some(skin);
    }

    writer.finish(scene_nodes)
}

struct Writer<'a> {
    scene: &'a Scene,
    root: json::Root,
    bin: Vec<u8>,
    nodes: HashMap<NodeId, json::Index<json::Node>>,
    materials: HashMap<usize, json::Index<json::Material>>,
    textures: HashMap<usize, json::Index<json::Texture>>,
    images: HashMap<(usize, bool), json::Index<json::Image>>,
    sampler: Option<json::Index<json::texture::Sampler>>,
    skins: Vec<(Vec<usize>, Vec<Mat4>, json::Index<json::Skin>)>,
    pending_skins: Vec<(json::Index<json::Node>, &'a SkinnedMesh)>,
    texture_transforms: bool,
}

impl<'a> Writer<'a> {
    fn node(&mut self, id: NodeId) -> anyhow::Result<Option<json::Index<json::Node>>> {
        let scene = self.scene;
        let node = scene
            .get(id)
            .ok_or_else(|| anyhow!("node {id:?} is not in the scene"))?;

        let mesh = match &node.kind {
            NodeKind::Other(_) => return Ok(None),
            NodeKind::Group | NodeKind::Bone => None,
            NodeKind::StaticMesh(mesh) => Some(self.mesh(&node.name, mesh)?),
            NodeKind::SkinnedMesh(skinned) => Some(self.mesh(&node.name, &skinned.mesh)?),
        };

        let transform = node.transform;
        let index = self.root.push(json::Node {
            name: (!node.name.is_empty()).then(|| node.name.clone()),
            mesh,
            translation: Some(transform.translation.to_array()),
            rotation: Some(json::scene::UnitQuaternion(transform.rotation.to_array())),
            scale: Some(transform.scale.to_array()),
            ..Default::default()
        });

        self.nodes.insert(id, index);
        if let NodeKind::SkinnedMesh(skinned) = &node.kind {
            self.pending_skins.push((index, skinned));
        }

        let mut children = Vec::new();
        for child in node.children() {
            if let Some(child) = self.node(*child)? {
                children.push(child);
            }
        }

        if !children.is_empty() {
            self.root.nodes[index.value()].children = Some(children);
        }

        Ok(Some(index))
    }

    fn mesh(&mut self, name: &str, mesh: &Mesh) -> anyhow::Result<json::Index<json::Mesh>> {
        let geometry = &mesh.geometry;
        geometry.triangle_count()?;

        let mut attributes = BTreeMap::new();
        for (name, buffer) in geometry.attributes.iter() {
            let (semantic, buffer) = vertex_attribute(*name, buffer);
            let accessor = self.attribute_accessor(*name, &buffer)?;
            attributes.insert(Valid(semantic), accessor);
        }

        let materials: Vec<_> = mesh.material.iter().cloned().collect();
        let mut primitives = Vec::new();
        if geometry.groups.is_empty() || materials.len() < 2 {
            let indices = match &geometry.index {
                Some(index) => Some(self.index_accessor(index.element, index.data.clone())?),
                None => None,
            };

            let material = match materials.first() {
                Some(material) => Some(self.material(material)?),
                None => None,
            };

            primitives.push(primitive(attributes, indices, material));
        } else {
            let stream = match &geometry.index {
                Some(index) => index.count(),
                None => geometry.vertex_count(),
            };

            // triangles outside every group go out with the first material
            let mut spans: Vec<_> = geometry
                .groups
                .iter()
                .map(|group| (group.start, group.count, group.material_index))
                .collect();

            let uncovered = uncovered_spans(&geometry.groups, stream);
            if !uncovered.is_empty() {
                debug!("mesh {name:?} has {} ungrouped span(s)", uncovered.len());
            }

            spans.extend(uncovered.into_iter().map(|(start, count)| (start, count, 0)));
            spans.sort_by_key(|(start, _, _)| *start);

            for (start, count, material_index) in spans {
                let (element, data) = group_indices(geometry, start, count)?;
                let indices = self.index_accessor(element, data)?;
                let material = match materials.get(material_index as usize) {
                    Some(material) => Some(self.material(material)?),
                    None => None,
                };

                primitives.push(primitive(attributes.clone(), Some(indices), material));
            }
        }

        Ok(self.root.push(json::Mesh {
            name: (!name.is_empty()).then(|| name.to_string()),
            primitives,
            weights: None,
            extensions: Default::default(),
            extras: Default::default(),
        }))
    }

    fn skin(&mut self, skinned: &SkinnedMesh) -> anyhow::Result<json::Index<json::Skin>> {
        let scene = self.scene;
        let bones = &skinned.skeleton.bones;

        let joints = bones
            .iter()
            .map(|bone| {
                self.nodes.get(bone).copied().ok_or_else(|| {
                    let name = scene.get(*bone).map(|node| node.name.as_str());
                    anyhow!("bone {name:?} is outside the exported subtrees")
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let bind = skinned.bind_matrix.unwrap_or(Mat4::IDENTITY);
        let inverse_binds: Vec<Mat4> = match &skinned.skeleton.inverse_bind_matrices {
            Some(ibms) if ibms.len() == bones.len() => ibms.iter().map(|ibm| *ibm * bind).collect(),
            _ => bones
                .iter()
                .map(|bone| scene.world_matrix(*bone).inverse() * bind)
                .collect(),
        };

        let key: Vec<usize> = joints.iter().map(|joint| joint.value()).collect();
        let shared = self
            .skins
            .iter()
            .find(|(other, other_binds, _)| *other == key && *other_binds == inverse_binds);

        if let Some((_, _, skin)) = shared {
            return Ok(*skin);
        }

        let data: Vec<u8> = inverse_binds
            .iter()
            .flat_map(|ibm| ibm.to_cols_array())
            .flat_map(f32::to_le_bytes)
            .collect();

        let view = self.push_view(&data, None);
        let accessor = self.root.push(json::Accessor {
            buffer_view: Some(view),
            byte_offset: Some(USize64(0)),
            count: USize64::from(inverse_binds.len()),
            component_type: Valid(json::accessor::GenericComponentType(
                json::accessor::ComponentType::F32,
            )),
            type_: Valid(json::accessor::Type::Mat4),
            min: None,
            max: None,
            name: None,
            normalized: false,
            sparse: None,
            extensions: Default::default(),
            extras: Default::default(),
        });

        let skin = self.root.push(json::Skin {
            inverse_bind_matrices: Some(accessor),
            joints,
            name: None,
            skeleton: None,
            extensions: Default::default(),
            extras: Default::default(),
        });

        self.skins.push((key, inverse_binds, skin));
        Ok(skin)
    }

    fn material(
        &mut self,
        material: &Arc<Material>,
    ) -> anyhow::Result<json::Index<json::Material>> {
        let key = Arc::as_ptr(material) as usize;
        if let Some(index) = self.materials.get(&key) {
            return Ok(*index);
        }

        let color = material.color.unwrap_or(Material::FALLBACK_COLOR);
        let opacity = material.opacity.unwrap_or(Material::FALLBACK_OPACITY);
        let emissive = material.emissive.unwrap_or(Material::FALLBACK_EMISSIVE)
            * material
                .emissive_intensity
                .unwrap_or(Material::FALLBACK_EMISSIVE_INTENSITY);

        let mut maps = HashMap::new();
        for (role, texture) in material.maps.iter() {
            maps.insert(*role, self.texture_info(texture)?);
        }

        // glTF packs roughness and metalness into one texture
        let metallic_roughness = maps
            .get(&TextureRole::Roughness)
            .or_else(|| maps.get(&TextureRole::Metalness))
            .cloned();

        let normal_texture = maps
            .get(&TextureRole::Normal)
            .map(|info| json::material::NormalTexture {
                index: info.index,
                scale: 1.0,
                tex_coord: 0,
                extensions: Default::default(),
                extras: Default::default(),
            });

        let occlusion_texture =
            maps.get(&TextureRole::AmbientOcclusion)
                .map(|info| json::material::OcclusionTexture {
                    index: info.index,
                    strength: json::material::StrengthFactor(1.0),
                    tex_coord: 0,
                    extensions: Default::default(),
                    extras: Default::default(),
                });

        let index = self.root.push(json::Material {
            name: Some(material.name.clone()),
            alpha_mode: Valid(if material.transparent {
                json::material::AlphaMode::Blend
            } else {
                json::material::AlphaMode::Opaque
            }),
            double_sided: material.double_sided,
            pbr_metallic_roughness: json::material::PbrMetallicRoughness {
                base_color_factor: json::material::PbrBaseColorFactor([
                    color.x, color.y, color.z, opacity,
                ]),
                base_color_texture: maps.remove(&TextureRole::BaseColor),
                metallic_factor: json::material::StrengthFactor(
                    material.metalness.unwrap_or(Material::FALLBACK_METALNESS),
                ),
                roughness_factor: json::material::StrengthFactor(
                    material.roughness.unwrap_or(Material::FALLBACK_ROUGHNESS),
                ),
                metallic_roughness_texture: metallic_roughness,
                ..Default::default()
            },
            normal_texture,
            occlusion_texture,
            emissive_texture: maps.remove(&TextureRole::Emissive),
            emissive_factor: json::material::EmissiveFactor(
                emissive.clamp(glam::Vec3::ZERO, glam::Vec3::ONE).to_array(),
            ),
            ..Default::default()
        });

        self.materials.insert(key, index);
        Ok(index)
    }

    fn texture_info(&mut self, texture: &Arc<Texture>) -> anyhow::Result<json::texture::Info> {
        let key = Arc::as_ptr(texture) as usize;
        let index = match self.textures.get(&key) {
            Some(index) => *index,
            None => {
                let source = self.image(&texture.image, texture.flip_y)?;
                let sampler = self.sampler();
                let index = self.root.push(json::Texture {
                    source,
                    sampler: Some(sampler),
                    name: None,
                    extensions: Default::default(),
                    extras: Default::default(),
                });

                self.textures.insert(key, index);
                index
            }
        };

        let extensions = texture.transform.map(|transform| {
            self.texture_transforms = true;
            json::extensions::texture::Info {
                texture_transform: Some(khr_texture_transform(&transform)),
                ..Default::default()
            }
        });

        Ok(json::texture::Info {
            index,
            tex_coord: 0,
            extensions,
            extras: Default::default(),
        })
    }

    fn image(
        &mut self,
        image: &Arc<TextureImage>,
        flip_y: bool,
    ) -> anyhow::Result<json::Index<json::Image>> {
        let key = (Arc::as_ptr(image) as usize, flip_y);
        if let Some(index) = self.images.get(&key) {
            return Ok(*index);
        }

        let (bytes, mime_type) = match &image.source {
            ImageSource::Encoded { bytes, mime_type }
                if !flip_y && is_embeddable(mime_type.as_deref()) =>
            {
                let mime_type = mime_type.clone().unwrap_or_default();
                (Cow::Borrowed(bytes.as_slice()), mime_type)
            }
            source => (Cow::Owned(encode_png(source, flip_y)?), "image/png".to_string()),
        };

        let view = self.push_view(&bytes, None);
        let index = self.root.push(json::Image {
            buffer_view: Some(view),
            mime_type: Some(json::image::MimeType(mime_type)),
            uri: None,
            name: image.name.clone(),
            extensions: Default::default(),
            extras: Default::default(),
        });

        self.images.insert(key, index);
        Ok(index)
    }

    fn sampler(&mut self) -> json::Index<json::texture::Sampler> {
        if let Some(sampler) = self.sampler {
            return sampler;
        }

        let sampler = self.root.push(json::texture::Sampler {
            mag_filter: Some(Valid(json::texture::MagFilter::Linear)),
            min_filter: Some(Valid(json::texture::MinFilter::LinearMipmapLinear)),
            wrap_s: Valid(json::texture::WrappingMode::Repeat),
            wrap_t: Valid(json::texture::WrappingMode::Repeat),
            name: None,
            extensions: Default::default(),
            extras: Default::default(),
        });

        self.sampler = Some(sampler);
        sampler
    }

    fn attribute_accessor(
        &mut self,
        name: AttributeName,
        buffer: &AttributeBuffer,
    ) -> anyhow::Result<json::Index<json::Accessor>> {
        let type_ = match buffer.item_size {
            1 => json::accessor::Type::Scalar,
            2 => json::accessor::Type::Vec2,
            3 => json::accessor::Type::Vec3,
            4 => json::accessor::Type::Vec4,
            other => bail!("{name:?} has unsupported item size {other}"),
        };

        let (min, max) = match (name, buffer.bounds()) {
            (AttributeName::Position, Some((min, max))) => (
                Some(json::Value::from(min.to_array().to_vec())),
                Some(json::Value::from(max.to_array().to_vec())),
            ),
            _ => (None, None),
        };

        let view = self.push_view(&buffer.data, Some(json::buffer::Target::ArrayBuffer));
        Ok(self.root.push(json::Accessor {
            buffer_view: Some(view),
            byte_offset: Some(USize64(0)),
            count: USize64::from(buffer.count()),
            component_type: Valid(json::accessor::GenericComponentType(component_type(
                buffer.element,
            ))),
            type_: Valid(type_),
            min,
            max,
            name: None,
            normalized: buffer.normalized,
            sparse: None,
            extensions: Default::default(),
            extras: Default::default(),
        }))
    }

    fn index_accessor(
        &mut self,
        element: ElementType,
        data: Vec<u8>,
    ) -> anyhow::Result<json::Index<json::Accessor>> {
        if !matches!(element, ElementType::U8 | ElementType::U16 | ElementType::U32) {
            bail!("index buffers cannot use {element:?} elements");
        }

        let view = self.push_view(&data, Some(json::buffer::Target::ElementArrayBuffer));
        Ok(self.root.push(json::Accessor {
            buffer_view: Some(view),
            byte_offset: Some(USize64(0)),
            count: USize64::from(data.len() / element.size()),
            component_type: Valid(json::accessor::GenericComponentType(component_type(
                element,
            ))),
            type_: Valid(json::accessor::Type::Scalar),
            min: None,
            max: None,
            name: None,
            normalized: false,
            sparse: None,
            extensions: Default::default(),
            extras: Default::default(),
        }))
    }

    fn push_view(
        &mut self,
        bytes: &[u8],
        target: Option<json::buffer::Target>,
    ) -> json::Index<json::buffer::View> {
        let byte_offset = self.bin.len();
        self.bin.extend_from_slice(bytes);
        pad_to_4(&mut self.bin);

        self.root.push(json::buffer::View {
            buffer: json::Index::new(0),
            byte_length: USize64::from(bytes.len()),
            byte_offset: Some(USize64::from(byte_offset)),
            byte_stride: None,
            target: target.map(Valid),
            name: None,
            extensions: Default::default(),
            extras: Default::default(),
        })
    }

    fn finish(mut self, scene_nodes: Vec<json::Index<json::Node>>) -> anyhow::Result<Vec<u8>> {
        if !self.bin.is_empty() {
            self.root.push(json::Buffer {
                byte_length: USize64::from(self.bin.len()),
                uri: None,
                name: None,
                extensions: Default::default(),
                extras: Default::default(),
            });
        }

        let scene = self.root.push(json::Scene {
            nodes: scene_nodes,
            name: None,
            extensions: Default::default(),
            extras: Default::default(),
        });
        self.root.scene = Some(scene);

        if self.texture_transforms {
            self.root
                .extensions_used
                .push("KHR_texture_transform".to_string());
        }

        debug!(
            nodes = self.root.nodes.len(),
            meshes = self.root.meshes.len(),
            images = self.root.images.len(),
            bytes = self.bin.len(),
            "writing GLB"
        );

        let json = json::serialize::to_string(&self.root).context("serializing glTF JSON")?;
        let glb = gltf::binary::Glb {
            header: gltf::binary::Header {
                magic: *b"glTF",
                version: 2,
                // computed by the writer
                length: 0,
            },
            json: Cow::Owned(json.into_bytes()),
            bin: (!self.bin.is_empty()).then_some(Cow::Owned(self.bin)),
        };

        let mut out = Vec::new();
        glb.to_writer(&mut out)
            .map_err(|err| anyhow!("writing GLB: {err}"))?;

        Ok(out)
    }
}

type PrimitiveAttributes =
    BTreeMap<json::validation::Checked<json::mesh::Semantic>, json::Index<json::Accessor>>;

fn primitive(
    attributes: PrimitiveAttributes,
    indices: Option<json::Index<json::Accessor>>,
    material: Option<json::Index<json::Material>>,
) -> json::mesh::Primitive {
    json::mesh::Primitive {
        attributes,
        indices,
        material,
        mode: Valid(json::mesh::Mode::Triangles),
        targets: None,
        extensions: Default::default(),
        extras: Default::default(),
    }
}

/// Maps a Kiln attribute to its glTF semantic, converting the buffer where
/// glTF restricts the component type.
fn vertex_attribute(
    name: AttributeName,
    buffer: &AttributeBuffer,
) -> (json::mesh::Semantic, Cow<'_, AttributeBuffer>) {
    use json::mesh::Semantic;

    let floats = || {
        if buffer.element == ElementType::F32 {
            return Cow::Borrowed(buffer);
        }

        let values: Vec<f32> = (0..buffer.count())
            .flat_map(|i| (0..buffer.item_size).map(move |c| buffer.read_f32(i, c)))
            .collect();

        Cow::Owned(AttributeBuffer::from_f32(buffer.item_size, &values))
    };

    match name {
        AttributeName::Position => (Semantic::Positions, floats()),
        AttributeName::Normal => (Semantic::Normals, floats()),
        AttributeName::Tangent => (Semantic::Tangents, floats()),
        AttributeName::Uv => (Semantic::TexCoords(0), Cow::Borrowed(buffer)),
        AttributeName::Uv1 => (Semantic::TexCoords(1), Cow::Borrowed(buffer)),
        AttributeName::Color => (Semantic::Colors(0), Cow::Borrowed(buffer)),
        AttributeName::SkinWeight => (Semantic::Weights(0), Cow::Borrowed(buffer)),
        AttributeName::SkinIndex => {
            if matches!(buffer.element, ElementType::U8 | ElementType::U16) {
                return (Semantic::Joints(0), Cow::Borrowed(buffer));
            }

            let joints: Vec<u16> = (0..buffer.count())
                .flat_map(|i| (0..buffer.item_size).map(move |c| buffer.read_f32(i, c) as u16))
                .collect();

            (
                Semantic::Joints(0),
                Cow::Owned(AttributeBuffer::from_u16(buffer.item_size, &joints)),
            )
        }
    }
}

/// Extracts the index data of one group. Non-indexed geometry gets a
/// sequential range.
/// The `(start, count)` ranges of a `len`-long stream that no group covers.
fn uncovered_spans(groups: &[GeometryGroup], len: usize) -> Vec<(u32, u32)> {
    let mut covered: Vec<_> = groups
        .iter()
        .map(|group| (group.start as usize, group.start as usize + group.count as usize))
        .collect();
    covered.sort_unstable();

    let mut spans = Vec::new();
    let mut cursor = 0;
    for (start, end) in covered {
        if start > cursor {
            spans.push((cursor as u32, (start.min(len) - cursor) as u32));
        }

        cursor = cursor.max(end);
        if cursor >= len {
            return spans;
        }
    }

    if cursor < len {
        spans.push((cursor as u32, (len - cursor) as u32));
    }

    spans
}

fn group_indices(
    geometry: &Geometry,
    start: u32,
    count: u32,
) -> anyhow::Result<(ElementType, Vec<u8>)> {
    let range = start as usize..start as usize + count as usize;
    match &geometry.index {
        Some(index) => {
            if range.end > index.count() {
                bail!("group {range:?} exceeds {} indices", index.count());
            }

            Ok((index.element, index.items(range).to_vec()))
        }
        None => {
            if range.end > geometry.vertex_count() {
                bail!("group {range:?} exceeds {} vertices", geometry.vertex_count());
            }

            let data = range.flat_map(|i| (i as u32).to_le_bytes()).collect();
            Ok((ElementType::U32, data))
        }
    }
}

fn component_type(element: ElementType) -> json::accessor::ComponentType {
    use json::accessor::ComponentType;
    match element {
        ElementType::I8 => ComponentType::I8,
        ElementType::U8 => ComponentType::U8,
        ElementType::I16 => ComponentType::I16,
        ElementType::U16 => ComponentType::U16,
        ElementType::U32 => ComponentType::U32,
        ElementType::F32 => ComponentType::F32,
    }
}

/// Converts a centered transform to the uncentered form glTF expects.
fn khr_texture_transform(transform: &UvTransform) -> json::extensions::texture::TextureTransform {
    use json::extensions::texture::*;

    let (sin, cos) = transform.rotation.sin_cos();
    let linear = Mat2::from_cols(
        Vec2::new(transform.repeat.x * cos, -transform.repeat.y * sin),
        Vec2::new(transform.repeat.x * sin, transform.repeat.y * cos),
    );
    let offset = transform.offset + transform.center - linear * transform.center;

    TextureTransform {
        offset: TextureTransformOffset(offset.to_array()),
        rotation: TextureTransformRotation(transform.rotation),
        scale: TextureTransformScale(transform.repeat.to_array()),
        tex_coord: None,
        extras: Default::default(),
    }
}

fn is_embeddable(mime_type: Option<&str>) -> bool {
    matches!(mime_type, Some("image/png" | "image/jpeg"))
}

fn encode_png(source: &ImageSource, flip_y: bool) -> anyhow::Result<Vec<u8>> {
    let mut rgba = match source {
        ImageSource::Encoded { bytes, .. } => image::load_from_memory(bytes)
            .context("decoding embedded image")?
            .into_rgba8(),
        ImageSource::Pixels(bitmap) => {
            image::RgbaImage::from_raw(bitmap.width, bitmap.height, bitmap.rgba.clone())
                .ok_or_else(|| {
                    anyhow!(
                        "bitmap size does not match its {}x{} dimensions",
                        bitmap.width,
                        bitmap.height
                    )
                })?
        }
    };

    if flip_y {
        image::imageops::flip_vertical_in_place(&mut rgba);
    }

    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(rgba)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .context("encoding PNG")?;

    Ok(out)
}

fn pad_to_4(data: &mut Vec<u8>) {
    while data.len() % 4 != 0 {
        data.push(0);
    }
}
