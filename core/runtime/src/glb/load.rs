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

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use anyhow::{anyhow, Context};
use glam::{Mat4, Quat, Vec2, Vec3};
use gltf::{buffer::Data, material::AlphaMode, mesh::Mode, Gltf};
use kiln_schema::{
    AttributeBuffer, AttributeName, DescriptorError, GeometryGroup, TextureRole, UvTransform,
};
use tracing::{debug, warn};

use crate::{
    geometry::{Geometry, MorphTarget},
    material::{ImageSource, Material, Texture, TextureImage},
    scene::*,
};

/// Parses a GLB into `scene` under a new root group named `name`.
///
/// Returns the new root.
pub fn load_glb(bytes: &[u8], scene: &mut Scene, name: &str) -> anyhow::Result<NodeId> {
    let Gltf { document, blob } = Gltf::from_slice(bytes).context("parsing GLB")?;
    let buffers =
        gltf::import_buffers(&document, None, blob).context("resolving GLB buffers")?;

    let gltf_scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or_else(|| anyhow!("GLB has no scenes"))?;

    let joints: HashSet<usize> = document
        .skins()
        .flat_map(|skin| skin.joints().map(|joint| joint.index()).collect::<Vec<_>>())
        .collect();

    let root = scene.add(Node::group(name), None);
    let mut ids = HashMap::new();
    let mut with_mesh = Vec::new();

    // hierarchy first so skins can resolve joints anywhere in the tree
    let mut stack: Vec<_> = gltf_scene.nodes().map(|node| (node, root)).collect();
    stack.reverse();
    while let Some((node, parent)) = stack.pop() {
        let is_joint = joints.contains(&node.index());
        let kind = if is_joint && node.mesh().is_none() {
            NodeKind::Bone
        } else {
            NodeKind::Group
        };

        let name = node
            .name()
            .or_else(|| node.mesh().and_then(|mesh| mesh.name()))
            .unwrap_or_default();

        let (translation, rotation, scale) = node.transform().decomposed();
        let transform = Transform {
            translation: Vec3::from(translation),
            rotation: Quat::from_array(rotation),
            scale: Vec3::from(scale),
        };

        let id = scene.add(Node::new(name, kind).with_transform(transform), Some(parent));
        ids.insert(node.index(), id);

        let mut children: Vec<_> = node.children().map(|child| (child, id)).collect();
        children.reverse();
        stack.extend(children);

        if node.mesh().is_some() {
            with_mesh.push(node);
        }
    }

    let mut loader = Loader {
        buffers: &buffers,
        images: HashMap::new(),
        textures: Vec::new(),
        materials: HashMap::new(),
    };

    for node in with_mesh {
        let Some(mesh) = node.mesh() else {
            continue;
        };

        let id = ids[&node.index()];
        let skeleton = node
            .skin()
            .map(|skin| loader.skeleton(&skin, &ids))
            .transpose()?;

        let mut parts = Vec::new();
        for primitive in mesh.primitives() {
            if primitive.mode() != Mode::Triangles {
                warn!(
                    "skipping {:?} primitive of mesh {:?}",
                    primitive.mode(),
                    mesh.name()
                );
                continue;
            }

            let geometry = loader
                .geometry(&primitive)
                .with_context(|| format!("reading mesh {:?}", mesh.name()))?;

            parts.push((geometry, loader.material(primitive.material())));
        }

        let mut parts = parts.into_iter();
        let part = match (parts.next(), parts.len()) {
            (None, _) => {
                warn!("mesh {:?} has no triangle primitives", mesh.name());
                continue;
            }
            (Some((geometry, material)), 0) => Mesh {
                geometry: Arc::new(geometry),
                material: MaterialSlot::Single(material),
            },
            (Some(first), _) => {
                let (geometries, materials): (Vec<_>, Vec<_>) =
                    std::iter::once(first).chain(parts).unzip();
                let geometry = merge_primitives(&geometries)
                    .with_context(|| format!("merging primitives of mesh {:?}", mesh.name()))?;

                Mesh {
                    geometry: Arc::new(geometry),
                    material: MaterialSlot::Multi(materials),
                }
            }
        };

        let bind_matrix = scene.world_matrix(id);
        let kind = match skeleton {
            Some(skeleton) => NodeKind::SkinnedMesh(SkinnedMesh {
                mesh: part,
                skeleton: Skeleton {
                    bones: skeleton.bones,
                    inverse_bind_matrices: skeleton.inverse_bind_matrices.map(|ibms| {
                        // stored relative to the bind matrix
                        let unbind = bind_matrix.inverse();
                        ibms.into_iter().map(|ibm| ibm * unbind).collect()
                    }),
                },
                bind_matrix: Some(bind_matrix),
            }),
            None => NodeKind::StaticMesh(part),
        };

        if let Some(node) = scene.get_mut(id) {
            node.kind = kind;
        }
    }

    debug!(
        "loaded {name:?}: {} nodes, {} materials, {} images",
        ids.len(),
        loader.materials.len(),
        loader.images.len()
    );

    Ok(root)
}

struct Loader<'a> {
    buffers: &'a [Data],
    images: HashMap<usize, Option<Arc<TextureImage>>>,
    textures: Vec<(usize, Option<UvTransform>, Arc<Texture>)>,
    materials: HashMap<Option<usize>, Arc<Material>>,
}

impl<'a> Loader<'a> {
    fn geometry(&self, primitive: &gltf::Primitive) -> anyhow::Result<Geometry> {
        let buffers = self.buffers;
        let reader =
            primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));

        let positions: Vec<f32> = reader
            .read_positions()
            .ok_or_else(|| anyhow!("primitive has no positions"))?
            .flatten()
            .collect();

        let mut geometry = Geometry::default();
        geometry
            .attributes
            .insert(AttributeName::Position, AttributeBuffer::from_f32(3, &positions));

        let mut insert = |name, buffer: AttributeBuffer| {
            geometry.attributes.insert(name, buffer);
        };

        if let Some(normals) = reader.read_normals() {
            let normals: Vec<f32> = normals.flatten().collect();
            insert(AttributeName::Normal, AttributeBuffer::from_f32(3, &normals));
        }

        if let Some(tangents) = reader.read_tangents() {
            let tangents: Vec<f32> = tangents.flatten().collect();
            insert(AttributeName::Tangent, AttributeBuffer::from_f32(4, &tangents));
        }

        for (set, name) in [(0, AttributeName::Uv), (1, AttributeName::Uv1)] {
            if let Some(uvs) = reader.read_tex_coords(set) {
                let uvs: Vec<f32> = uvs.into_f32().flatten().collect();
                insert(name, AttributeBuffer::from_f32(2, &uvs));
            }
        }

        if let Some(colors) = reader.read_colors(0) {
            let colors: Vec<f32> = colors.into_rgba_f32().flatten().collect();
            insert(AttributeName::Color, AttributeBuffer::from_f32(4, &colors));
        }

        if let Some(joints) = reader.read_joints(0) {
            let joints: Vec<u16> = joints.into_u16().flatten().collect();
            insert(AttributeName::SkinIndex, AttributeBuffer::from_u16(4, &joints));
        }

        if let Some(weights) = reader.read_weights(0) {
            let weights: Vec<f32> = weights.into_f32().flatten().collect();
            insert(AttributeName::SkinWeight, AttributeBuffer::from_f32(4, &weights));
        }

        if let Some(indices) = reader.read_indices() {
            let indices: Vec<u32> = indices.into_u32().collect();
            geometry.index = Some(AttributeBuffer::from_u32(1, &indices));
        }

        for (positions, normals, _) in reader.read_morph_targets() {
            let positions =
                positions.map(|p| AttributeBuffer::from_f32(3, &p.flatten().collect::<Vec<_>>()));
            let normals =
                normals.map(|n| AttributeBuffer::from_f32(3, &n.flatten().collect::<Vec<_>>()));
            geometry.morph_targets.push(MorphTarget { positions, normals });
        }

        geometry.triangle_count()?;
        geometry.compute_bounding_box();
        Ok(geometry)
    }

    fn skeleton(
        &self,
        skin: &gltf::Skin,
        ids: &HashMap<usize, NodeId>,
    ) -> anyhow::Result<Skeleton> {
        let bones = skin
            .joints()
            .map(|joint| {
                ids.get(&joint.index())
                    .copied()
                    .ok_or_else(|| anyhow!("joint {} is not in the scene", joint.index()))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let buffers = self.buffers;
        let reader =
            skin.reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));

        let inverse_bind_matrices = reader
            .read_inverse_bind_matrices()
            .map(|ibms| ibms.map(|ibm| Mat4::from_cols_array_2d(&ibm)).collect::<Vec<_>>())
            .filter(|ibms| ibms.len() == bones.len());

        Ok(Skeleton {
            bones,
            inverse_bind_matrices,
        })
    }

    fn material(&mut self, material: gltf::Material) -> Arc<Material> {
        if let Some(loaded) = self.materials.get(&material.index()) {
            return loaded.clone();
        }

        let pbr = material.pbr_metallic_roughness();
        let [r, g, b, a] = pbr.base_color_factor();

        let mut loaded = Material {
            name: material.name().unwrap_or_default().to_string(),
            color: Some(Vec3::new(r, g, b)),
            metalness: Some(pbr.metallic_factor()),
            roughness: Some(pbr.roughness_factor()),
            transparent: material.alpha_mode() == AlphaMode::Blend,
            opacity: Some(a),
            double_sided: material.double_sided(),
            emissive: Some(Vec3::from(material.emissive_factor())),
            emissive_intensity: Some(1.0),
            maps: Default::default(),
        };

        if let Some(info) = pbr.base_color_texture() {
            let transform = info.texture_transform().map(uv_transform);
            if let Some(texture) = self.texture(info.texture(), transform) {
                loaded.maps.insert(TextureRole::BaseColor, texture);
            }
        }

        // one packed texture fills both slots
        if let Some(info) = pbr.metallic_roughness_texture() {
            let transform = info.texture_transform().map(uv_transform);
            if let Some(texture) = self.texture(info.texture(), transform) {
                loaded.maps.insert(TextureRole::Roughness, texture.clone());
                loaded.maps.insert(TextureRole::Metalness, texture);
            }
        }

        if let Some(normal) = material.normal_texture() {
            if let Some(texture) = self.texture(normal.texture(), None) {
                loaded.maps.insert(TextureRole::Normal, texture);
            }
        }

        if let Some(occlusion) = material.occlusion_texture() {
            if let Some(texture) = self.texture(occlusion.texture(), None) {
                loaded.maps.insert(TextureRole::AmbientOcclusion, texture);
            }
        }

        if let Some(info) = material.emissive_texture() {
            let transform = info.texture_transform().map(uv_transform);
            if let Some(texture) = self.texture(info.texture(), transform) {
                loaded.maps.insert(TextureRole::Emissive, texture);
            }
        }

        let loaded = Arc::new(loaded);
        self.materials.insert(material.index(), loaded.clone());
        loaded
    }

    fn texture(
        &mut self,
        texture: gltf::Texture,
        transform: Option<UvTransform>,
    ) -> Option<Arc<Texture>> {
        let index = texture.index();
        let cached = self.textures.iter().find(|(cached, cached_transform, _)| {
            *cached == index && *cached_transform == transform
        });

        if let Some((_, _, texture)) = cached {
            return Some(texture.clone());
        }

        let image = self.image(texture.source())?;
        let loaded = Arc::new(Texture {
            image,
            flip_y: false,
            transform,
        });

        self.textures.push((index, transform, loaded.clone()));
        Some(loaded)
    }

    fn image(&mut self, image: gltf::Image) -> Option<Arc<TextureImage>> {
        if let Some(cached) = self.images.get(&image.index()) {
            return cached.clone();
        }

        let loaded = match image.source() {
            gltf::image::Source::View { view, mime_type } => {
                let start = view.offset();
                let end = start + view.length();
                let bytes = self
                    .buffers
                    .get(view.buffer().index())
                    .and_then(|data| data.0.get(start..end));

                match bytes {
                    Some(bytes) => Some(Arc::new(TextureImage {
                        name: image.name().map(str::to_string),
                        source: ImageSource::Encoded {
                            bytes: bytes.to_vec(),
                            mime_type: Some(mime_type.to_string()),
                        },
                    })),
                    None => {
                        warn!("image {} points outside its buffer", image.index());
                        None
                    }
                }
            }
            gltf::image::Source::Uri { uri, .. } => {
                warn!("skipping image with URI {uri:?}; only embedded images are supported");
                None
            }
        };

        self.images.insert(image.index(), loaded.clone());
        loaded
    }
}

/// Joins the primitives of one glTF mesh into a single indexed geometry with
/// one group per primitive, in order.
///
/// Attributes and morph targets that the primitives do not all share are
/// dropped.
fn merge_primitives(parts: &[Geometry]) -> Result<Geometry, DescriptorError> {
    let mut merged = Geometry::default();
    let Some((first, rest)) = parts.split_first() else {
        return Ok(merged);
    };

    for (name, buffer) in first.attributes.iter() {
        let shared = rest.iter().all(|part| {
            part.attribute(*name).map_or(false, |other| {
                other.element == buffer.element
                    && other.item_size == buffer.item_size
                    && other.normalized == buffer.normalized
            })
        });

        if shared {
            merged.attributes.insert(*name, buffer.empty_like(0));
        } else {
            warn!("dropping {name:?}: not shared by every primitive");
        }
    }

    let morphs_match = rest.iter().all(|part| {
        part.morph_targets.len() == first.morph_targets.len()
            && part.morph_targets.iter().zip(first.morph_targets.iter()).all(|(a, b)| {
                a.positions.is_some() == b.positions.is_some()
                    && a.normals.is_some() == b.normals.is_some()
            })
    });

    if morphs_match {
        merged.morph_targets = first
            .morph_targets
            .iter()
            .map(|target| MorphTarget {
                positions: target.positions.as_ref().map(|b| b.empty_like(0)),
                normals: target.normals.as_ref().map(|b| b.empty_like(0)),
            })
            .collect();
    } else {
        warn!("dropping morph targets that differ between primitives");
    }

    let mut indices: Vec<u32> = Vec::new();
    for (material_index, part) in parts.iter().enumerate() {
        let base = merged.vertex_count() as u32;
        let start = indices.len() as u32;
        for triangle in 0..part.triangle_count()? {
            indices.extend(part.triangle(triangle)?.map(|vertex| base + vertex as u32));
        }

        merged.groups.push(GeometryGroup {
            start,
            count: indices.len() as u32 - start,
            material_index: material_index as u32,
        });

        for (name, buffer) in merged.attributes.iter_mut() {
            if let Some(source) = part.attribute(*name) {
                buffer.data.extend_from_slice(&source.data);
            }
        }

        for (target, source) in merged.morph_targets.iter_mut().zip(part.morph_targets.iter()) {
            append(&mut target.positions, &source.positions);
            append(&mut target.normals, &source.normals);
        }
    }

    merged.index = Some(AttributeBuffer::from_u32(1, &indices));
    merged.compute_bounding_box();
    Ok(merged)
}

fn append(into: &mut Option<AttributeBuffer>, from: &Option<AttributeBuffer>) {
    if let (Some(into), Some(from)) = (into, from) {
        into.data.extend_from_slice(&from.data);
    }
}

fn uv_transform(transform: gltf::texture::TextureTransform) -> UvTransform {
    UvTransform {
        offset: Vec2::from(transform.offset()),
        repeat: Vec2::from(transform.scale()),
        rotation: transform.rotation(),
        center: Vec2::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_merge_into_groups() {
        let quad = Geometry::from_positions(&[Vec3::ZERO, Vec3::X, Vec3::ONE, Vec3::Y])
            .with_attribute(AttributeName::Uv, AttributeBuffer::from_f32(2, &[0.0; 8]))
            .with_index(&[0, 1, 2, 0, 2, 3]);
        let triangle = Geometry::from_positions(&[Vec3::Z, Vec3::X, Vec3::Y]);

        let merged = merge_primitives(&[quad, triangle]).unwrap();
        assert_eq!(merged.vertex_count(), 7);
        assert_eq!(merged.triangle_count().unwrap(), 3);
        assert!(merged.attribute(AttributeName::Uv).is_none());
        assert_eq!(merged.triangle(2).unwrap(), [4, 5, 6]);
        assert_eq!(merged.position().unwrap().read_vec3(4), Vec3::Z);

        let spans: Vec<_> = merged
            .groups
            .iter()
            .map(|group| (group.start, group.count, group.material_index))
            .collect();
        assert_eq!(spans, [(0, 6, 0), (6, 3, 1)]);
    }
}
