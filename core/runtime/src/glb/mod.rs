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

//! Binary glTF (GLB) reading and writing.
//!
//! Only triangle-list primitives are supported. Images must be embedded in the
//! binary chunk; external or data URIs are skipped.

mod load;
mod save;

pub use load::load_glb;
pub use save::save_glb;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::{Mat4, Quat, Vec2, Vec3};
    use kiln_schema::{
        AttributeBuffer, AttributeName, Bitmap, GeometryGroup, TextureRole, UvTransform,
    };

    use super::*;
    use crate::{
        geometry::Geometry,
        material::{ImageSource, Material, Texture, TextureImage},
        scene::*,
    };

    fn bitmap() -> Bitmap {
        Bitmap {
            width: 2,
            height: 2,
            rgba: vec![
                255, 0, 0, 255, 0, 255, 0, 255, //
                0, 0, 255, 255, 255, 255, 255, 255,
            ],
        }
    }

    fn static_scene() -> (Scene, NodeId) {
        let mut scene = Scene::new();
        let root = scene.add(Node::group("asset"), None);

        let image = Arc::new(TextureImage {
            name: Some("checker".into()),
            source: ImageSource::Pixels(bitmap()),
        });

        let texture = Arc::new(Texture {
            image,
            flip_y: false,
            transform: Some(UvTransform {
                repeat: Vec2::splat(2.0),
                ..Default::default()
            }),
        });

        let red = Arc::new(Material {
            color: Some(Vec3::new(1.0, 0.0, 0.0)),
            ..Material::named("red").with_map(TextureRole::BaseColor, texture)
        });

        let blue = Arc::new(Material {
            color: Some(Vec3::new(0.0, 0.0, 1.0)),
            roughness: Some(0.3),
            ..Material::named("blue")
        });

        let mut geometry = Geometry::cuboid(Vec3::ZERO, Vec3::ONE).with_groups(vec![
            GeometryGroup {
                start: 0,
                count: 18,
                material_index: 0,
            },
            GeometryGroup {
                start: 18,
                count: 18,
                material_index: 1,
            },
        ]);
        geometry.compute_vertex_normals().unwrap();

        scene.add(
            Node::new(
                "crate",
                NodeKind::StaticMesh(Mesh {
                    geometry: Arc::new(geometry),
                    material: MaterialSlot::Multi(vec![red, blue.clone()]),
                }),
            )
            .with_transform(Transform::from_translation(Vec3::new(0.0, 2.0, 0.0))),
            Some(root),
        );

        scene.add(
            Node::new(
                "single",
                NodeKind::StaticMesh(Mesh {
                    geometry: Arc::new(Geometry::cuboid(Vec3::ZERO, Vec3::ONE)),
                    material: MaterialSlot::Single(blue),
                }),
            ),
            Some(root),
        );

        (scene, root)
    }

    fn meshes(scene: &Scene, root: NodeId) -> Vec<NodeId> {
        scene
            .traverse(root)
            .into_iter()
            .filter(|id| scene.get(*id).unwrap().kind.is_mesh())
            .collect()
    }

    #[test]
    fn multi_material_round_trip() {
        let (scene, root) = static_scene();
        let glb = save_glb(&scene, &[root], "kiln").unwrap();

        let mut loaded = Scene::new();
        let root = load_glb(&glb, &mut loaded, "crate.glb").unwrap();
        assert_eq!(meshes(&loaded, root).len(), 2);

        let crate_node = loaded.find_by_name(root, "crate").unwrap();
        let world = loaded.world_matrix(crate_node);
        assert_eq!(world.transform_point3(Vec3::ZERO), Vec3::new(0.0, 2.0, 0.0));

        let mesh = loaded.get(crate_node).unwrap().kind.as_mesh().unwrap();
        assert_eq!(mesh.geometry.triangle_count().unwrap(), 12);
        assert_eq!(
            mesh.geometry.groups,
            vec![
                GeometryGroup {
                    start: 0,
                    count: 18,
                    material_index: 0,
                },
                GeometryGroup {
                    start: 18,
                    count: 18,
                    material_index: 1,
                },
            ]
        );

        let MaterialSlot::Multi(materials) = &mesh.material else {
            panic!("expected one material per group");
        };

        let names: Vec<_> = materials.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["red", "blue"]);

        let texture = materials[0].maps.get(&TextureRole::BaseColor).unwrap();
        assert_eq!(texture.transform.unwrap().repeat, Vec2::splat(2.0));
        assert!(matches!(texture.image.source, ImageSource::Encoded { .. }));
        assert!(materials[1].maps.is_empty());

        let single = loaded.find_by_name(root, "single").unwrap();
        let single = loaded.get(single).unwrap().kind.as_mesh().unwrap();
        assert!(matches!(single.material, MaterialSlot::Single(_)));
        assert!(single.geometry.groups.is_empty());
    }

    #[test]
    fn ungrouped_triangles_survive_export() {
        let (mut scene, root) = static_scene();
        let crate_node = scene.find_by_name(root, "crate").unwrap();
        let NodeKind::StaticMesh(mesh) = &mut scene.get_mut(crate_node).unwrap().kind else {
            panic!("crate is a static mesh");
        };

        // only the first and last two triangles belong to a group
        let mut geometry = (*mesh.geometry).clone();
        geometry.groups = vec![
            GeometryGroup {
                start: 0,
                count: 6,
                material_index: 0,
            },
            GeometryGroup {
                start: 30,
                count: 6,
                material_index: 1,
            },
        ];
        mesh.geometry = Arc::new(geometry);

        let glb = save_glb(&scene, &[root], "kiln").unwrap();
        let mut loaded = Scene::new();
        let root = load_glb(&glb, &mut loaded, "crate.glb").unwrap();

        let crate_node = loaded.find_by_name(root, "crate").unwrap();
        let mesh = loaded.get(crate_node).unwrap().kind.as_mesh().unwrap();
        assert_eq!(mesh.geometry.triangle_count().unwrap(), 12);

        let spans: Vec<_> = mesh
            .geometry
            .groups
            .iter()
            .map(|group| (group.start, group.count))
            .collect();
        assert_eq!(spans, [(0, 6), (6, 24), (30, 6)]);

        let names: Vec<_> = mesh.material.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["red", "red", "blue"]);
    }

    #[test]
    fn skin_round_trip() {
        let mut scene = Scene::new();
        let root = scene.add(Node::group("rig"), None);
        let hips = scene.add(
            Node::new("hips", NodeKind::Bone)
                .with_transform(Transform::from_translation(Vec3::Y)),
            Some(root),
        );
        let left = scene.add(
            Node::new("left", NodeKind::Bone)
                .with_transform(Transform::from_translation(Vec3::X)),
            Some(hips),
        );
        let right = scene.add(
            Node::new("right", NodeKind::Bone).with_transform(Transform {
                rotation: Quat::from_rotation_z(0.5),
                ..Transform::from_translation(Vec3::NEG_X)
            }),
            Some(hips),
        );

        let geometry = Geometry::from_positions(&[Vec3::ZERO, Vec3::X, Vec3::Y])
            .with_attribute(
                AttributeName::SkinIndex,
                AttributeBuffer::from_u16(4, &[0, 1, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0]),
            )
            .with_attribute(
                AttributeName::SkinWeight,
                AttributeBuffer::from_f32(
                    4,
                    &[0.5, 0.5, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
                ),
            );

        scene.add(
            Node::new(
                "body",
                NodeKind::SkinnedMesh(SkinnedMesh {
                    mesh: Mesh {
                        geometry: Arc::new(geometry),
                        material: MaterialSlot::Single(Arc::new(Material::named("skin"))),
                    },
                    skeleton: Skeleton {
                        bones: vec![hips, left, right],
                        inverse_bind_matrices: None,
                    },
                    bind_matrix: Some(Mat4::IDENTITY),
                }),
            ),
            Some(root),
        );

        let glb = save_glb(&scene, &[root], "kiln").unwrap();
        let mut loaded = Scene::new();
        let root = load_glb(&glb, &mut loaded, "rig.glb").unwrap();

        let body = loaded.find_by_name(root, "body").unwrap();
        let skinned = loaded.get(body).unwrap().kind.as_skinned().unwrap();
        assert_eq!(skinned.skeleton.bones.len(), 3);

        let hips = skinned.skeleton.bones[0];
        for bone in &skinned.skeleton.bones[1..] {
            assert_eq!(loaded.get(*bone).unwrap().parent(), Some(hips));
            assert!(loaded.get(*bone).unwrap().kind.is_bone());
        }

        let ibms = skinned.skeleton.inverse_bind_matrices.as_ref().unwrap();
        let expected = loaded.world_matrix(hips).inverse();
        assert!(ibms[0].abs_diff_eq(expected, 1e-5));
    }
}
