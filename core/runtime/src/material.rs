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

use std::{collections::BTreeMap, sync::Arc};

use glam::Vec3;
use kiln_schema::{Bitmap, TextureRole, UvTransform};

/// Where a texture's pixels come from.
#[derive(Clone, Debug)]
pub enum ImageSource {
    /// A still-encoded image file, as embedded in a GLB.
    Encoded {
        bytes: Vec<u8>,
        mime_type: Option<String>,
    },

    /// Already-decoded RGBA8 pixels.
    Pixels(Bitmap),
}

/// A source image. Shared by every [Texture] sampling it, so the identity of
/// the [Arc] holding it identifies the image.
#[derive(Clone, Debug)]
pub struct TextureImage {
    pub name: Option<String>,
    pub source: ImageSource,
}

/// A sampled view of a [TextureImage].
#[derive(Clone, Debug)]
pub struct Texture {
    pub image: Arc<TextureImage>,
    pub flip_y: bool,
    pub transform: Option<UvTransform>,
}

impl Texture {
    pub fn new(image: Arc<TextureImage>) -> Self {
        Self {
            image,
            flip_y: false,
            transform: None,
        }
    }
}

/// A PBR material as held by the live scene.
///
/// Scalars are optional because loaded or hand-built materials may leave them
/// unspecified. Consumers decide the fallbacks.
#[derive(Clone, Debug, Default)]
pub struct Material {
    pub name: String,
    pub color: Option<Vec3>,
    pub metalness: Option<f32>,
    pub roughness: Option<f32>,
    pub transparent: bool,
    pub opacity: Option<f32>,
    pub double_sided: bool,
    pub emissive: Option<Vec3>,
    pub emissive_intensity: Option<f32>,
    pub maps: BTreeMap<TextureRole, Arc<Texture>>,
}

impl Material {
    pub const FALLBACK_COLOR: Vec3 = Vec3::ONE;
    pub const FALLBACK_METALNESS: f32 = 0.0;
    pub const FALLBACK_ROUGHNESS: f32 = 0.9;
    pub const FALLBACK_OPACITY: f32 = 1.0;
    pub const FALLBACK_EMISSIVE: Vec3 = Vec3::ZERO;
    pub const FALLBACK_EMISSIVE_INTENSITY: f32 = 1.0;

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_map(mut self, role: TextureRole, texture: Arc<Texture>) -> Self {
        self.maps.insert(role, texture);
        self
    }
}
