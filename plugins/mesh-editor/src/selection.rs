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

//! Axis-aligned selection boxes and the merged box set.

use kiln_runtime::glam::Vec3;

/// An axis-aligned box in world space.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Builds a box from any two opposite corners.
    pub fn from_corners(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Whether the boxes overlap. Touching faces count as overlapping.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.min.cmple(point).all() && point.cmple(self.max).all()
    }

    pub fn contains(&self, other: &Aabb) -> bool {
        self.contains_point(other.min) && self.contains_point(other.max)
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// A box with no volume along some axis.
    pub fn is_degenerate(&self) -> bool {
        self.size().cmple(Vec3::ZERO).any()
    }
}

/// A set of boxes with no two overlapping.
///
/// Inserting a box absorbs every box it touches, repeating until the merged
/// box touches nothing else.
#[derive(Clone, Debug, Default)]
pub struct BoxSet {
    boxes: Vec<Aabb>,
}

impl BoxSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, aabb: Aabb) {
        let mut merged = aabb;
        loop {
            let before = self.boxes.len();
            self.boxes.retain(|other| {
                if merged.intersects(other) {
                    merged = merged.union(other);
                    false
                } else {
                    true
                }
            });

            if self.boxes.len() == before {
                break;
            }
        }

        self.boxes.push(merged);
    }

    pub fn boxes(&self) -> &[Aabb] {
        &self.boxes
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn clear(&mut self) {
        self.boxes.clear();
    }

    /// Whether any box holds the point.
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.boxes.iter().any(|aabb| aabb.contains_point(point))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aabb(min: [f32; 3], max: [f32; 3]) -> Aabb {
        Aabb::from_corners(Vec3::from(min), Vec3::from(max))
    }

    #[test]
    fn corners_are_normalized() {
        let aabb = Aabb::from_corners(Vec3::new(2.0, -1.0, 5.0), Vec3::new(0.0, 3.0, 1.0));
        assert_eq!(aabb.min, Vec3::new(0.0, -1.0, 1.0));
        assert_eq!(aabb.max, Vec3::new(2.0, 3.0, 5.0));
    }

    #[test]
    fn contained_box_is_absorbed() {
        let mut set = BoxSet::new();
        set.insert(aabb([0.0; 3], [4.0; 3]));
        set.insert(aabb([1.0; 3], [2.0; 3]));
        assert_eq!(set.boxes(), &[aabb([0.0; 3], [4.0; 3])]);
    }

    #[test]
    fn overlapping_boxes_merge() {
        let mut set = BoxSet::new();
        set.insert(aabb([0.0; 3], [2.0; 3]));
        set.insert(aabb([1.0; 3], [3.0; 3]));
        assert_eq!(set.boxes(), &[aabb([0.0; 3], [3.0; 3])]);
    }

    #[test]
    fn merging_cascades() {
        let mut set = BoxSet::new();
        set.insert(aabb([0.0; 3], [1.0; 3]));
        set.insert(aabb([2.0, 0.75, 0.0], [3.0, 1.0, 1.0]));
        assert_eq!(set.len(), 2);

        // only reaches the second box once merged with the first
        set.insert(aabb([0.5, 0.0, 0.0], [2.5, 0.5, 1.0]));
        assert_eq!(set.boxes(), &[aabb([0.0; 3], [3.0, 1.0, 1.0])]);
    }

    #[test]
    fn disjoint_boxes_stay_apart() {
        let mut set = BoxSet::new();
        set.insert(aabb([0.0; 3], [1.0; 3]));
        set.insert(aabb([2.0; 3], [3.0; 3]));
        assert_eq!(set.len(), 2);
        assert!(set.contains_point(Vec3::splat(2.5)));
        assert!(!set.contains_point(Vec3::splat(1.5)));
    }
}
