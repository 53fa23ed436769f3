//! Bone hierarchy with bind matrices
//!
//! Bones are topologically ordered (parent index < child index), which lets
//! the pose pipeline accumulate model-space transforms in one forward pass.

use marrow_core::{BoneMask, MarrowError, Mat4, Result};
use serde::{Deserialize, Serialize};

/// A rigid node of the hierarchy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bone {
    pub name: String,
    /// Parent bone index; `None` for a root bone
    pub parent: Option<usize>,
}

/// Bone hierarchy plus the bind-pose matrices the pose pipeline needs:
/// per-bone local bind, model bind and inverse bind, and a global root bind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skeleton {
    bones: Vec<Bone>,
    local_bind: Vec<Mat4>,
    model_bind: Vec<Mat4>,
    inverse_bind: Vec<Mat4>,
    root_bind: Mat4,
}

impl Skeleton {
    /// Build a skeleton, validating topological order and array agreement.
    pub fn new(
        bones: Vec<Bone>,
        local_bind: Vec<Mat4>,
        model_bind: Vec<Mat4>,
        inverse_bind: Vec<Mat4>,
        root_bind: Mat4,
    ) -> Result<Self> {
        let count = bones.len();
        if local_bind.len() != count || model_bind.len() != count || inverse_bind.len() != count {
            return Err(MarrowError::InvalidSkeleton(format!(
                "bind matrix arrays must match bone count {}",
                count
            )));
        }
        for (i, bone) in bones.iter().enumerate() {
            if let Some(parent) = bone.parent {
                if parent >= i {
                    return Err(MarrowError::InvalidSkeleton(format!(
                        "bone '{}' ({}) has parent {} out of topological order",
                        bone.name, i, parent
                    )));
                }
            }
        }
        Ok(Self {
            bones,
            local_bind,
            model_bind,
            inverse_bind,
            root_bind,
        })
    }

    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn bone(&self, index: usize) -> Option<&Bone> {
        self.bones.get(index)
    }

    /// Look up a bone index by name
    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }

    pub fn local_bind(&self) -> &[Mat4] {
        &self.local_bind
    }

    pub fn model_bind(&self) -> &[Mat4] {
        &self.model_bind
    }

    pub fn inverse_bind(&self) -> &[Mat4] {
        &self.inverse_bind
    }

    pub fn root_bind(&self) -> &Mat4 {
        &self.root_bind
    }

    /// Build a mask containing the named bones. Fails when the skeleton
    /// exceeds the mask capacity or a name does not resolve.
    pub fn compute_bone_mask(&self, names: &[&str]) -> Result<BoneMask> {
        let mut mask = BoneMask::new(self.bone_count())?;
        for name in names {
            let index = self
                .bone_index(name)
                .ok_or_else(|| MarrowError::BoneNotFound((*name).to_string()))?;
            mask.set(index);
        }
        Ok(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(names: &[&str]) -> Skeleton {
        let bones: Vec<Bone> = names
            .iter()
            .enumerate()
            .map(|(i, name)| Bone {
                name: (*name).to_string(),
                parent: if i == 0 { None } else { Some(i - 1) },
            })
            .collect();
        let n = bones.len();
        Skeleton::new(
            bones,
            vec![Mat4::IDENTITY; n],
            vec![Mat4::IDENTITY; n],
            vec![Mat4::IDENTITY; n],
            Mat4::IDENTITY,
        )
        .unwrap()
    }

    #[test]
    fn bone_index_by_name() {
        let skel = chain(&["root", "spine", "head"]);
        assert_eq!(skel.bone_index("spine"), Some(1));
        assert_eq!(skel.bone_index("tail"), None);
    }

    #[test]
    fn rejects_out_of_order_parent() {
        let bones = vec![
            Bone {
                name: "a".into(),
                parent: Some(1),
            },
            Bone {
                name: "b".into(),
                parent: None,
            },
        ];
        let r = Skeleton::new(
            bones,
            vec![Mat4::IDENTITY; 2],
            vec![Mat4::IDENTITY; 2],
            vec![Mat4::IDENTITY; 2],
            Mat4::IDENTITY,
        );
        assert!(r.is_err());
    }

    #[test]
    fn rejects_mismatched_bind_arrays() {
        let bones = vec![Bone {
            name: "root".into(),
            parent: None,
        }];
        let r = Skeleton::new(
            bones,
            vec![Mat4::IDENTITY; 2],
            vec![Mat4::IDENTITY; 1],
            vec![Mat4::IDENTITY; 1],
            Mat4::IDENTITY,
        );
        assert!(r.is_err());
    }

    #[test]
    fn mask_over_all_bones_counts_them() {
        let skel = chain(&["root", "spine", "head"]);
        let mask = skel.compute_bone_mask(&["root", "spine", "head"]).unwrap();
        assert_eq!(mask.count_ones(), skel.bone_count());
    }

    #[test]
    fn mask_unknown_bone_fails() {
        let skel = chain(&["root"]);
        assert!(skel.compute_bone_mask(&["tail"]).is_err());
    }
}
