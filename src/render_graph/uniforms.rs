//! Named uniform values packed with WGSL uniform-buffer layout rules.
//!
//! A [`UniformBlock`] is an ordered list of named values. The order is the
//! member order of the matching WGSL struct:
//!
//! ```wgsl
//! struct Params {
//!     texel: vec2f,
//!     offsets: array<vec4f, 2>,
//! }
//! @group(0) @binding(0) var<uniform> params: Params;
//! ```
//!
//! matches
//!
//! ```ignore
//! UniformBlock::new()
//!     .with("texel", [1.0f32 / 640.0, 1.0 / 480.0])
//!     .with("offsets", UniformValue::Vec4Array(vec![[1.3, 3.4, 5.4, 0.0], [7.4, 9.4, 11.4, 0.0]]));
//! ```

use crate::error::{RenderError, RenderResult};

#[derive(Clone, Debug, PartialEq)]
pub enum UniformValue {
    F32(f32),
    Vec2([f32; 2]),
    Vec4([f32; 4]),
    /// `array<vec4f, N>`; `N` is fixed by the first value stored under a name.
    Vec4Array(Vec<[f32; 4]>),
}

impl UniformValue {
    /// (alignment, size) in the uniform address space.
    fn layout(&self) -> (usize, usize) {
        match self {
            Self::F32(_) => (4, 4),
            Self::Vec2(_) => (8, 8),
            Self::Vec4(_) => (16, 16),
            Self::Vec4Array(v) => (16, 16 * v.len()),
        }
    }

    fn same_shape(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::F32(_), Self::F32(_))
            | (Self::Vec2(_), Self::Vec2(_))
            | (Self::Vec4(_), Self::Vec4(_)) => true,
            (Self::Vec4Array(a), Self::Vec4Array(b)) => a.len() == b.len(),
            _ => false,
        }
    }

    fn write(&self, out: &mut [u8]) {
        let floats: Vec<f32> = match self {
            Self::F32(v) => vec![*v],
            Self::Vec2(v) => v.to_vec(),
            Self::Vec4(v) => v.to_vec(),
            Self::Vec4Array(v) => v.iter().flatten().copied().collect(),
        };
        out[..floats.len() * 4].copy_from_slice(bytemuck::cast_slice(&floats));
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}

impl From<[f32; 2]> for UniformValue {
    fn from(v: [f32; 2]) -> Self {
        Self::Vec2(v)
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(v: [f32; 4]) -> Self {
        Self::Vec4(v)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UniformBlock {
    entries: Vec<(String, UniformValue)>,
}

impl UniformBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a member. Declaration order is layout order.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<UniformValue>) -> Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    /// Replaces the value of an existing member.
    ///
    /// The shape is fixed at declaration; changing it would silently
    /// desynchronize the block from its WGSL struct.
    pub fn set(&mut self, name: &str, value: impl Into<UniformValue>) -> RenderResult<()> {
        let value = value.into();
        let slot = self
            .entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .ok_or_else(|| RenderError::configuration(format!("no uniform named `{name}`")))?;
        if !slot.1.same_shape(&value) {
            return Err(RenderError::configuration(format!(
                "uniform `{name}` changed shape from {:?} to {:?}",
                slot.1, value
            )));
        }
        slot.1 = value;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&UniformValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Byte offset of every member, in declaration order.
    pub fn offsets(&self) -> Vec<(&str, usize)> {
        let mut cursor: usize = 0;
        self.entries
            .iter()
            .map(|(name, value)| {
                let (align, size) = value.layout();
                let offset = cursor.next_multiple_of(align);
                cursor = offset + size;
                (name.as_str(), offset)
            })
            .collect()
    }

    /// Total buffer size, rounded up to 16 bytes. Never zero, so an empty
    /// block still produces a bindable buffer.
    pub fn byte_size(&self) -> usize {
        let end = self
            .entries
            .iter()
            .zip(self.offsets())
            .map(|((_, value), (_, offset))| offset + value.layout().1)
            .max()
            .unwrap_or(0);
        end.next_multiple_of(16).max(16)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.byte_size()];
        for ((_, value), (_, offset)) in self.entries.iter().zip(self.offsets()) {
            value.write(&mut bytes[offset..]);
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec2_after_f32_aligns_to_eight() {
        let block = UniformBlock::new()
            .with("scale", 2.0f32)
            .with("texel", [0.5f32, 0.25]);
        assert_eq!(block.offsets(), vec![("scale", 0), ("texel", 8)]);
        assert_eq!(block.byte_size(), 16);
    }

    #[test]
    fn vec4_array_aligns_to_sixteen() {
        let block = UniformBlock::new()
            .with("texel", [1.0f32, 1.0])
            .with(
                "offsets",
                UniformValue::Vec4Array(vec![[1.0, 2.0, 3.0, 0.0], [4.0, 5.0, 6.0, 0.0]]),
            )
            .with("gain", 1.0f32);
        assert_eq!(
            block.offsets(),
            vec![("texel", 0), ("offsets", 16), ("gain", 48)]
        );
        assert_eq!(block.byte_size(), 64);
    }

    #[test]
    fn bytes_land_at_offsets() {
        let block = UniformBlock::new()
            .with("a", 1.5f32)
            .with("b", [2.0f32, 3.0, 4.0, 5.0]);
        let bytes = block.to_bytes();
        let floats: &[f32] = bytemuck::cast_slice(&bytes);
        assert_eq!(floats.len(), 8);
        assert_eq!(floats[0], 1.5);
        assert_eq!(&floats[4..8], &[2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn empty_block_is_still_bindable() {
        assert_eq!(UniformBlock::new().byte_size(), 16);
    }

    #[test]
    fn set_rejects_unknown_names_and_shape_changes() {
        let mut block = UniformBlock::new().with("focal", 1.0f32);
        assert!(block.set("focal", 2.0f32).is_ok());
        assert_eq!(block.get("focal"), Some(&UniformValue::F32(2.0)));
        assert!(matches!(
            block.set("range", 1.0f32),
            Err(RenderError::Configuration(_))
        ));
        assert!(matches!(
            block.set("focal", [1.0f32, 2.0]),
            Err(RenderError::Configuration(_))
        ));
    }
}
