/// The voxel storage format of a stack. Together with [`crate::StackKind`], this determines
/// which shader variant can sample the stack.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum PixelType {
    U8,
    U16,
    Argb,
}

impl PixelType {
    #[inline]
    pub fn bytes_per_voxel(&self) -> usize {
        match self {
            PixelType::U8 => 1,
            PixelType::U16 => 2,
            PixelType::Argb => 4,
        }
    }
}
