//! Operator operands

/// Index into a function's local variables (parameters first, then explicit
/// locals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct LocalIndex(pub u32);

impl LocalIndex {
    /// Create a new local index
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get index value
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl From<u32> for LocalIndex {
    fn from(index: u32) -> Self {
        Self(index)
    }
}

/// Relative branch target depth; 0 is the innermost open control region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct BranchDepth(pub u32);

impl BranchDepth {
    /// Create a new branch depth
    #[inline]
    pub const fn new(depth: u32) -> Self {
        Self(depth)
    }

    /// Get depth value
    #[inline]
    pub const fn depth(self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_index() {
        let idx = LocalIndex::new(7);
        assert_eq!(idx.index(), 7);
    }

    #[test]
    fn test_branch_depth() {
        let depth = BranchDepth::new(2);
        assert_eq!(depth.depth(), 2);
    }
}
