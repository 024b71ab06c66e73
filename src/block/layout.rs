//! Validation of variables sharing a block and derivation of the block's masks.

use std::sync::Arc;

use crate::block::{
    AccessMode, BlockError, ErrorKind, Variable,
    bits::{any_bits_set, set_bits},
};

/// Static description of a block derived from its attached variables.
#[derive(Debug)]
pub(crate) struct BlockLayout {
    pub(crate) path: String,
    pub(crate) mode: AccessMode,
    pub(crate) size: usize,
    pub(crate) verify_mask: Vec<u8>,
    /// Union of every attached variable's bits.
    pub(crate) owned_mask: Vec<u8>,
    pub(crate) verify_enabled: bool,
    pub(crate) bulk_enabled: bool,
    pub(crate) exclusive_only: bool,
    pub(crate) overlap_only: bool,
}

impl BlockLayout {
    /// Builds the layout for `variables`, rejecting bit collisions.
    ///
    /// The block size is the largest byte extent of any variable, rounded up
    /// to `min_access`. `address` is used only for error reporting.
    pub(crate) fn add_variables(
        variables: &[Arc<Variable>],
        min_access: usize,
        max_access: usize,
        address: u64,
    ) -> Result<Self, BlockError> {
        let Some(first) = variables.first() else {
            return Err(BlockError::new(
                ErrorKind::Configuration,
                "<empty>",
                address,
                "block has no variables",
            ));
        };

        let path = first.path().to_owned();
        let err = |kind, msg: String| BlockError::new(kind, &path, address, msg);

        for (i, var) in variables.iter().enumerate() {
            if variables[..i].iter().any(|v| Arc::ptr_eq(v, var)) {
                return Err(err(
                    ErrorKind::Configuration,
                    format!("variable {} attached twice", var.path()),
                ));
            }
        }

        let raw = variables.iter().map(|v| v.block_bytes()).max().unwrap_or(0);
        let size = raw.div_ceil(min_access) * min_access;
        if size > max_access {
            return Err(err(
                ErrorKind::Configuration,
                format!("block size {size} exceeds max access size {max_access}"),
            ));
        }

        let mut mode = first.mode();
        let mut overlap_mask = vec![0u8; size];
        let mut exclusive_mask = vec![0u8; size];
        let mut owned_mask = vec![0u8; size];
        let mut verify_mask = vec![0u8; size];
        let mut verify_enabled = false;
        let mut bulk_enabled = false;
        let mut exclusive_only = true;

        for var in variables {
            if var.mode() != mode {
                mode = AccessMode::ReadWrite;
            }
            bulk_enabled |= var.bulk_enabled();
            exclusive_only &= !var.overlap_enabled();

            let verified = var.mode() == AccessMode::ReadWrite && var.verify();
            verify_enabled |= verified;

            for seg in var.segments() {
                if var.overlap_enabled() {
                    set_bits(&mut overlap_mask, seg.bit_offset, seg.bit_size);
                } else {
                    if any_bits_set(&exclusive_mask, seg.bit_offset, seg.bit_size) {
                        return Err(err(
                            ErrorKind::Overlap,
                            format!(
                                "variable {} bits {}..{} collide with another exclusive variable",
                                var.path(),
                                seg.bit_offset,
                                seg.end_bit()
                            ),
                        ));
                    }
                    set_bits(&mut exclusive_mask, seg.bit_offset, seg.bit_size);
                }

                set_bits(&mut owned_mask, seg.bit_offset, seg.bit_size);
                if verified {
                    set_bits(&mut verify_mask, seg.bit_offset, seg.bit_size);
                }
            }
        }

        if let Some(x) = (0..size).find(|&x| overlap_mask[x] & exclusive_mask[x] != 0) {
            return Err(err(
                ErrorKind::Overlap,
                format!("overlap enabled variable collides with exclusive variable at byte {x}"),
            ));
        }

        let overlap_only = exclusive_mask.iter().all(|b| *b == 0);

        Ok(Self {
            path,
            mode,
            size,
            verify_mask,
            owned_mask,
            verify_enabled,
            bulk_enabled,
            exclusive_only,
            overlap_only,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::test_support::var;

    fn layout(vars: &[Arc<Variable>]) -> Result<BlockLayout, BlockError> {
        BlockLayout::add_variables(vars, 4, 256, 0x100)
    }

    #[test]
    fn disjoint_variables_are_accepted() {
        let a = var("A", 0, 8);
        let b = var("B", 8, 8);
        let l = layout(&[a, b]).unwrap();

        assert_eq!(l.path, "A");
        assert_eq!(l.size, 4);
        assert_eq!(l.owned_mask, [0xFF, 0xFF, 0x00, 0x00]);
        assert!(l.exclusive_only);
        assert!(!l.overlap_only);
    }

    #[test]
    fn exclusive_collision_is_rejected() {
        let a = var("A", 0, 8);
        let b = var("B", 7, 4);
        let e = layout(&[a, b]).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Overlap);
        assert_eq!(e.address(), 0x100);
        assert!(e.message().contains("B"));
    }

    #[test]
    fn overlap_enabled_against_exclusive_is_rejected() {
        let a = var("A", 0, 8);
        let b = Variable::builder("B").bits(4, 8).overlap(true).build().unwrap();
        // order must not matter
        assert_eq!(layout(&[a.clone(), b.clone()]).unwrap_err().kind(), ErrorKind::Overlap);
        assert_eq!(layout(&[b, a]).unwrap_err().kind(), ErrorKind::Overlap);
    }

    #[test]
    fn overlap_enabled_variables_may_share_bits() {
        let a = Variable::builder("A").bits(0, 16).overlap(true).build().unwrap();
        let b = Variable::builder("B").bits(8, 8).overlap(true).build().unwrap();
        let l = layout(&[a, b]).unwrap();
        assert!(l.overlap_only);
        assert!(!l.exclusive_only);
    }

    #[test]
    fn verify_mask_covers_only_verified_read_write_bits() {
        let a = var("A", 0, 4);
        let b = Variable::builder("B").bits(4, 4).verify(false).build().unwrap();
        let c = Variable::builder("C")
            .bits(8, 8)
            .mode(AccessMode::WriteOnly)
            .build()
            .unwrap();
        let l = layout(&[a, b, c]).unwrap();

        assert!(l.verify_enabled);
        assert_eq!(l.verify_mask, [0x0F, 0x00, 0x00, 0x00]);
        assert_eq!(l.mode, AccessMode::ReadWrite);
    }

    #[test]
    fn flags_are_unions_of_inputs() {
        let a = Variable::builder("A")
            .bits(0, 8)
            .mode(AccessMode::ReadOnly)
            .bulk(false)
            .build()
            .unwrap();
        let b = Variable::builder("B")
            .bits(8, 8)
            .mode(AccessMode::ReadOnly)
            .verify(false)
            .build()
            .unwrap();
        let l = layout(&[a.clone(), b]).unwrap();
        assert_eq!(l.mode, AccessMode::ReadOnly);
        assert!(l.bulk_enabled);
        assert!(!l.verify_enabled);

        let l = layout(&[a]).unwrap();
        assert!(!l.bulk_enabled);
    }

    #[test]
    fn size_rounds_to_min_access_and_respects_max() {
        let a = var("A", 0, 40);
        assert_eq!(layout(&[a.clone()]).unwrap().size, 8);

        let e = BlockLayout::add_variables(&[a], 4, 4, 0).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn empty_and_duplicate_lists_are_rejected() {
        assert_eq!(layout(&[]).unwrap_err().kind(), ErrorKind::Configuration);
        let a = var("A", 0, 8);
        assert_eq!(
            layout(&[a.clone(), a]).unwrap_err().kind(),
            ErrorKind::Configuration
        );
    }
}
