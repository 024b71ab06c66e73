//! Typed accessors for [`RemoteBlock`](crate::block::RemoteBlock) variables.
//!
//! Values are packed LSB first: bit 0 of the value lands on the first bit of
//! the variable's first segment.

/// Generates typed set/get method pairs for a single type.
macro_rules! impl_typed_access {
    (bool) => {
        /// Stages a single-bit variable.
        pub fn set_bool(&self, var: &Variable, value: bool) -> Result<(), BlockError> {
            self.check_width(var, 1)?;
            self.set(var, &[value as u8])
        }

        /// Reads a single-bit variable.
        pub fn get_bool(&self, var: &Variable) -> Result<bool, BlockError> {
            self.check_width(var, 1)?;
            let mut buf = [0u8; 1];
            self.get(var, &mut buf)?;
            Ok(buf[0] & 0x1 != 0)
        }
    };
    ($type:ty) => {
        paste::paste! {
            #[doc = "Stages `value` into `var` as an LSB-first `" $type "`."]
            #[doc = ""]
            #[doc = "Bits above the variable's width are dropped."]
            pub fn [<set_ $type>](&self, var: &Variable, value: $type) -> Result<(), BlockError> {
                self.check_width(var, <$type>::BITS as usize)?;
                self.set(var, &value.to_le_bytes())
            }

            #[doc = "Reads `var` as a zero-extended `" $type "`."]
            pub fn [<get_ $type>](&self, var: &Variable) -> Result<$type, BlockError> {
                self.check_width(var, <$type>::BITS as usize)?;
                let mut buf = [0u8; core::mem::size_of::<$type>()];
                self.get(var, &mut buf)?;
                Ok(<$type>::from_le_bytes(buf))
            }
        }
    };
}

/// Generates typed accessors for all supported widths.
macro_rules! impl_typed_accessors {
    () => {
        impl_typed_access!(bool);
        impl_typed_access!(u8);
        impl_typed_access!(u16);
        impl_typed_access!(u32);
        impl_typed_access!(u64);
        impl_typed_access!(u128);
    };
}

pub(super) use impl_typed_access;
pub(super) use impl_typed_accessors;
