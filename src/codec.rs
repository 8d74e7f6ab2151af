//! In-place little-endian accessors for fixed-width scalars.
//!
//! Every accessor decodes or encodes a single value at a byte offset within a
//! caller-supplied region, without allocating. On-disk byte order is always
//! little-endian regardless of the host. Accessors do no locking; concurrent
//! writers to the same scalar need external synchronization.

macro_rules! scalar_accessors {
    ($get:ident, $put:ident, $ty:ty) => {
        #[doc = concat!("Decodes a little-endian `", stringify!($ty), "` at `off`.")]
        ///
        /// # Panics
        ///
        /// Panics if the region does not hold a full value at `off`.
        pub fn $get(buf: &[u8], off: usize) -> $ty {
            let size = std::mem::size_of::<$ty>();
            // UNWRAP: the range is exactly `size` bytes long.
            <$ty>::from_le_bytes(buf[off..off + size].try_into().unwrap())
        }

        #[doc = concat!("Encodes `value` as a little-endian `", stringify!($ty), "` at `off`.")]
        ///
        /// # Panics
        ///
        /// Panics if the region does not hold a full value at `off`.
        pub fn $put(buf: &mut [u8], off: usize, value: $ty) {
            let size = std::mem::size_of::<$ty>();
            buf[off..off + size].copy_from_slice(&value.to_le_bytes());
        }
    };
}

scalar_accessors!(get_u8, put_u8, u8);
scalar_accessors!(get_u16, put_u16, u16);
scalar_accessors!(get_u32, put_u32, u32);
scalar_accessors!(get_u64, put_u64, u64);
scalar_accessors!(get_i8, put_i8, i8);
scalar_accessors!(get_i16, put_i16, i16);
scalar_accessors!(get_i32, put_i32, i32);
scalar_accessors!(get_i64, put_i64, i64);
scalar_accessors!(get_f32, put_f32, f32);
scalar_accessors!(get_f64, put_f64, f64);
