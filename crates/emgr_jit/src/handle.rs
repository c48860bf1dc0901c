//! Pointer-sized opaque tokens exchanged with the VM and the JITs.
//!
//! Zero is reserved as the "null" handle on the C side, so Rust APIs take and
//! return `Option<Handle>` wherever the ABI allows a null.

use std::fmt;
use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(usize);

        impl $name {
            /// Wrap a raw token; zero is the null handle.
            pub const fn from_raw(raw: usize) -> Option<Self> {
                if raw == 0 { None } else { Some(Self(raw)) }
            }

            pub const fn to_raw(self) -> usize {
                self.0
            }

            pub const fn from_nonzero(raw: NonZeroUsize) -> Self {
                Self(raw.get())
            }

            /// Token naming the object behind `target`; never null.
            pub fn from_ref<T>(target: &T) -> Self {
                Self(std::ptr::from_ref(target) as usize)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0)
            }
        }
    };
}

opaque_handle! {
    /// A method as identified by the owning VM.
    MethodHandle
}

opaque_handle! {
    /// A class as identified by the owning VM.
    ClassHandle
}

opaque_handle! {
    /// One loaded JIT instance, i.e. one chain step.
    JitHandle
}

opaque_handle! {
    /// A profile collector registered with the execution manager.
    CollectorHandle
}

opaque_handle! {
    /// A method profile owned by a collector.
    ProfileHandle
}

/// Untyped argument or return slot passed to direct method execution.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct JValue(pub u64);

impl JValue {
    pub const VOID: Self = Self(0);

    pub const fn from_i64(value: i64) -> Self {
        Self(value as u64)
    }

    pub const fn as_i64(self) -> i64 {
        self.0 as i64
    }

    pub fn from_f64(value: f64) -> Self {
        Self(value.to_bits())
    }

    pub fn as_f64(self) -> f64 {
        f64::from_bits(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_null_handle() {
        assert_eq!(MethodHandle::from_raw(0), None);
        let method = MethodHandle::from_raw(0x1234).unwrap();
        assert_eq!(method.to_raw(), 0x1234);
        assert_eq!(format!("{method:?}"), "MethodHandle(0x1234)");
    }

    #[test]
    fn test_jvalue_conversions() {
        assert_eq!(JValue::from_i64(-7).as_i64(), -7);
        assert!((JValue::from_f64(2.5).as_f64() - 2.5).abs() < f64::EPSILON);
        assert_eq!(JValue::default(), JValue::VOID);
    }
}
