//! Definitions shared by every crate of the bridge: the guest-visible
//! constants, the `Errno` code space that all calls return, and the
//! little-endian wire layouts of the structs a guest hands us.
//!
//! Nothing in here touches the host.  Translation to `libc` values happens in
//! `rawposix`, decoding of guest memory in `typemap`.

/// Declares a fieldless enum together with a `from_discriminant` constructor
/// so raw guest integers can be turned back into the enum.  The `#[repr]`
/// attribute has to come first.
#[macro_export]
macro_rules! reversible_enum {
    (#[repr($reprty: ident)] $(#[$settings: meta])* $visibility: vis enum $enumname:ident {
        $($(#[$vattr: meta])* $valuename: ident = $value: literal,)*
    }) => {
        #[repr($reprty)]
        $(#[$settings])*
        $visibility enum $enumname {
            $($(#[$vattr])* $valuename = $value,)*
        }

        impl $enumname {
            /// Returns the variant with discriminant `v`, if there is one.
            $visibility fn from_discriminant(v: $reprty) -> Option<Self> {
                match v {
                    $($value => Some($enumname::$valuename),)*
                    _ => None,
                }
            }

            /// The raw discriminant, as it appears on the guest side.
            $visibility fn discriminant(self) -> $reprty {
                self as $reprty
            }
        }
    }
}

pub mod constants;
pub mod data;
