/// Via https://github.com/omerbenamram/mft
#[macro_export]
macro_rules! impl_serialize_for_bitflags {
    ($flags: ident) => {
        impl serde::ser::Serialize for $flags {
            fn serialize<S>(&self, serializer: S) -> ::std::result::Result<S::Ok, S::Error>
            where
                S: serde::ser::Serializer,
            {
                serializer.serialize_str(&format!("{:?}", &self))
            }
        }
    };
}

/// Maps a raw tag onto an enum deriving `Primitive`; unmapped values become `Unknown`.
#[macro_export]
macro_rules! impl_enum_from_value {
    ($enum_type: ident) => {
        impl $enum_type {
            pub fn from_value(value: u32) -> Self {
                <$enum_type as num_traits::FromPrimitive>::from_u32(value).unwrap_or_else(|| {
                    tracing::debug!("Unrecognized {} value {:#X}", stringify!($enum_type), value);
                    $enum_type::Unknown
                })
            }
        }
    };
}
