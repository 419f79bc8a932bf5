//! The `model!` declaration macro.

/// Declare a model type.
///
/// Every property names its typed key constant, its getter and (for
/// scalars and references) its setter:
///
/// ```ignore
/// model! {
///     /// A person with an optional home address.
///     pub struct Person {
///         FIRST_NAME => first_name, set_first_name: String,
///         AGE => age, set_age: i32,
///     }
///     references {
///         ADDRESS => address, set_address: Address,
///     }
///     relations {
///         FRIENDS => friends: Person,
///     }
/// }
/// ```
///
/// The `references` and `relations` sections are optional. The generated
/// struct is a proxy: getters return `Result<T>` and read storage, setters
/// write through. Relation members are changed with
/// [`Model::relate`](crate::Model::relate) and friends.
#[macro_export]
macro_rules! model {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $key:ident => $getter:ident, $setter:ident : $ty:ty
            ),* $(,)?
        }
        $(
            references {
                $(
                    $(#[$rmeta:meta])*
                    $rkey:ident => $rgetter:ident, $rsetter:ident : $rty:ty
                ),* $(,)?
            }
        )?
        $(
            relations {
                $(
                    $(#[$lmeta:meta])*
                    $lkey:ident => $lgetter:ident : $lty:ty
                ),* $(,)?
            }
        )?
    ) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash)]
        $vis struct $name {
            handle: $crate::ModelHandle,
        }

        impl $crate::Model for $name {
            const NAME: &'static str = stringify!($name);

            fn info() -> &'static $crate::ModelInfo {
                static INFO: $crate::ModelInfo = $crate::ModelInfo {
                    name: stringify!($name),
                    fields: &[
                        $(
                            $crate::FieldInfo::scalar(
                                stringify!($getter),
                                <$ty as $crate::Column>::SQL_TYPE,
                                <$ty as $crate::Column>::NULLABLE,
                                <$ty as $crate::Column>::default_value,
                            ),
                        )*
                        $($(
                            $crate::FieldInfo::reference(
                                stringify!($rgetter),
                                <$rty as $crate::Model>::info,
                            ),
                        )*)?
                        $($(
                            $crate::FieldInfo::relation(
                                stringify!($lgetter),
                                <$lty as $crate::Model>::info,
                            ),
                        )*)?
                    ],
                };
                &INFO
            }

            fn from_handle(handle: $crate::ModelHandle) -> Self {
                Self { handle }
            }

            fn handle(&self) -> &$crate::ModelHandle {
                &self.handle
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                ::std::fmt::Debug::fmt(&self.handle, f)
            }
        }

        #[allow(dead_code)]
        impl $name {
            $(
                pub const $key: $crate::Property<Self, $ty> =
                    $crate::Property::new(stringify!($getter));

                $(#[$fmeta])*
                pub fn $getter(&self) -> $crate::Result<$ty> {
                    self.handle.get(stringify!($getter))
                }

                pub fn $setter(&self, value: impl Into<$ty>) -> $crate::Result<()> {
                    self.handle.set::<$ty>(stringify!($getter), value.into())
                }
            )*

            $($(
                pub const $rkey: $crate::Reference<Self, $rty> =
                    $crate::Reference::new(stringify!($rgetter));

                $(#[$rmeta])*
                pub fn $rgetter(&self) -> $crate::Result<Option<$rty>> {
                    self.handle.get_reference(stringify!($rgetter))
                }

                pub fn $rsetter(&self, target: Option<&$rty>) -> $crate::Result<()> {
                    self.handle.set_reference(stringify!($rgetter), target)
                }
            )*)?

            $($(
                pub const $lkey: $crate::Relation<Self, $lty> =
                    $crate::Relation::new(stringify!($lgetter));

                $(#[$lmeta])*
                pub fn $lgetter(&self) -> $crate::Result<Vec<$lty>> {
                    self.handle.related(stringify!($lgetter))
                }
            )*)?
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::{FieldKind, Model, SqlType};

    crate::model! {
        /// Test model.
        pub struct Atom {
            NAME_KEY => name, set_name: String,
            MASS => mass, set_mass: f64,
            CHARGE => charge, set_charge: Option<i32>,
        }
        references {
            PARTNER => partner, set_partner: Atom,
        }
        relations {
            BONDS => bonds: Atom,
        }
    }

    crate::model! {
        struct Plain {
            FLAG => flag, set_flag: bool,
        }
    }

    #[test]
    fn generated_metadata() {
        let info = Atom::info();
        assert_eq!(info.name, "Atom");
        assert_eq!(Atom::NAME, "Atom");
        let names: Vec<_> = info.fields.iter().map(|f| f.name).collect();
        assert_eq!(names, ["name", "mass", "charge", "partner", "bonds"]);

        let charge = info.field("charge").unwrap();
        assert!(matches!(
            charge.kind,
            FieldKind::Scalar {
                sql_type: SqlType::Integer,
                nullable: true,
                ..
            }
        ));
        assert_eq!(info.field("partner").unwrap().target().unwrap().name, "Atom");
        assert!(info.field("bonds").unwrap().is_relation());
        assert!(info.validate().is_ok());
    }

    #[test]
    fn generated_keys() {
        assert_eq!(Atom::MASS.name(), "mass");
        assert_eq!(Atom::PARTNER.name(), "partner");
        assert_eq!(Atom::BONDS.name(), "bonds");
        assert_eq!(Plain::FLAG.name(), "flag");
        assert!(Plain::info().dependencies().is_empty());
    }
}
