use std::any::{type_name, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of a single-value component: its Rust type, plus the type name
/// kept around for diagnostics.
#[derive(Clone, Copy, Debug, Eq)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A declared dependency edge: either a single-value component or a named
/// contribution collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dep {
    Type(TypeKey),
    Collection(&'static str),
}

impl Dep {
    /// Depend on the single provider of `T`.
    pub fn on<T: 'static>() -> Self {
        Dep::Type(TypeKey::of::<T>())
    }

    /// Depend on every contribution tagged with the named collection.
    pub fn group(name: &'static str) -> Self {
        Dep::Collection(name)
    }
}

impl fmt::Display for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dep::Type(k) => write!(f, "{k}"),
            Dep::Collection(name) => write!(f, "collection '{name}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_keys_compare_by_type() {
        assert_eq!(TypeKey::of::<u32>(), TypeKey::of::<u32>());
        assert_ne!(TypeKey::of::<u32>(), TypeKey::of::<i32>());
    }

    #[test]
    fn dep_display_names_the_target() {
        let d = Dep::group("routes");
        assert_eq!(d.to_string(), "collection 'routes'");
        assert!(Dep::on::<String>().to_string().contains("String"));
    }
}
