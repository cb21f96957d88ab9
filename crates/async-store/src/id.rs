//! Type-erased identifiers
//!
//! Tasks, timers, debounces, bindings and distributor channels are all keyed
//! by an [`Id`]. Callers choose the values: strings, integers, or their own
//! enums. The only requirement is `Hash + Eq + Debug`.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

trait DynKey: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn DynKey) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
    fn dyn_fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<T> DynKey for T
where
    T: Any + Hash + Eq + fmt::Debug + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn DynKey) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .map_or(false, |other| self == other)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }

    fn dyn_fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Opaque, hashable identifier.
///
/// Two ids are equal only when they wrap the same concrete type and the
/// wrapped values compare equal, so `Id::from(1u32) != Id::from("1")`.
/// `&str` and `String` are normalised to `String`.
#[derive(Clone)]
pub struct Id(Arc<dyn DynKey>);

impl Id {
    /// Wrap any hashable value as an identifier.
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Hash + Eq + fmt::Debug + Send + Sync,
    {
        Self(Arc::new(value))
    }

    /// Borrow the wrapped value if it has type `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }
}

impl PartialEq for Id {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(other.0.as_ref())
    }
}

impl Eq for Id {}

impl Hash for Id {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.dyn_hash(state);
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.dyn_fmt(f)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.downcast_ref::<String>() {
            Some(s) => f.write_str(s),
            None => self.0.dyn_fmt(f),
        }
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self::new(value.to_owned())
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&String> for Id {
    fn from(value: &String) -> Self {
        Self::new(value.clone())
    }
}

impl From<&Id> for Id {
    fn from(value: &Id) -> Self {
        value.clone()
    }
}

macro_rules! impl_id_from_int {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Id {
                fn from(value: $ty) -> Self {
                    Self::new(value)
                }
            }
        )*
    };
}

impl_id_from_int!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);
