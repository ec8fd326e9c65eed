//! Dynamically-typed host values.
//!
//! [`HostValue`] is the engine's picture of a value in the host language:
//! a loose scalar/sequence/map model with the coercion rules of a dynamic
//! runtime. Numeric conversions truncate silently at the declared native
//! width; there is no range checking anywhere in the engine.

use std::sync::Arc;

use crate::descriptor::CallableId;
use crate::registry::ObjectHandle;

/// A host-supplied function: takes the marshaled argument list, returns the
/// ordered result list.
pub type HostFn = dyn Fn(&[HostValue]) -> anyhow::Result<Vec<HostValue>> + Send + Sync;

/// A callable the host side can supply to native code.
#[derive(Clone)]
pub enum HostCallable {
    /// A closure value.
    Code(Arc<HostFn>),
    /// A named method, dispatched on the receiver in the first argument.
    /// Used for virtual-method overrides.
    Method(String),
    /// A native callable previously handed out to the host; passing it back
    /// uses its code pointer directly, with no trampoline.
    Native { callable: CallableId, address: usize },
}

impl std::fmt::Debug for HostCallable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code(c) => write!(f, "Code({:p})", Arc::as_ptr(c)),
            Self::Method(name) => write!(f, "Method({name:?})"),
            Self::Native { callable, address } => {
                write!(f, "Native({callable:?} @ {address:#x})")
            }
        }
    }
}

impl PartialEq for HostCallable {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Code(a), Self::Code(b)) => Arc::ptr_eq(a, b),
            (Self::Method(a), Self::Method(b)) => a == b,
            (
                Self::Native { address: a, .. },
                Self::Native { address: b, .. },
            ) => a == b,
            _ => false,
        }
    }
}

/// One dynamically-typed host value.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum HostValue {
    /// Absent/undefined.
    #[default]
    Undef,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<HostValue>),
    /// Ordered key/value pairs; the host-side view of raw records and maps.
    Map(Vec<(String, HostValue)>),
    /// Wrapper around a native object or boxed handle.
    Object(ObjectHandle),
    Callable(HostCallable),
}

impl HostValue {
    /// Wrap a Rust closure as a host callable.
    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&[HostValue]) -> anyhow::Result<Vec<HostValue>> + Send + Sync + 'static,
    {
        Self::Callable(HostCallable::Code(Arc::new(f)))
    }

    /// Whether the value is present at all.
    pub fn is_defined(&self) -> bool {
        !matches!(self, Self::Undef)
    }

    /// Dynamic-language truthiness: undef, false, zero, and the empty
    /// string are false.
    pub fn truthy(&self) -> bool {
        match self {
            Self::Undef => false,
            Self::Bool(b) => *b,
            Self::Int(v) => *v != 0,
            Self::Float(v) => *v != 0.0,
            Self::Str(s) => !s.is_empty() && s != "0",
            _ => true,
        }
    }

    /// Coerce to a signed integer. Floats truncate toward zero; strings are
    /// parsed numerically and fall back to zero, as a dynamic host would.
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Int(v) => *v,
            Self::Float(v) => *v as i64,
            Self::Bool(b) => *b as i64,
            Self::Str(s) => {
                let t = s.trim();
                t.parse::<i64>()
                    .unwrap_or_else(|_| t.parse::<f64>().map(|f| f as i64).unwrap_or(0))
            }
            _ => 0,
        }
    }

    /// Coerce to an unsigned integer; negative values wrap.
    pub fn as_u64(&self) -> u64 {
        match self {
            Self::Int(v) => *v as u64,
            Self::Float(v) => *v as u64,
            Self::Bool(b) => *b as u64,
            Self::Str(s) => {
                let t = s.trim();
                t.parse::<u64>()
                    .unwrap_or_else(|_| self.as_i64() as u64)
            }
            _ => 0,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Float(v) => *v,
            Self::Int(v) => *v as f64,
            Self::Bool(b) => *b as i64 as f64,
            Self::Str(s) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// Coerce to a single unicode codepoint: the first char of a string, or
    /// the codepoint named by an integer.
    pub fn as_codepoint(&self) -> u32 {
        match self {
            Self::Str(s) => s.chars().next().map(u32::from).unwrap_or(0),
            _ => self.as_u64() as u32,
        }
    }

    /// Stringify scalars; `None` for undef and non-scalar shapes.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Str(s) => Some(s.clone()),
            Self::Int(v) => Some(v.to_string()),
            Self::Float(v) => Some(v.to_string()),
            Self::Bool(b) => Some(if *b { "1" } else { "" }.to_string()),
            _ => None,
        }
    }

    /// Look up an entry of a map-shaped value by key.
    pub fn map_get(&self, key: &str) -> Option<&HostValue> {
        match self {
            Self::Map(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }
}

impl From<bool> for HostValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for HostValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for HostValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for HostValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for HostValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for HostValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!HostValue::Undef.truthy());
        assert!(!HostValue::Str(String::new()).truthy());
        assert!(!HostValue::Str("0".into()).truthy());
        assert!(HostValue::Str("00".into()).truthy());
        assert!(HostValue::Int(-1).truthy());
        assert!(!HostValue::Float(0.0).truthy());
    }

    #[test]
    fn numeric_coercions_truncate() {
        assert_eq!(HostValue::Float(3.9).as_i64(), 3);
        assert_eq!(HostValue::Float(-3.9).as_i64(), -3);
        assert_eq!(HostValue::Str(" 42 ".into()).as_i64(), 42);
        assert_eq!(HostValue::Str("2.5".into()).as_i64(), 2);
        assert_eq!(HostValue::Str("nope".into()).as_i64(), 0);
        assert_eq!(HostValue::Int(-1).as_u64(), u64::MAX);
    }

    #[test]
    fn codepoints() {
        assert_eq!(HostValue::Str("λx".into()).as_codepoint(), 0x3bb);
        assert_eq!(HostValue::Int(0x41).as_codepoint(), 0x41);
        assert_eq!(HostValue::Str(String::new()).as_codepoint(), 0);
    }

    #[test]
    fn map_lookup() {
        let v = HostValue::Map(vec![
            ("x".into(), HostValue::Int(1)),
            ("y".into(), HostValue::Int(2)),
        ]);
        assert_eq!(v.map_get("y"), Some(&HostValue::Int(2)));
        assert_eq!(v.map_get("z"), None);
    }
}
