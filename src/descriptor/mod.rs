//! Runtime interface descriptors and the catalog that serves them.
//!
//! A descriptor is the complete runtime shape of a callable, record, enum,
//! or object class: enough for the marshaling engine to build a native call
//! frame without any compile-time knowledge of the signature. The [`Catalog`]
//! is the injected, append-only collection of descriptors; the engine only
//! ever reads from it.
//!
//! Type shapes are a sum type ([`TypeDesc`]) rather than an open class
//! hierarchy: every argument and return slot resolves to exactly one variant,
//! once, when the callable descriptor is built.

pub mod layout;

use std::ffi::c_void;
use std::sync::Arc;

/// Index of a record (struct/union/boxed) descriptor in a [`Catalog`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RecordId(pub u32);

/// Index of an enum or flags descriptor in a [`Catalog`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EnumId(pub u32);

/// Index of an object class descriptor in a [`Catalog`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClassId(pub u32);

/// Index of a callable descriptor in a [`Catalog`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallableId(pub u32);

/// How the element count of an array argument is determined.
#[derive(Clone, Debug, PartialEq)]
pub enum ArrayLength {
    /// The array ends with a zeroed element.
    ZeroTerminated,
    /// The array always has exactly this many elements.
    Fixed(usize),
    /// The count travels in the argument at this position, which is filled
    /// in automatically and has no host-side counterpart.
    Arg(usize),
}

/// Shape of an array-typed slot.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayDesc {
    /// Element type.
    pub elem: Box<TypeDesc>,
    /// Length strategy.
    pub length: ArrayLength,
    /// Elements are stored inline by value rather than as pointers.
    /// Only meaningful for record elements; scalar elements are always
    /// stored inline.
    pub value_elements: bool,
}

impl ArrayDesc {
    /// Array of `elem` with the given length strategy, pointer-sized
    /// elements for compound types.
    pub fn new(elem: TypeDesc, length: ArrayLength) -> Self {
        Self {
            elem: Box::new(elem),
            length,
            value_elements: false,
        }
    }

    /// Store record elements inline by value.
    pub fn with_value_elements(mut self) -> Self {
        self.value_elements = true;
        self
    }
}

/// Runtime classification of a value's shape.
///
/// `Void` in argument position denotes an untyped user-data slot: its native
/// representation is an opaque correlation handle tied to a pending callback
/// registration, not a scalar.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeDesc {
    Void,
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    /// A single unicode codepoint.
    Char,
    /// Owned UTF-8 text, NUL-terminated on the native side.
    Utf8,
    /// Filesystem-encoded text; no UTF-8 validity guarantee.
    Filename,
    Array(ArrayDesc),
    /// Singly-linked native node chain.
    List(Box<TypeDesc>),
    /// Keyed native node chain.
    Map(Box<TypeDesc>, Box<TypeDesc>),
    Record(RecordId),
    Enum(EnumId),
    Flags(EnumId),
    /// Reference-counted object handle.
    Object(ClassId),
    /// Native-callable described by its own callable descriptor.
    Callback(CallableId),
    /// A native error record; only valid in the synthesized error slot of a
    /// throwing callable, never as an ordinary argument.
    ErrorValue,
}

impl TypeDesc {
    /// Whether a slot of this type carries a value at all.
    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }
}

/// Whether an argument carries a value in, out, or both.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    InOut,
}

/// Ownership-handoff policy for a value crossing the host/native boundary.
///
/// Ordered: `None < Container < Full`, so `transfer >= Container` asks
/// whether the receiving side owns at least the outer container.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Transfer {
    /// Callee borrows; caller retains ownership.
    None,
    /// Callee owns the outer container but not nested elements.
    Container,
    /// Callee owns the whole value graph.
    Full,
}

/// Lifetime rule for a callback trampoline.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScopePolicy {
    /// Destroyed when the enclosing call returns.
    Call,
    /// Destroyed when native code invokes the paired destroy notification.
    Notified,
    /// Never destroyed automatically; released only explicitly. This is a
    /// documented leak for callbacks the native side may invoke at any
    /// later time.
    Async,
}

/// One argument of a callable.
#[derive(Clone, Debug)]
pub struct ArgDesc {
    pub name: String,
    pub ty: TypeDesc,
    pub direction: Direction,
    pub transfer: Transfer,
    pub nullable: bool,
    /// OUT argument whose backing storage is provided by the caller.
    pub caller_allocates: bool,
    /// Argument that consumes no host value and produces no host result.
    pub skip: bool,
    /// For a callback argument: position of its user-data argument. For the
    /// user-data argument itself: its own position.
    pub closure_pos: Option<usize>,
    /// For a callback argument: position of its destroy-notify argument.
    pub destroy_pos: Option<usize>,
    /// Trampoline lifetime for a callback argument.
    pub scope: ScopePolicy,
}

impl ArgDesc {
    /// An IN argument with no ownership transfer.
    pub fn new(name: &str, ty: TypeDesc) -> Self {
        Self {
            name: name.to_string(),
            ty,
            direction: Direction::In,
            transfer: Transfer::None,
            nullable: false,
            caller_allocates: false,
            skip: false,
            closure_pos: None,
            destroy_pos: None,
            scope: ScopePolicy::Call,
        }
    }

    pub fn out(mut self) -> Self {
        self.direction = Direction::Out;
        self
    }

    pub fn inout(mut self) -> Self {
        self.direction = Direction::InOut;
        self
    }

    pub fn transfer(mut self, transfer: Transfer) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn caller_allocates(mut self) -> Self {
        self.caller_allocates = true;
        self
    }

    pub fn skipped(mut self) -> Self {
        self.skip = true;
        self
    }

    /// Mark a callback argument with its companion positions and scope.
    pub fn callback_positions(
        mut self,
        closure_pos: Option<usize>,
        destroy_pos: Option<usize>,
        scope: ScopePolicy,
    ) -> Self {
        self.closure_pos = closure_pos;
        self.destroy_pos = destroy_pos;
        self.scope = scope;
        self
    }

    /// Mark this argument as the user-data slot of a callback at `own_pos`.
    pub fn user_data_at(mut self, own_pos: usize) -> Self {
        self.closure_pos = Some(own_pos);
        self
    }
}

/// Return slot of a callable.
#[derive(Clone, Debug)]
pub struct RetDesc {
    pub ty: TypeDesc,
    pub transfer: Transfer,
    /// The native return value exists but is not surfaced to the host.
    pub skip: bool,
}

impl RetDesc {
    pub fn void() -> Self {
        Self {
            ty: TypeDesc::Void,
            transfer: Transfer::None,
            skip: false,
        }
    }

    pub fn new(ty: TypeDesc, transfer: Transfer) -> Self {
        Self {
            ty,
            transfer,
            skip: false,
        }
    }
}

/// What kind of callable a descriptor denotes. The call context (implicit
/// receiver, constructor class argument) is derived from this.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CallableKind {
    Function,
    /// Takes an implicit receiver in native slot 0.
    Method,
    /// The leading host argument is the class and occupies no native slot.
    Constructor,
    /// A callback signature; never has an implicit receiver.
    Callback,
    /// A virtual method; the receiver appears like a method receiver.
    VirtualMethod,
}

/// Complete runtime description of one callable.
#[derive(Clone, Debug)]
pub struct CallableDesc {
    pub name: String,
    pub kind: CallableKind,
    pub args: Vec<ArgDesc>,
    pub ret: RetDesc,
    /// The callable reports failure through a trailing native error slot.
    pub throws: bool,
    /// For methods and constructors: the record or class the callable is
    /// defined on, used to unwrap the receiver and type the constructor
    /// result.
    pub container: Option<ContainerRef>,
    /// Resolved native entry point, if known.
    pub address: Option<usize>,
}

/// The type a method or constructor belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContainerRef {
    Class(ClassId),
    Record(RecordId),
}

impl CallableDesc {
    pub fn new(name: &str, kind: CallableKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            args: Vec::new(),
            ret: RetDesc::void(),
            throws: false,
            container: None,
            address: None,
        }
    }

    pub fn arg(mut self, arg: ArgDesc) -> Self {
        self.args.push(arg);
        self
    }

    pub fn returns(mut self, ty: TypeDesc, transfer: Transfer) -> Self {
        self.ret = RetDesc::new(ty, transfer);
        self
    }

    pub fn throws(mut self) -> Self {
        self.throws = true;
        self
    }

    pub fn container(mut self, container: ContainerRef) -> Self {
        self.container = Some(container);
        self
    }

    pub fn address(mut self, address: usize) -> Self {
        self.address = Some(address);
        self
    }

    /// Whether native slot 0 is an implicit receiver.
    pub fn is_method(&self) -> bool {
        matches!(self.kind, CallableKind::Method | CallableKind::VirtualMethod)
    }

    /// Whether the callable produces a primary return value.
    pub fn has_return(&self) -> bool {
        !self.ret.ty.is_void()
    }
}

/// One field of a record. Record-typed fields are embedded by value.
#[derive(Clone, Debug)]
pub struct FieldDesc {
    pub name: String,
    pub ty: TypeDesc,
    pub offset: usize,
}

/// Copy/free hooks of a registered boxed type.
#[derive(Copy, Clone, Debug)]
pub struct BoxedOps {
    pub copy: unsafe extern "C" fn(*mut c_void) -> *mut c_void,
    pub free: unsafe extern "C" fn(*mut c_void),
}

/// Distinguished record shapes with type-specific marshaling shortcuts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WellKnown {
    /// A generic tagged value container ([`crate::native::ValueBox`]).
    OpaqueValue,
    /// A dynamic-variant container; exchanged as an opaque boxed handle.
    Variant,
    /// A closure container wrapping a host callable; requires
    /// [`RecordDesc::closure_signature`].
    ClosureContainer,
}

/// Runtime description of a structured record type.
#[derive(Clone, Debug)]
pub struct RecordDesc {
    pub name: String,
    pub fields: Vec<FieldDesc>,
    pub size: usize,
    pub align: usize,
    pub boxed: Option<BoxedOps>,
    pub well_known: Option<WellKnown>,
    pub closure_signature: Option<CallableId>,
}

/// Runtime description of an enum or flags type, including its native
/// storage width (which may differ from the 32-bit default).
#[derive(Clone, Debug)]
pub struct EnumDesc {
    pub name: String,
    /// Integer tag naming the native storage width.
    pub storage: TypeDesc,
    pub values: Vec<(String, i64)>,
    pub flags: bool,
}

impl EnumDesc {
    /// Look up the native value for a symbolic name.
    pub fn value_of(&self, name: &str) -> Option<i64> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// Look up the symbolic name for a native value.
    pub fn name_of(&self, value: i64) -> Option<&str> {
        self.values
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(n, _)| n.as_str())
    }
}

/// Runtime description of a reference-counted object class.
#[derive(Clone, Debug)]
pub struct ClassDesc {
    pub name: String,
    /// Acquire one reference; returns the pointer for chaining.
    pub ref_fn: Option<unsafe extern "C" fn(*mut c_void) -> *mut c_void>,
    /// Release one reference.
    pub unref_fn: Option<unsafe extern "C" fn(*mut c_void)>,
    /// Probe the current reference count, when the object model exposes it.
    pub ref_count_fn: Option<unsafe extern "C" fn(*mut c_void) -> usize>,
    /// Instances start with a floating reference; returns from constructors
    /// and host callbacks force full transfer for such classes.
    pub initially_unowned: bool,
}

impl ClassDesc {
    pub fn opaque(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ref_fn: None,
            unref_fn: None,
            ref_count_fn: None,
            initially_unowned: false,
        }
    }
}

/// The injected, append-only descriptor collection.
///
/// Built once by the embedder (typically from a reflective type catalog),
/// then frozen behind an `Arc` and shared read-only with the engine.
#[derive(Default)]
pub struct Catalog {
    records: Vec<RecordDesc>,
    enums: Vec<EnumDesc>,
    classes: Vec<ClassDesc>,
    callables: Vec<Arc<CallableDesc>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plain structured record; field offsets and total size are
    /// computed with native C layout rules.
    pub fn add_record(&mut self, name: &str, fields: &[(&str, TypeDesc)]) -> RecordId {
        let (fields, size, align) = layout::lay_out_fields(self, fields);
        self.push_record(RecordDesc {
            name: name.to_string(),
            fields,
            size,
            align,
            boxed: None,
            well_known: None,
            closure_signature: None,
        })
    }

    /// Register an opaque boxed type exchanged by handle.
    pub fn add_boxed(&mut self, name: &str, ops: BoxedOps) -> RecordId {
        self.push_record(RecordDesc {
            name: name.to_string(),
            fields: Vec::new(),
            size: std::mem::size_of::<*const c_void>(),
            align: std::mem::align_of::<*const c_void>(),
            boxed: Some(ops),
            well_known: None,
            closure_signature: None,
        })
    }

    /// Register a record with a distinguished well-known shape.
    pub fn add_well_known(
        &mut self,
        name: &str,
        shape: WellKnown,
        closure_signature: Option<CallableId>,
    ) -> RecordId {
        let size = match shape {
            WellKnown::OpaqueValue => crate::native::VALUE_BOX_SIZE,
            _ => std::mem::size_of::<*const c_void>(),
        };
        self.push_record(RecordDesc {
            name: name.to_string(),
            fields: Vec::new(),
            size,
            align: std::mem::align_of::<*const c_void>(),
            boxed: None,
            well_known: Some(shape),
            closure_signature,
        })
    }

    /// Register a fully built record descriptor.
    pub fn push_record(&mut self, desc: RecordDesc) -> RecordId {
        let id = RecordId(self.records.len() as u32);
        self.records.push(desc);
        id
    }

    pub fn add_enum(
        &mut self,
        name: &str,
        storage: TypeDesc,
        values: &[(&str, i64)],
        flags: bool,
    ) -> EnumId {
        let id = EnumId(self.enums.len() as u32);
        self.enums.push(EnumDesc {
            name: name.to_string(),
            storage,
            values: values
                .iter()
                .map(|(n, v)| (n.to_string(), *v))
                .collect(),
            flags,
        });
        id
    }

    pub fn add_class(&mut self, desc: ClassDesc) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(desc);
        id
    }

    pub fn add_callable(&mut self, desc: CallableDesc) -> CallableId {
        let id = CallableId(self.callables.len() as u32);
        self.callables.push(Arc::new(desc));
        id
    }

    /// Store a resolved native address on a callable descriptor.
    pub fn set_address(&mut self, id: CallableId, address: usize) -> bool {
        match self.callables.get_mut(id.0 as usize) {
            Some(desc) => {
                Arc::make_mut(desc).address = Some(address);
                true
            }
            None => false,
        }
    }

    pub fn record(&self, id: RecordId) -> Option<&RecordDesc> {
        self.records.get(id.0 as usize)
    }

    pub fn enum_(&self, id: EnumId) -> Option<&EnumDesc> {
        self.enums.get(id.0 as usize)
    }

    pub fn class(&self, id: ClassId) -> Option<&ClassDesc> {
        self.classes.get(id.0 as usize)
    }

    pub fn callable(&self, id: CallableId) -> Option<&Arc<CallableDesc>> {
        self.callables.get(id.0 as usize)
    }

    /// Find a callable by name.
    pub fn callable_by_name(&self, name: &str) -> Option<(CallableId, &Arc<CallableDesc>)> {
        self.callables
            .iter()
            .enumerate()
            .find(|(_, c)| c.name == name)
            .map(|(i, c)| (CallableId(i as u32), c))
    }

    /// Iterate all registered callables.
    pub fn callables(&self) -> impl Iterator<Item = (CallableId, &Arc<CallableDesc>)> {
        self.callables
            .iter()
            .enumerate()
            .map(|(i, c)| (CallableId(i as u32), c))
    }
}
