//! The capability contract the host runtime implements so the collector can
//! trace its object graph without knowing the graph's concrete shape
//! (SPEC_FULL §1 OUT OF SCOPE, §4.5, §6).
//!
//! Grounded on `neptune/src/c_interface.rs`'s `JlValueMarker`/`JlValueLike`
//! traits (a marker/cast pair letting the core treat arbitrary host structs
//! as GC values) and on the dispatch shape of `neptune/src/gc2.rs`'s
//! `Marking::scan_obj`/`mark_obj`, which branch on `jl_simplevector_type`,
//! `jl_array_typename`, `jl_module_type`, `jl_task_type`, and otherwise fall
//! back to a generic field walk driven by `JlDatatypeLayout::nfields`. Since
//! the concrete `JlDatatype`/`JlArray`/`JlModule` struct layouts are
//! themselves out of scope for the core (SPEC_FULL §1), that `vt == jl_*`
//! chain is turned into an explicit `Kind` enum plus one typed accessor per
//! case, implemented by the host.

use std::ptr::NonNull;

/// A handle to a heap cell's payload. Never null: construct one only from a
/// pointer `allocate`/a root enumerator/a field accessor actually produced.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ObjPtr(NonNull<u8>);

impl ObjPtr {
    /// # Safety
    /// `ptr` must point at the payload of a live cell owned by this heap
    /// (i.e. `ptr - HEADER_SIZE` must be a valid `Header`).
    pub unsafe fn new_unchecked(ptr: NonNull<u8>) -> Self {
        ObjPtr(ptr)
    }

    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }

    pub fn as_non_null(self) -> NonNull<u8> {
        self.0
    }
}

/// The trace-dispatch classifier for a live object, replacing the host's
/// `is_array`/`is_tuple`/`is_struct_type`/… predicate pile with one
/// exhaustive match (SPEC_FULL §9 "Type-directed dispatch").
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Kind {
    /// A value with no outbound references at all.
    PlainBits,
    ArrayLike,
    TupleLike,
    CompileInfo,
    Closure,
    TypeName,
    TypeDescriptor,
    MethodTable,
    Task,
    Module,
    /// Anything else: a generic struct instance, walked field-by-field.
    Struct,
}

#[derive(Default, Clone)]
pub struct ArrayRefs {
    /// The array's shape/descriptor object.
    pub descriptor: Option<ObjPtr>,
    /// The backing buffer's header, if the payload is not inlined in the
    /// array cell itself.
    pub buffer: Option<ObjPtr>,
    /// True if the element type carries no references (skip `elements`).
    pub elements_are_plain_bits: bool,
    pub elements: Vec<Option<ObjPtr>>,
}

#[derive(Default, Clone)]
pub struct TupleRefs {
    pub elements: Vec<Option<ObjPtr>>,
}

#[derive(Default, Clone)]
pub struct CompileInfoRefs {
    pub ast: Option<ObjPtr>,
    pub static_params: Option<ObjPtr>,
    pub type_fn_cache: Option<ObjPtr>,
    pub embedded_roots: Vec<Option<ObjPtr>>,
    pub specialization_types: Option<ObjPtr>,
    pub unspecialized: Option<ObjPtr>,
}

#[derive(Default, Clone)]
pub struct ClosureRefs {
    pub environment: Option<ObjPtr>,
    pub compile_info: Option<ObjPtr>,
}

#[derive(Default, Clone)]
pub struct TypeNameRefs {
    pub primary_type: Option<ObjPtr>,
}

#[derive(Default, Clone)]
pub struct TypeDescriptorRefs {
    pub name: Option<ObjPtr>,
    pub super_type: Option<ObjPtr>,
    pub parameters: Option<ObjPtr>,
    /// Struct-only fields; `None` for tag/bits type descriptors.
    pub field_names: Option<ObjPtr>,
    pub field_types: Option<ObjPtr>,
    pub constructor: Option<ObjPtr>,
    pub cached_instance: Option<ObjPtr>,
}

/// One node of a method table's definition or cache list, plus the
/// signature/type-variables/function it carries. The node itself is a
/// heap cell: `mark_method_table` sets its mark bit directly rather than
/// re-entering the generic dispatcher (SPEC_FULL §4.5, "Method list
/// traversal sets the `marked` bit directly on the list node").
#[derive(Clone)]
pub struct MethodListNode {
    pub node: ObjPtr,
    pub sig: Option<ObjPtr>,
    pub tvars: Option<ObjPtr>,
    pub func: Option<ObjPtr>,
}

#[derive(Default, Clone)]
pub struct MethodTableRefs {
    pub definitions: Vec<MethodListNode>,
    /// One-argument cache slots: plain references, no further structure.
    pub cache_entries: Vec<ObjPtr>,
}

#[derive(Default, Clone)]
pub struct TaskRefs {
    pub entry_function: Option<ObjPtr>,
    pub exit_handler: Option<ObjPtr>,
    pub result: Option<ObjPtr>,
    pub exception_handler_task: Option<ObjPtr>,
}

/// One occupied slot of a module's binding table. Like a method list node,
/// the binding record is itself a heap cell whose mark bit is set directly
/// (SPEC_FULL §4.5, "Modules are marked separately").
#[derive(Clone)]
pub struct BindingRef {
    pub record: ObjPtr,
    pub value: Option<ObjPtr>,
    pub declared_type: Option<ObjPtr>,
}

#[derive(Default, Clone)]
pub struct ModuleRefs {
    pub bindings: Vec<BindingRef>,
}

/// The capability the core consumes to trace the host's object graph
/// (SPEC_FULL §1 "Tracer", §6). Must not allocate (SPEC_FULL §5
/// "Re-entrancy").
pub trait Tracer {
    fn kind(&self, obj: ObjPtr) -> Kind;

    fn array_refs(&self, obj: ObjPtr) -> ArrayRefs {
        let _ = obj;
        ArrayRefs::default()
    }
    fn tuple_refs(&self, obj: ObjPtr) -> TupleRefs {
        let _ = obj;
        TupleRefs::default()
    }
    fn compile_info_refs(&self, obj: ObjPtr) -> CompileInfoRefs {
        let _ = obj;
        CompileInfoRefs::default()
    }
    fn closure_refs(&self, obj: ObjPtr) -> ClosureRefs {
        let _ = obj;
        ClosureRefs::default()
    }
    fn type_name_refs(&self, obj: ObjPtr) -> TypeNameRefs {
        let _ = obj;
        TypeNameRefs::default()
    }
    fn type_descriptor_refs(&self, obj: ObjPtr) -> TypeDescriptorRefs {
        let _ = obj;
        TypeDescriptorRefs::default()
    }
    fn method_table_refs(&self, obj: ObjPtr) -> MethodTableRefs {
        let _ = obj;
        MethodTableRefs::default()
    }
    fn task_refs(&self, obj: ObjPtr) -> TaskRefs {
        let _ = obj;
        TaskRefs::default()
    }
    fn module_refs(&self, obj: ObjPtr) -> ModuleRefs {
        let _ = obj;
        ModuleRefs::default()
    }

    /// Generic struct fallback: number of fields, and the `i`th field's
    /// reference (or `None` if that field isn't a reference or is null).
    fn struct_field_count(&self, obj: ObjPtr) -> usize {
        let _ = obj;
        0
    }
    fn struct_field(&self, obj: ObjPtr, i: usize) -> Option<ObjPtr> {
        let _ = (obj, i);
        None
    }
}

/// The capability the core consumes to find the initial root set
/// (SPEC_FULL §1 "RootSet", §4.7). Must not allocate.
pub trait RootSet {
    fn enumerate_roots(&self, visit: &mut dyn FnMut(ObjPtr));
}
