//! Thin FFI boundary for C hosts that cannot thread a Rust `&mut Heap`
//! through their own call stack (SPEC_FULL §9 "Process-wide state").
//!
//! Grounded on `neptune/src/c_interface.rs`'s exported `neptune_*` functions
//! and its `static mut PAGE_MGR`/`static mut REGIONS` globals: Rust cannot
//! put a non-`'static`, drop-bearing value in a `static` safely, so this
//! module keeps one lazily-initialized global `Heap` and exposes
//! `#[no_mangle] extern "C"` entry points that borrow it, exactly as
//! Neptune's page manager and region table are kept as bare globals behind
//! `unsafe`-gated accessors. The `Tracer`/`RootSet` capabilities themselves
//! are flattened into small vtables of function pointers (`CTracerVTable`/
//! `CRootSetVTable`) rather than one function per `Kind` accessor: the
//! Rust-level `runtime::Tracer` trait stays the rich interface for native
//! embedders, and this is the reduced, cross-language projection of it —
//! analogous to how `neptune/src/c_interface.rs` already flattens Julia's
//! `jl_datatype_t` field reads into `np_jl_field_isptr`/`np_jl_field_offset`.

use crate::heap::{GcStats, Heap};
use crate::page::OsPageSource;
use crate::runtime::{
    ArrayRefs, ClosureRefs, CompileInfoRefs, Kind, MethodTableRefs, ModuleRefs, ObjPtr, RootSet,
    TaskRefs, Tracer, TupleRefs, TypeDescriptorRefs, TypeNameRefs,
};
use libc::c_void;
use std::ptr::NonNull;

/// A reference the C host reports back, or null for "no reference".
pub type CObjPtr = *mut c_void;

/// Flattened payload for one `Tracer` dispatch case. Which fields are
/// meaningful depends on the `Kind` the call was made for; unused fixed
/// slots must be null and `list`/`list_len` must be empty when the case has
/// no variable-length children (SPEC_FULL §9 "Type-directed dispatch").
///
/// Fixed-slot meaning by `Kind` (`fixed[0..]`, left to right):
/// - `ArrayLike`: descriptor, buffer. `flag` = `elements_are_plain_bits`, `list` = elements.
/// - `TupleLike`: (none). `list` = elements.
/// - `CompileInfo`: ast, static_params, type_fn_cache, specialization_types, unspecialized. `list` = embedded_roots.
/// - `Closure`: environment, compile_info.
/// - `TypeName`: primary_type.
/// - `TypeDescriptor`: name, super_type, parameters, field_names, field_types, constructor, cached_instance.
/// - `MethodTable`: (none). `list` = cache_entries. Method list nodes are reported through `method_defs`, below.
/// - `Task`: entry_function, exit_handler, result, exception_handler_task.
/// - `Module`: (none); bindings are reported through `module_bindings`, below.
#[repr(C)]
pub struct CRefs {
    pub fixed: [CObjPtr; 7],
    pub flag: u8,
    pub list: *const CObjPtr,
    pub list_len: usize,
}

impl Default for CRefs {
    fn default() -> Self {
        CRefs {
            fixed: [std::ptr::null_mut(); 7],
            flag: 0,
            list: std::ptr::null(),
            list_len: 0,
        }
    }
}

/// One method-list-node entry as reported by `CTracerVTable::method_defs`.
#[repr(C)]
pub struct CMethodListNode {
    pub node: CObjPtr,
    pub sig: CObjPtr,
    pub tvars: CObjPtr,
    pub func: CObjPtr,
}

/// One occupied module binding slot as reported by `CTracerVTable::module_bindings`.
#[repr(C)]
pub struct CBindingRef {
    pub record: CObjPtr,
    pub value: CObjPtr,
    pub declared_type: CObjPtr,
}

/// Function-pointer table the C host installs once at `cellmark_gc_init`
/// time to answer `Tracer` queries.
#[repr(C)]
pub struct CTracerVTable {
    pub kind: extern "C" fn(ctx: *mut c_void, obj: CObjPtr) -> u32,
    pub refs: extern "C" fn(ctx: *mut c_void, obj: CObjPtr, kind: u32) -> CRefs,
    pub method_defs: extern "C" fn(
        ctx: *mut c_void,
        obj: CObjPtr,
        out: *mut CMethodListNode,
        cap: usize,
    ) -> usize,
    pub module_bindings: extern "C" fn(
        ctx: *mut c_void,
        obj: CObjPtr,
        out: *mut CBindingRef,
        cap: usize,
    ) -> usize,
    pub struct_field_count: extern "C" fn(ctx: *mut c_void, obj: CObjPtr) -> usize,
    pub struct_field: extern "C" fn(ctx: *mut c_void, obj: CObjPtr, index: usize) -> CObjPtr,
}

/// Function-pointer table the C host installs to answer `RootSet` queries.
#[repr(C)]
pub struct CRootSetVTable {
    pub enumerate_roots: extern "C" fn(
        ctx: *mut c_void,
        visit: extern "C" fn(visit_ctx: *mut c_void, obj: CObjPtr),
        visit_ctx: *mut c_void,
    ),
}

/// Adapts a C host's vtables + opaque context pointer into the `Tracer`/
/// `RootSet` traits the core consumes.
pub struct CRuntime {
    ctx: *mut c_void,
    tracer: CTracerVTable,
    roots: CRootSetVTable,
}

fn obj_to_c(obj: ObjPtr) -> CObjPtr {
    obj.as_ptr() as CObjPtr
}

fn c_to_obj(p: CObjPtr) -> Option<ObjPtr> {
    NonNull::new(p as *mut u8).map(|p| unsafe { ObjPtr::new_unchecked(p) })
}

/// Collect up to `refs.list_len` entries out of a `CRefs::list` buffer.
unsafe fn collect_list(refs: &CRefs) -> Vec<Option<ObjPtr>> {
    if refs.list.is_null() || refs.list_len == 0 {
        return Vec::new();
    }
    std::slice::from_raw_parts(refs.list, refs.list_len)
        .iter()
        .map(|&p| c_to_obj(p))
        .collect()
}

impl Tracer for CRuntime {
    fn kind(&self, obj: ObjPtr) -> Kind {
        match (self.tracer.kind)(self.ctx, obj_to_c(obj)) {
            0 => Kind::PlainBits,
            1 => Kind::ArrayLike,
            2 => Kind::TupleLike,
            3 => Kind::CompileInfo,
            4 => Kind::Closure,
            5 => Kind::TypeName,
            6 => Kind::TypeDescriptor,
            7 => Kind::MethodTable,
            8 => Kind::Task,
            9 => Kind::Module,
            _ => Kind::Struct,
        }
    }

    fn array_refs(&self, obj: ObjPtr) -> ArrayRefs {
        let r = (self.tracer.refs)(self.ctx, obj_to_c(obj), 1);
        unsafe {
            ArrayRefs {
                descriptor: c_to_obj(r.fixed[0]),
                buffer: c_to_obj(r.fixed[1]),
                elements_are_plain_bits: r.flag != 0,
                elements: collect_list(&r),
            }
        }
    }

    fn tuple_refs(&self, obj: ObjPtr) -> TupleRefs {
        let r = (self.tracer.refs)(self.ctx, obj_to_c(obj), 2);
        TupleRefs {
            elements: unsafe { collect_list(&r) },
        }
    }

    fn compile_info_refs(&self, obj: ObjPtr) -> CompileInfoRefs {
        let r = (self.tracer.refs)(self.ctx, obj_to_c(obj), 3);
        unsafe {
            CompileInfoRefs {
                ast: c_to_obj(r.fixed[0]),
                static_params: c_to_obj(r.fixed[1]),
                type_fn_cache: c_to_obj(r.fixed[2]),
                embedded_roots: collect_list(&r),
                specialization_types: c_to_obj(r.fixed[3]),
                unspecialized: c_to_obj(r.fixed[4]),
            }
        }
    }

    fn closure_refs(&self, obj: ObjPtr) -> ClosureRefs {
        let r = (self.tracer.refs)(self.ctx, obj_to_c(obj), 4);
        ClosureRefs {
            environment: c_to_obj(r.fixed[0]),
            compile_info: c_to_obj(r.fixed[1]),
        }
    }

    fn type_name_refs(&self, obj: ObjPtr) -> TypeNameRefs {
        let r = (self.tracer.refs)(self.ctx, obj_to_c(obj), 5);
        TypeNameRefs {
            primary_type: c_to_obj(r.fixed[0]),
        }
    }

    fn type_descriptor_refs(&self, obj: ObjPtr) -> TypeDescriptorRefs {
        let r = (self.tracer.refs)(self.ctx, obj_to_c(obj), 6);
        TypeDescriptorRefs {
            name: c_to_obj(r.fixed[0]),
            super_type: c_to_obj(r.fixed[1]),
            parameters: c_to_obj(r.fixed[2]),
            field_names: c_to_obj(r.fixed[3]),
            field_types: c_to_obj(r.fixed[4]),
            constructor: c_to_obj(r.fixed[5]),
            cached_instance: c_to_obj(r.fixed[6]),
        }
    }

    fn method_table_refs(&self, obj: ObjPtr) -> MethodTableRefs {
        let r = (self.tracer.refs)(self.ctx, obj_to_c(obj), 7);
        let cache_entries = unsafe { collect_list(&r) }.into_iter().flatten().collect();

        let mut buf: Vec<CMethodListNode> = Vec::with_capacity(64);
        let n = loop {
            let cap = buf.capacity();
            buf.resize_with(cap, || CMethodListNode {
                node: std::ptr::null_mut(),
                sig: std::ptr::null_mut(),
                tvars: std::ptr::null_mut(),
                func: std::ptr::null_mut(),
            });
            let written =
                (self.tracer.method_defs)(self.ctx, obj_to_c(obj), buf.as_mut_ptr(), cap);
            if written <= cap {
                break written;
            }
            buf.reserve(written - cap);
        };
        buf.truncate(n);

        let definitions = buf
            .into_iter()
            .filter_map(|n| {
                c_to_obj(n.node).map(|node| crate::runtime::MethodListNode {
                    node,
                    sig: c_to_obj(n.sig),
                    tvars: c_to_obj(n.tvars),
                    func: c_to_obj(n.func),
                })
            })
            .collect();

        MethodTableRefs {
            definitions,
            cache_entries,
        }
    }

    fn task_refs(&self, obj: ObjPtr) -> TaskRefs {
        let r = (self.tracer.refs)(self.ctx, obj_to_c(obj), 8);
        TaskRefs {
            entry_function: c_to_obj(r.fixed[0]),
            exit_handler: c_to_obj(r.fixed[1]),
            result: c_to_obj(r.fixed[2]),
            exception_handler_task: c_to_obj(r.fixed[3]),
        }
    }

    fn module_refs(&self, obj: ObjPtr) -> ModuleRefs {
        let mut buf: Vec<CBindingRef> = Vec::with_capacity(64);
        let n = loop {
            let cap = buf.capacity();
            buf.resize_with(cap, || CBindingRef {
                record: std::ptr::null_mut(),
                value: std::ptr::null_mut(),
                declared_type: std::ptr::null_mut(),
            });
            let written =
                (self.tracer.module_bindings)(self.ctx, obj_to_c(obj), buf.as_mut_ptr(), cap);
            if written <= cap {
                break written;
            }
            buf.reserve(written - cap);
        };
        buf.truncate(n);

        let bindings = buf
            .into_iter()
            .filter_map(|b| {
                c_to_obj(b.record).map(|record| crate::runtime::BindingRef {
                    record,
                    value: c_to_obj(b.value),
                    declared_type: c_to_obj(b.declared_type),
                })
            })
            .collect();

        ModuleRefs { bindings }
    }

    fn struct_field_count(&self, obj: ObjPtr) -> usize {
        (self.tracer.struct_field_count)(self.ctx, obj_to_c(obj))
    }

    fn struct_field(&self, obj: ObjPtr, i: usize) -> Option<ObjPtr> {
        c_to_obj((self.tracer.struct_field)(self.ctx, obj_to_c(obj), i))
    }
}

extern "C" fn forward_root(visit_ctx: *mut c_void, obj: CObjPtr) {
    unsafe {
        let visit = &mut *(visit_ctx as *mut &mut dyn FnMut(ObjPtr));
        if let Some(o) = c_to_obj(obj) {
            visit(o);
        }
    }
}

impl RootSet for CRuntime {
    fn enumerate_roots(&self, visit: &mut dyn FnMut(ObjPtr)) {
        let mut visit_ref: &mut dyn FnMut(ObjPtr) = visit;
        let visit_ctx = &mut visit_ref as *mut &mut dyn FnMut(ObjPtr) as *mut c_void;
        (self.roots.enumerate_roots)(self.ctx, forward_root, visit_ctx);
    }
}

/// Process-wide collector state for C hosts, set up once by
/// `cellmark_gc_init`.
static mut GC: Option<Heap<OsPageSource>> = None;
static mut RUNTIME: Option<CRuntime> = None;

/// Initialize the global heap and install the host's capability vtables.
///
/// # Safety
/// Must be called exactly once, before any other `cellmark_gc_*` function,
/// from the single thread that will drive the mutator.
#[no_mangle]
pub unsafe extern "C" fn cellmark_gc_init(
    ctx: *mut c_void,
    tracer: CTracerVTable,
    roots: CRootSetVTable,
) {
    GC = Some(Heap::init());
    RUNTIME = Some(CRuntime { ctx, tracer, roots });
}

/// # Safety
/// Must be called after `cellmark_gc_init`.
#[no_mangle]
pub unsafe extern "C" fn cellmark_gc_allocate(sz: usize) -> CObjPtr {
    let heap = GC.as_mut().unwrap();
    let rt = RUNTIME.as_ref().unwrap();
    obj_to_c(heap.allocate(rt, rt, sz))
}

/// # Safety
/// Must be called after `cellmark_gc_init`.
#[no_mangle]
pub unsafe extern "C" fn cellmark_gc_collect() {
    let heap = GC.as_mut().unwrap();
    let rt = RUNTIME.as_ref().unwrap();
    heap.collect(rt, rt);
}

/// Re-entrant mark, callable only from within a trace callback invoked by
/// `cellmark_gc_collect` (SPEC_FULL §6 "mark(obj)").
///
/// # Safety
/// `obj` must be a live payload this heap produced, and this must be called
/// only while `cellmark_gc_collect` is on the stack (i.e. from within a
/// `CTracerVTable` callback).
#[no_mangle]
pub unsafe extern "C" fn cellmark_gc_mark(obj: CObjPtr) {
    match c_to_obj(obj) {
        Some(o) => GC.as_mut().unwrap().mark(o),
        None => crate::error::fatal_with(
            crate::error::GcError::TraceIntoNull,
            "cellmark_gc_mark called with a null payload",
        ),
    }
}

#[repr(C)]
pub struct CGcStats {
    pub pool_allocations: u64,
    pub big_allocations: u64,
    pub bytes_allocated: u64,
    pub collections: u64,
    pub pages_freed: u64,
}

impl From<GcStats> for CGcStats {
    fn from(s: GcStats) -> Self {
        CGcStats {
            pool_allocations: s.pool_allocations,
            big_allocations: s.big_allocations,
            bytes_allocated: s.bytes_allocated,
            collections: s.collections,
            pages_freed: s.pages_freed,
        }
    }
}

/// # Safety
/// Must be called after `cellmark_gc_init`.
#[no_mangle]
pub unsafe extern "C" fn cellmark_gc_stats() -> CGcStats {
    GC.as_ref().unwrap().stats().into()
}
