//! Mark phase: trace the object graph from the root set, setting mark bits
//! (SPEC_FULL §4.5).
//!
//! Grounded on `neptune/src/gc2.rs`'s `Marking::scan_obj`/`mark_obj`/
//! `push_root`, which dispatch on `vt == jl_*_type` and recurse field by
//! field. Neptune recurses with a depth counter and spills to an overflow
//! queue past a fixed depth; here the whole traversal uses one explicit
//! `Vec` mark stack from the start (SPEC_FULL §9, "unbounded recursion
//! risk"), since the mark bit is set at push time, not pop time, so a cell
//! can never be pushed twice regardless of how the stack is driven.

use crate::header::header_of;
use crate::runtime::{Kind, ObjPtr, RootSet, Tracer};

/// Mark `obj` and transitively everything reachable from it, then drain
/// until the stack is empty. Idempotent: marking an already-marked object
/// is a no-op.
fn mark(obj: ObjPtr, stack: &mut Vec<ObjPtr>) {
    unsafe {
        let hdr = header_of(obj.as_non_null());
        if hdr.marked() {
            return;
        }
        hdr.set_marked(true);
    }
    stack.push(obj);
}

fn push_if_some(obj: Option<ObjPtr>, stack: &mut Vec<ObjPtr>) {
    if let Some(o) = obj {
        mark(o, stack);
    }
}

/// Expand one popped object's outbound references onto the stack,
/// dispatching on its `Kind` (SPEC_FULL §4.5 "Dispatch cases").
fn scan(obj: ObjPtr, tracer: &dyn Tracer, stack: &mut Vec<ObjPtr>) {
    match tracer.kind(obj) {
        Kind::PlainBits => {}
        Kind::ArrayLike => {
            let refs = tracer.array_refs(obj);
            push_if_some(refs.descriptor, stack);
            push_if_some(refs.buffer, stack);
            if !refs.elements_are_plain_bits {
                for el in refs.elements {
                    push_if_some(el, stack);
                }
            }
        }
        Kind::TupleLike => {
            for el in tracer.tuple_refs(obj).elements {
                push_if_some(el, stack);
            }
        }
        Kind::CompileInfo => {
            let refs = tracer.compile_info_refs(obj);
            push_if_some(refs.ast, stack);
            push_if_some(refs.static_params, stack);
            push_if_some(refs.type_fn_cache, stack);
            for root in refs.embedded_roots {
                push_if_some(root, stack);
            }
            push_if_some(refs.specialization_types, stack);
            push_if_some(refs.unspecialized, stack);
        }
        Kind::Closure => {
            let refs = tracer.closure_refs(obj);
            push_if_some(refs.environment, stack);
            push_if_some(refs.compile_info, stack);
        }
        Kind::TypeName => {
            push_if_some(tracer.type_name_refs(obj).primary_type, stack);
        }
        Kind::TypeDescriptor => {
            let refs = tracer.type_descriptor_refs(obj);
            push_if_some(refs.name, stack);
            push_if_some(refs.super_type, stack);
            push_if_some(refs.parameters, stack);
            push_if_some(refs.field_names, stack);
            push_if_some(refs.field_types, stack);
            push_if_some(refs.constructor, stack);
            push_if_some(refs.cached_instance, stack);
        }
        Kind::MethodTable => {
            let refs = tracer.method_table_refs(obj);
            for node in refs.definitions {
                mark_method_list_node(&node, stack);
            }
            for cache_entry in refs.cache_entries {
                mark(cache_entry, stack);
            }
        }
        Kind::Task => {
            let refs = tracer.task_refs(obj);
            push_if_some(refs.entry_function, stack);
            push_if_some(refs.exit_handler, stack);
            push_if_some(refs.result, stack);
            push_if_some(refs.exception_handler_task, stack);
        }
        Kind::Module => {
            mark_module(obj, tracer, stack);
        }
        Kind::Struct => {
            let n = tracer.struct_field_count(obj);
            for i in 0..n {
                push_if_some(tracer.struct_field(obj, i), stack);
            }
        }
    }
}

/// A method list node sets its own mark bit directly (it is itself a heap
/// cell) rather than being re-entered through `scan`'s `Kind` dispatch.
fn mark_method_list_node(node: &crate::runtime::MethodListNode, stack: &mut Vec<ObjPtr>) {
    unsafe {
        let hdr = header_of(node.node.as_non_null());
        if hdr.marked() {
            return;
        }
        hdr.set_marked(true);
    }
    push_if_some(node.sig, stack);
    push_if_some(node.tvars, stack);
    push_if_some(node.func, stack);
}

/// Modules are marked separately from the generic dispatcher: the module
/// cell itself, then each binding record (its own heap cell, mark bit set
/// directly), its value, and its declared type.
fn mark_module(module: ObjPtr, tracer: &dyn Tracer, stack: &mut Vec<ObjPtr>) {
    for binding in tracer.module_refs(module).bindings {
        unsafe {
            let hdr = header_of(binding.record.as_non_null());
            if hdr.marked() {
                continue;
            }
            hdr.set_marked(true);
        }
        push_if_some(binding.value, stack);
        push_if_some(binding.declared_type, stack);
    }
}

/// Mark every root and everything transitively reachable from it
/// (SPEC_FULL §4.7 step 1-2).
pub fn gc_mark(roots: &dyn RootSet, tracer: &dyn Tracer) {
    let mut stack = Vec::new();
    roots.enumerate_roots(&mut |obj| mark(obj, &mut stack));
    while let Some(obj) = stack.pop() {
        scan(obj, tracer, &mut stack);
    }
}
