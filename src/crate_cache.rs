//! Per-(domain × crate) memoization (L5, §4.4): dynamic libraries, C
//! symbols, inter-crate ("rost") symbols, and a structurally-interned
//! type-descriptor pool. One `CrateCache` exists per distinct crate image a
//! domain has touched; `Domain::get_cache` finds-or-creates and bumps its
//! refcount, matching `rost_dom::get_cache` in the original runtime.

use crate::crate_image::{MemArea, RostCrate};
use crate::dwarf;
use crate::error::FailCode;
use crate::loader::Loader;
use std::collections::HashMap;
use std::rc::Rc;

pub struct Lib {
    pub handle: usize,
}

pub struct CSym {
    pub val: usize,
}

pub struct RostSym {
    pub val: usize,
}

/// A type descriptor as the runtime knows it: the compiler-known prefix
/// plus the runtime-only suffix (here, owned child descriptors rather than
/// a flexible array member and a `UT_hash_handle`).
#[derive(Debug)]
pub struct TypeDesc {
    pub size: usize,
    pub align: usize,
    pub copy_glue_off: usize,
    pub drop_glue_off: usize,
    pub free_glue_off: usize,
    pub mark_glue_off: usize,
    pub obj_drop_glue_off: usize,
    pub descs: Vec<Rc<TypeDesc>>,
}

/// Structural interning key: two type descriptors with the same shape are
/// the same descriptor, regardless of which call site asked for them
/// first — matches the open hash keyed by `(size, align, n_descs, descs…)`
/// in §4.4.
#[derive(Clone, PartialEq, Eq, Hash)]
struct TypeDescKey {
    size: usize,
    align: usize,
    child_ptrs: Vec<usize>,
}

impl TypeDescKey {
    fn new(size: usize, align: usize, descs: &[Rc<TypeDesc>]) -> TypeDescKey {
        TypeDescKey {
            size,
            align,
            child_ptrs: descs.iter().map(|d| Rc::as_ptr(d) as usize).collect(),
        }
    }
}

pub struct CrateCache {
    /// The crate image this cache memoizes symbols for. A raw pointer
    /// because `RostCrate` is compiler-emitted data the cache never owns.
    crate_image: *const RostCrate,

    libs: Vec<Option<Rc<Lib>>>,
    c_syms: Vec<Option<Rc<CSym>>>,
    rost_syms: Vec<Option<Rc<RostSym>>>,
    type_descs: HashMap<TypeDescKey, Rc<TypeDesc>>,
}

impl CrateCache {
    pub fn new(crate_image: *const RostCrate) -> CrateCache {
        let image = unsafe { &*crate_image };
        CrateCache {
            crate_image,
            libs: (0..image.n_libs).map(|_| None).collect(),
            c_syms: (0..image.n_c_syms).map(|_| None).collect(),
            rost_syms: (0..image.n_rost_syms).map(|_| None).collect(),
            type_descs: HashMap::new(),
        }
    }

    pub fn crate_image(&self) -> &RostCrate {
        unsafe { &*self.crate_image }
    }

    /// Finds-or-opens the library at compiler-assigned slot `n`.
    pub fn get_lib(
        &mut self,
        n: usize,
        name: &str,
        loader: &dyn Loader,
    ) -> Result<Rc<Lib>, FailCode> {
        if let Some(lib) = &self.libs[n] {
            return Ok(lib.clone());
        }
        let handle = loader.open(name).map_err(|_| FailCode::CSymUnresolved)?;
        let lib = Rc::new(Lib { handle });
        self.libs[n] = Some(lib.clone());
        Ok(lib)
    }

    /// Finds-or-resolves the C symbol at compiler-assigned slot `n`.
    pub fn get_c_sym(
        &mut self,
        n: usize,
        library: &Rc<Lib>,
        name: &str,
        loader: &dyn Loader,
    ) -> Result<Rc<CSym>, FailCode> {
        if let Some(sym) = &self.c_syms[n] {
            return Ok(sym.clone());
        }
        let val = loader
            .sym(library.handle, name)
            .ok_or(FailCode::CSymUnresolved)?;
        let sym = Rc::new(CSym { val });
        self.c_syms[n] = Some(sym.clone());
        Ok(sym)
    }

    /// Finds-or-resolves the inter-crate symbol at compiler-assigned slot
    /// `n`. `crate_sym` must resolve to the address of the target crate's
    /// `rost_crate` record; `path` is the dotted name path into that
    /// crate's debug info.
    pub fn get_rost_sym(
        &mut self,
        n: usize,
        crate_sym: &Rc<CSym>,
        path: &[&str],
    ) -> Result<Rc<RostSym>, FailCode> {
        if let Some(sym) = &self.rost_syms[n] {
            return Ok(sym.clone());
        }
        let target = unsafe { &*(crate_sym.val as *const RostCrate) };
        let offset = dwarf::resolve_path(target.get_debug_info(), target.get_debug_abbrev(), path)
            .ok_or(FailCode::RostSymUnresolved)?;
        let val = target.get_image_base() + offset;
        let sym = Rc::new(RostSym { val });
        self.rost_syms[n] = Some(sym.clone());
        Ok(sym)
    }

    /// Finds-or-interns a type descriptor by structural shape.
    pub fn get_type_desc(
        &mut self,
        size: usize,
        align: usize,
        glue: TypeDescGlue,
        descs: Vec<Rc<TypeDesc>>,
    ) -> Rc<TypeDesc> {
        let key = TypeDescKey::new(size, align, &descs);
        if let Some(existing) = self.type_descs.get(&key) {
            return existing.clone();
        }
        let desc = Rc::new(TypeDesc {
            size,
            align,
            copy_glue_off: glue.copy_glue_off,
            drop_glue_off: glue.drop_glue_off,
            free_glue_off: glue.free_glue_off,
            mark_glue_off: glue.mark_glue_off,
            obj_drop_glue_off: glue.obj_drop_glue_off,
            descs,
        });
        self.type_descs.insert(key, desc.clone());
        desc
    }

    pub fn type_desc_count(&self) -> usize {
        self.type_descs.len()
    }
}

/// The non-structural, glue-pointer part of a type descriptor — held apart
/// from `(size, align, descs)` since glue offsets don't participate in
/// structural identity.
#[derive(Copy, Clone, Default)]
pub struct TypeDescGlue {
    pub copy_glue_off: usize,
    pub drop_glue_off: usize,
    pub free_glue_off: usize,
    pub mark_glue_off: usize,
    pub obj_drop_glue_off: usize,
}

#[allow(dead_code)]
fn debug_area_unused(_: MemArea) {}
