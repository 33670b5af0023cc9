//! Binding to a compiled KenLM-style scorer.
//!
//! The library is opened with `libloading` and must export the `smtlm_*`
//! functions below. Model and pool lifetimes are owned on this side: the
//! model is freed on drop, pools by [`super::MemoryPool`].

use std::ffi::{c_char, c_int, c_void, CString};
use std::path::Path;

use libloading::Library;
use tracing::info;

use super::{BackendError, NgramBackend, PoolHandle, StateProb};
use crate::ff::NativeState;
use crate::vocab::WordId;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct RawStateProb {
    state: u64,
    prob: f32,
}

type LoadFn = unsafe extern "C" fn(*const c_char) -> *mut c_void;
type DestroyFn = unsafe extern "C" fn(*mut c_void);
type OrderFn = unsafe extern "C" fn(*const c_void) -> c_int;
type RegisterWordFn = unsafe extern "C" fn(*mut c_void, *const c_char, c_int) -> bool;
type ProbFn = unsafe extern "C" fn(*const c_void, *const c_int, usize) -> f32;
type SequenceProbFn = unsafe extern "C" fn(*const c_void, *const c_int, usize, usize) -> f32;
type ProbRuleFn = unsafe extern "C" fn(*const c_void, i64, *const i64, usize) -> RawStateProb;
type EstimateRuleFn = unsafe extern "C" fn(*const c_void, *const i64, usize) -> f32;
type CreatePoolFn = unsafe extern "C" fn() -> i64;
type DestroyPoolFn = unsafe extern "C" fn(i64);

struct Api {
    destroy: DestroyFn,
    order: OrderFn,
    register_word: RegisterWordFn,
    prob: ProbFn,
    sequence_prob: SequenceProbFn,
    prob_rule: ProbRuleFn,
    estimate_rule: EstimateRuleFn,
    create_pool: CreatePoolFn,
    destroy_pool: DestroyPoolFn,
}

pub struct KenLm {
    model: *mut c_void,
    api: Api,
    order: usize,
    // Keeps every function pointer in `api` valid.
    _lib: Library,
}

// SAFETY: the native model is immutable after loading except for word
// registration and pool management, which the scorer synchronises itself.
unsafe impl Send for KenLm {}
unsafe impl Sync for KenLm {}

fn symbol<T: Copy>(lib: &Library, path: &Path, name: &str) -> Result<T, BackendError> {
    let mut bytes = name.as_bytes().to_vec();
    bytes.push(0);
    // SAFETY: every `T` used here matches the exported C signature.
    unsafe { lib.get::<T>(&bytes) }
        .map(|s| *s)
        .map_err(|_| BackendError::MissingSymbol {
            path: path.to_path_buf(),
            symbol: name.to_string(),
        })
}

impl KenLm {
    pub fn load(library: &Path, model: &Path) -> Result<Self, BackendError> {
        // SAFETY: loading runs the library's initialisers; the scorer is
        // expected to be a plain C library without global side effects.
        let lib = unsafe { Library::new(library) }.map_err(|e| BackendError::Library {
            path: library.to_path_buf(),
            reason: e.to_string(),
        })?;
        let load: LoadFn = symbol(&lib, library, "smtlm_load")?;
        let api = Api {
            destroy: symbol(&lib, library, "smtlm_destroy")?,
            order: symbol(&lib, library, "smtlm_order")?,
            register_word: symbol(&lib, library, "smtlm_register_word")?,
            prob: symbol(&lib, library, "smtlm_prob")?,
            sequence_prob: symbol(&lib, library, "smtlm_sequence_prob")?,
            prob_rule: symbol(&lib, library, "smtlm_prob_rule")?,
            estimate_rule: symbol(&lib, library, "smtlm_estimate_rule")?,
            create_pool: symbol(&lib, library, "smtlm_create_pool")?,
            destroy_pool: symbol(&lib, library, "smtlm_destroy_pool")?,
        };

        let c_path = model
            .to_str()
            .and_then(|s| CString::new(s).ok())
            .ok_or_else(|| BackendError::BadPath(model.to_path_buf()))?;
        // SAFETY: `c_path` is a valid NUL-terminated string for the call.
        let ptr = unsafe { load(c_path.as_ptr()) };
        if ptr.is_null() {
            return Err(BackendError::ModelLoad(model.to_path_buf()));
        }
        // SAFETY: `ptr` is a live model returned by `smtlm_load`.
        let order = unsafe { (api.order)(ptr) }.max(0) as usize;
        info!(model = %model.display(), library = %library.display(), order, "loaded native language model");
        Ok(Self {
            model: ptr,
            api,
            order,
            _lib: lib,
        })
    }
}

impl NgramBackend for KenLm {
    fn order(&self) -> usize {
        self.order
    }

    fn register_word(&self, word: &str, id: WordId) -> bool {
        let Ok(word) = CString::new(word) else {
            return false;
        };
        // SAFETY: live model, valid C string.
        unsafe { (self.api.register_word)(self.model, word.as_ptr(), id as c_int) }
    }

    fn prob(&self, ngram: &[WordId]) -> f32 {
        let ids: Vec<c_int> = ngram.iter().map(|&w| w as c_int).collect();
        // SAFETY: `ids` outlives the call and its length is passed along.
        unsafe { (self.api.prob)(self.model, ids.as_ptr(), ids.len()) }
    }

    fn sequence_prob(&self, words: &[WordId], start: usize) -> f32 {
        if start >= words.len() {
            return 0.0;
        }
        let ids: Vec<c_int> = words.iter().map(|&w| w as c_int).collect();
        // SAFETY: `ids` outlives the call and `start < ids.len()`.
        unsafe { (self.api.sequence_prob)(self.model, ids.as_ptr(), ids.len(), start) }
    }

    fn prob_rule(&self, pool: PoolHandle, words: &[i64]) -> StateProb {
        // SAFETY: `words` outlives the call; negative entries are states
        // the scorer handed out from this same pool.
        let raw = unsafe { (self.api.prob_rule)(self.model, pool.0, words.as_ptr(), words.len()) };
        StateProb {
            state: NativeState(raw.state),
            prob: raw.prob,
        }
    }

    fn estimate_rule(&self, words: &[i64]) -> f32 {
        // SAFETY: `words` outlives the call.
        unsafe { (self.api.estimate_rule)(self.model, words.as_ptr(), words.len()) }
    }

    fn create_pool(&self) -> PoolHandle {
        // SAFETY: no arguments; the scorer owns the allocation.
        PoolHandle(unsafe { (self.api.create_pool)() })
    }

    fn destroy_pool(&self, pool: PoolHandle) {
        // SAFETY: `MemoryPool` destroys each handle exactly once.
        unsafe { (self.api.destroy_pool)(pool.0) }
    }
}

impl Drop for KenLm {
    fn drop(&mut self) {
        // SAFETY: the model was created by `smtlm_load` and is freed once.
        unsafe { (self.api.destroy)(self.model) }
    }
}
