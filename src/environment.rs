//! Chained binding frames.
//!
//! An [`Environment`] is a shared handle to a frame. Cloning the handle shares the frame;
//! child frames keep their parent alive through the same handle. Bindings map names to
//! trees, and every lookup hands out a deep copy so that callers can never mutate a
//! stored definition.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use log::debug;

use crate::tree::Tree;

/// How assignment treats its right-hand side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindingMode {
    /// Store the right-hand side unevaluated; each use reduces a fresh copy
    #[default]
    Deferred,
    /// Reduce the right-hand side before storing it
    Eager,
}

/// Outcome of [`Environment::bind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Defined,
    Reassigned,
}

#[derive(Debug)]
struct Frame {
    bindings: RefCell<BTreeMap<String, Tree>>,
    parent: Option<Environment>,
    mode: Cell<BindingMode>,
}

/// Handle to a binding frame and, through it, its ancestors.
#[derive(Debug, Clone)]
pub struct Environment(Rc<Frame>);

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// Empty top-level frame
    pub fn new() -> Self {
        Environment(Rc::new(Frame {
            bindings: RefCell::new(BTreeMap::new()),
            parent: None,
            mode: Cell::new(BindingMode::default()),
        }))
    }

    /// Empty frame chained to `parent`, starting in the parent's binding mode
    pub fn with_parent(parent: &Environment) -> Self {
        Environment(Rc::new(Frame {
            bindings: RefCell::new(BTreeMap::new()),
            parent: Some(parent.clone()),
            mode: Cell::new(parent.binding_mode()),
        }))
    }

    /// Deep copy of the innermost binding of `name`
    pub fn lookup(&self, name: &str) -> Option<Tree> {
        self.lookup_binding(name).map(|(tree, _)| tree)
    }

    /// Deep copy of the innermost binding of `name`, with the frame that defines it
    pub fn lookup_binding(&self, name: &str) -> Option<(Tree, Environment)> {
        let mut frame = Some(self);
        while let Some(env) = frame {
            if let Some(tree) = env.0.bindings.borrow().get(name) {
                return Some((tree.deep_copy(), env.clone()));
            }
            frame = env.0.parent.as_ref();
        }
        None
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.lookup_binding(name).is_some()
    }

    /// Bind `name` in this frame only, replacing any existing local binding
    pub fn bind(&self, name: impl Into<String>, tree: Tree) -> Bound {
        let name = name.into();
        debug!("bind {name} = {tree}");
        match self.0.bindings.borrow_mut().insert(name, tree) {
            Some(_) => Bound::Reassigned,
            None => Bound::Defined,
        }
    }

    pub fn binding_mode(&self) -> BindingMode {
        self.0.mode.get()
    }

    /// Set this frame's binding mode, returning the previous one
    pub fn set_binding_mode(&self, mode: BindingMode) -> BindingMode {
        self.0.mode.replace(mode)
    }

    pub fn parent(&self) -> Option<&Environment> {
        self.0.parent.as_ref()
    }

    /// Whether both handles refer to the same frame
    pub fn same_frame(&self, other: &Environment) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// All visible bindings, inner frames overriding outer ones, sorted by name
    pub fn bindings(&self) -> Vec<(String, Tree)> {
        let mut visible = match &self.0.parent {
            Some(parent) => parent.bindings().into_iter().collect(),
            None => BTreeMap::new(),
        };
        for (name, tree) in self.0.bindings.borrow().iter() {
            visible.insert(name.clone(), tree.deep_copy());
        }
        visible.into_iter().collect()
    }
}
