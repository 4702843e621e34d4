use std::rc::Rc;

use crate::object::Closure;

/// Activation record for one call.
#[derive(Debug, Clone)]
pub struct Frame {
    pub closure: Rc<Closure>,
    /// Offset of the next instruction to execute in `closure`'s instructions.
    pub ip: usize,
    /// Stack index of the first parameter/local slot.
    pub base_pointer: usize,
}

impl Frame {
    pub fn new(closure: Rc<Closure>, base_pointer: usize) -> Self {
        Frame { closure, ip: 0, base_pointer }
    }
}
