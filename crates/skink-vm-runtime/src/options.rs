//! VM configuration

use std::any::Any;
use std::sync::Arc;

use skink_vm_core::context::NativeCtx;
use skink_vm_core::error::VmResult;
use skink_vm_core::value::Value;

/// Rough per-frame footprint used to translate a byte budget into a
/// frame-depth limit
const APPROX_FRAME_BYTES: usize = 2048;

/// Host timer operations. The default implementation is the runtime's
/// own event loop; embedders with their own loop substitute here.
pub trait HostOps: Send + Sync {
    /// Arm timer `id` to fire after `delay_ms`
    fn set_timer(&self, id: u64, delay_ms: u64);
    /// Disarm timer `id`
    fn clear_timer(&self, id: u64);
}

/// A host module injected at VM creation; its init callback builds the
/// module's exported value on first import.
#[derive(Clone)]
pub struct Addon {
    /// Import specifier the addon answers to
    pub name: String,
    /// Builds the exported namespace value
    pub init: Arc<dyn Fn(&mut NativeCtx<'_>) -> VmResult<Value> + Send + Sync>,
}

/// Options enumerated at VM creation
#[derive(Clone)]
pub struct VmOptions {
    /// Disable the module loader and filesystem externals
    pub sandbox: bool,
    /// Permit `eval`
    pub unsafe_eval: bool,
    /// Suppress banner/prompt output
    pub quiet: bool,
    /// Dump bytecode after compilation
    pub disassemble: bool,
    /// Stack budget in bytes
    pub max_stack_size: usize,
    /// Arena limit in bytes
    pub memory_limit: usize,
    /// Treat the main source as an ES module
    pub module: bool,
    /// Host modules
    pub addons: Vec<Addon>,
    /// Opaque host pointer handed to host callbacks
    pub external: Option<Arc<dyn Any + Send + Sync>>,
    /// Script-visible arguments (`process.argv`)
    pub argv: Vec<String>,
    /// Host timer vtable (None = runtime event loop)
    pub ops: Option<Arc<dyn HostOps>>,
}

impl VmOptions {
    /// Frame-depth limit derived from the stack byte budget
    pub fn max_stack_depth(&self) -> usize {
        (self.max_stack_size / APPROX_FRAME_BYTES).max(16)
    }
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            sandbox: false,
            unsafe_eval: false,
            quiet: false,
            disassemble: false,
            max_stack_size: 2 * 1024 * 1024,
            memory_limit: skink_vm_core::memory::DEFAULT_MEMORY_LIMIT,
            module: false,
            addons: Vec::new(),
            external: None,
            argv: Vec::new(),
            ops: None,
        }
    }
}

impl std::fmt::Debug for VmOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmOptions")
            .field("sandbox", &self.sandbox)
            .field("unsafe_eval", &self.unsafe_eval)
            .field("module", &self.module)
            .field("max_stack_size", &self.max_stack_size)
            .field("memory_limit", &self.memory_limit)
            .field("addons", &self.addons.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_depth_derivation() {
        let options = VmOptions {
            max_stack_size: 2 * 1024 * 1024,
            ..Default::default()
        };
        assert_eq!(options.max_stack_depth(), 1024);

        let tiny = VmOptions {
            max_stack_size: 1,
            ..Default::default()
        };
        assert_eq!(tiny.max_stack_depth(), 16);
    }
}
