//! bindrt - object lifetime bridge between a native object model and a
//! dynamic language runtime
//!
//! The runtime keeps one language-side wrapper per live native instance,
//! tracks which side owns each instance, invalidates wrappers whose native
//! half is destroyed, routes native virtual calls into language overrides and
//! resolves casts across multiple-inheritance hierarchies.

pub mod cast;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gil;
pub mod handle;
pub mod introspect;
pub mod invalidation;
pub mod logging;
pub mod ownership;
pub mod registry;
pub mod runtime;
pub mod types;
pub mod value;

#[cfg(feature = "sample")]
pub mod sample;

// Re-export core types
pub use cast::CastStats;
pub use config::{EnumScopePolicy, OverrideErrorPolicy, RuntimeConfig};
pub use dispatch::{CallFrame, Override};
pub use error::{BindingError, CastFailure, Result};
pub use gil::{GilGuard, LanguageLock};
pub use handle::NativeHandle;
pub use introspect::{LiveWrappers, WrapperSnapshot};
pub use invalidation::Lifecycle;
pub use ownership::Ownership;
pub use registry::{WeakWrapper, Wrapper, WrapperId};
pub use runtime::{NativeBackend, Runtime, WeakRuntime};
pub use types::{EnumMeta, TypeDescriptor, TypeRegistry, TypeSpec, TypeTag};
pub use value::{ArgPolicy, NativeRef, Value, ValueCell};

use once_cell::sync::Lazy;
use parking_lot::RwLock;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// (major, minor, micro, release level, serial)
pub fn version_info() -> (u32, u32, u32, &'static str, u32) {
    let parse = |s: &str| s.parse::<u32>().unwrap_or(0);
    let (release, serial) = match option_env!("CARGO_PKG_VERSION_PRE") {
        Some(pre) if !pre.is_empty() => {
            let mut parts = pre.splitn(2, '.');
            let level = match parts.next().unwrap_or("") {
                "alpha" => "alpha",
                "beta" => "beta",
                "rc" => "candidate",
                _ => "final",
            };
            (level, parts.next().map(parse).unwrap_or(0))
        }
        _ => ("final", 0),
    };
    (
        parse(env!("CARGO_PKG_VERSION_MAJOR")),
        parse(env!("CARGO_PKG_VERSION_MINOR")),
        parse(env!("CARGO_PKG_VERSION_PATCH")),
        release,
        serial,
    )
}

/// Process-wide runtime used by hosts that bind a single language runtime
static GLOBAL: Lazy<RwLock<Option<Runtime>>> = Lazy::new(|| RwLock::new(None));

/// Install `runtime` as the process-wide instance, returning the previous one
///
/// Logging is set up from the runtime's `[logging]` section on first call.
pub fn init(runtime: Runtime) -> Option<Runtime> {
    logging::init_with_config(logging::LogConfig::from_runtime_config(&runtime.config().logging));
    GLOBAL.write().replace(runtime)
}

pub fn global() -> Option<Runtime> {
    GLOBAL.read().clone()
}

/// Shut down and remove the process-wide runtime
pub fn cleanup() {
    let runtime = GLOBAL.write().take();
    if let Some(runtime) = runtime {
        runtime.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info_matches_version() {
        let (major, minor, micro, level, _) = version_info();
        assert_eq!(format!("{}.{}.{}", major, minor, micro), VERSION.split('-').next().unwrap());
        assert!(["alpha", "beta", "candidate", "final"].contains(&level));
    }
}
