pub mod descriptor;
pub mod flags;
pub mod opcodes;
pub mod pool;

/// Leading magic number of every class file.
pub const MAGIC: u32 = 0xcafe_babe;

/// Oldest supported class-file major version. Older formats predate the
/// loadable class constant the rewriter relies on and pass through untouched.
pub const MIN_MAJOR_VERSION: u16 = 49;
