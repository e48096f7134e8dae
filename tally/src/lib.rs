use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub mod aggregate;
pub mod buckets;
pub mod common;
pub mod encode;
pub mod normalize;
pub mod schema;
pub mod split;
pub mod validate;
