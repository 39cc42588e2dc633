pub mod lazy;
pub mod liveness;
pub mod local;

pub use lazy::Lazy;
pub use liveness::Liveness;
pub use local::ThreadLocal;
