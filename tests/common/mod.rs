pub mod asserts;
pub mod collab_doubles;
pub mod fixtures;
pub mod nodes;
pub mod testing;

pub use asserts::*;
pub use collab_doubles::*;
pub use fixtures::*;
pub use nodes::*;
pub use testing::*;
