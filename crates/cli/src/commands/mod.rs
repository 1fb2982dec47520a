pub mod catalog;
pub mod graph;
pub mod run;
pub mod util;

pub use catalog::*;
pub use graph::*;
pub use run::*;
pub use util::*;
