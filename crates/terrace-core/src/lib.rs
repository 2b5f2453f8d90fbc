//! Terrace スタック定義
//!
//! KDLで書かれたスタックファイルをパースし、依存グラフを構築します。

pub mod error;
pub mod loader;
pub mod model;
pub mod parser;

pub use error::*;
pub use loader::{LoadedStack, ResolvedProvider, StackLoader, load_stack};
pub use model::*;
pub use parser::*;
