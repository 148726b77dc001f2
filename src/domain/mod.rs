pub mod order;
pub mod pocket;
pub mod response;
pub mod state;
pub mod transaction;

pub use order::*;
pub use pocket::*;
pub use response::*;
pub use state::*;
pub use transaction::*;
